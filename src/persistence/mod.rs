//! Writes run state back to disk: ledger rows and the progress snapshot.

pub mod progress;
pub mod store;

pub use progress::ProgressWriter;
pub use store::LedgerStore;
