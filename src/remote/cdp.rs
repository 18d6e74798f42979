//! Chrome DevTools Protocol driver for the agent surface.
//!
//! Attaches to an already running browser (an IDE started with a remote
//! debugging port), picks the page hosting the chat surface and drives it
//! with plain clicks, text insertion and text reads. All selectors come from
//! [`SurfaceConfig`] and [`MarkerConfig`]; nothing here knows a specific IDE.

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::input::InsertTextParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{MarkerConfig, SurfaceConfig};
use crate::remote::markers::{MarkerKind, MarkerSet};
use crate::remote::{Connector, RemoteAgent, TranscriptSource};
use crate::{qlog, qlog_debug, qlog_trace, qlog_warn, Error, Result};

/// Time given to the browser to attach existing targets after connecting.
const TARGET_ATTACH_GRACE: Duration = Duration::from_millis(500);

/// Last-resort transcript scan: the newest non-empty element that looks like
/// a chat message.
const HEURISTIC_SCAN_JS: &str = r#"(() => {
  const nodes = Array.from(document.querySelectorAll(
    "[class*='message'], [class*='response'], [class*='answer']"));
  for (let i = nodes.length - 1; i >= 0; i--) {
    const text = (nodes[i].innerText || '').trim();
    if (text.length > 0) return text;
  }
  return null;
})()"#;

/// Connects to a DevTools endpoint and finds the agent surface.
pub struct CdpConnector {
    surface: SurfaceConfig,
    markers: MarkerConfig,
}

impl CdpConnector {
    pub fn new(surface: SurfaceConfig, markers: MarkerConfig) -> Self {
        Self { surface, markers }
    }

    /// Pick the page hosting the agent: URL hint first, then any page that
    /// has the input surface.
    async fn select_page(&self, pages: Vec<Page>) -> Option<Page> {
        if let Some(hint) = &self.surface.page_url_hint {
            for page in &pages {
                let url = page.url().await.ok().flatten().unwrap_or_default();
                if url.contains(hint.as_str()) {
                    qlog_debug!("Selected page by URL hint: {}", url);
                    return Some(page.clone());
                }
            }
        }
        for page in pages {
            if page.find_element(self.surface.input.as_str()).await.is_ok() {
                qlog_debug!(
                    "Selected page with input surface: {}",
                    page.url().await.ok().flatten().unwrap_or_default()
                );
                return Some(page);
            }
        }
        None
    }
}

#[async_trait]
impl Connector for CdpConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn RemoteAgent>> {
        let markers = MarkerSet::from_config(&self.markers)?;
        let (mut browser, mut handler) = Browser::connect(endpoint.to_string())
            .await
            .map_err(|e| Error::Connection(format!("{}: {}", endpoint, e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    qlog_debug!("CDP handler stopped: {}", e);
                    break;
                }
            }
        });

        if let Err(e) = browser.fetch_targets().await {
            qlog_debug!("fetch_targets failed (continuing): {}", e);
        }
        tokio::time::sleep(TARGET_ATTACH_GRACE).await;

        let pages = match browser.pages().await {
            Ok(pages) => pages,
            Err(e) => {
                handler_task.abort();
                return Err(Error::Connection(format!("cannot list pages: {}", e)));
            }
        };
        qlog_debug!("CDP endpoint exposes {} pages", pages.len());

        match self.select_page(pages).await {
            Some(page) => {
                qlog!("Attached to agent surface at {}", endpoint);
                Ok(Box::new(CdpAgent {
                    _browser: browser,
                    page,
                    handler_task: Some(handler_task),
                    surface: self.surface.clone(),
                    marker_rules: self.markers.clone(),
                    markers,
                }))
            }
            None => {
                handler_task.abort();
                Err(Error::Connection(
                    "no page with an active agent surface".to_string(),
                ))
            }
        }
    }
}

/// A live session on one page of the remote browser.
pub struct CdpAgent {
    _browser: Browser,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
    surface: SurfaceConfig,
    marker_rules: MarkerConfig,
    markers: MarkerSet,
}

impl CdpAgent {
    async fn evaluate(&self, expression: String) -> Result<Option<serde_json::Value>> {
        let mut params = EvaluateParams::new(expression);
        params.return_by_value = Some(true);
        let result = self.page.evaluate_expression(params).await?;
        Ok(result.value().cloned())
    }

    /// Whether any element matching `selector` is rendered with a size.
    async fn is_visible(&self, selector: &str) -> Result<bool> {
        let literal = serde_json::to_string(selector)?;
        let script = format!(
            "(() => {{ const el = document.querySelector({}); \
             if (!el) return false; const r = el.getBoundingClientRect(); \
             return r.width > 0 && r.height > 0; }})()",
            literal
        );
        Ok(self
            .evaluate(script)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| Error::Remote(format!("'{}' not found: {}", selector, e)))?;
        element.click().await?;
        Ok(())
    }

    /// Text of the last element matching `selector`, if any.
    async fn last_text(&self, selector: &str) -> Option<String> {
        let elements = self.page.find_elements(selector).await.ok()?;
        let last = elements.last()?;
        let text = last.inner_text().await.ok().flatten()?;
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

#[async_trait]
impl TranscriptSource for CdpAgent {
    async fn read_latest(&self) -> Result<Option<String>> {
        for selector in &self.surface.transcript {
            if let Some(text) = self.last_text(selector).await {
                qlog_trace!("read_latest: '{}' gave {} chars", selector, text.len());
                return Ok(Some(text));
            }
        }
        let scanned = self
            .evaluate(HEURISTIC_SCAN_JS.to_string())
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.trim().is_empty());
        if scanned.is_some() {
            qlog_trace!("read_latest: heuristic scan matched");
        }
        Ok(scanned)
    }

    async fn has_marker(&self, kind: MarkerKind) -> Result<bool> {
        let mut selectors: Vec<&str> = self
            .marker_rules
            .selectors(kind)
            .iter()
            .map(String::as_str)
            .collect();
        if kind == MarkerKind::Generating {
            if let Some(stop) = &self.surface.stop_button {
                selectors.push(stop.as_str());
            }
        }
        for selector in selectors {
            if self.is_visible(selector).await? {
                qlog_trace!("marker {} visible via '{}'", kind, selector);
                return Ok(true);
            }
        }

        if kind == MarkerKind::Error {
            return Ok(false);
        }
        let Some(text) = self.read_latest().await? else {
            return Ok(false);
        };
        if let Some(line) = self.markers.matching_line(kind, &text) {
            qlog_trace!("marker {} matched text '{}'", kind, line);
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl RemoteAgent for CdpAgent {
    async fn new_conversation(&self) -> Result<()> {
        let selector = self
            .surface
            .new_chat_button
            .as_deref()
            .ok_or_else(|| Error::Remote("no new-chat selector configured".to_string()))?;
        self.click(selector).await
    }

    async fn submit(&self, instruction: &str) -> Result<()> {
        let input = self
            .page
            .find_element(self.surface.input.as_str())
            .await
            .map_err(|e| Error::Remote(format!("input surface not found: {}", e)))?;
        input.click().await?;
        input.focus().await?;
        self.page.execute(InsertTextParams::new(instruction)).await?;

        let sent = match &self.surface.send_button {
            Some(selector) => self.click(selector).await.is_ok(),
            None => false,
        };
        if !sent {
            qlog_debug!("No send button, pressing Enter");
            input.press_key("Enter").await?;
        }
        Ok(())
    }

    async fn cancel_turn(&self) {
        if let Some(selector) = &self.surface.stop_button {
            if let Err(e) = self.click(selector).await {
                qlog_warn!("Could not stop the running turn: {}", e);
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(task) = self.handler_task.take() {
            task.abort();
            qlog_debug!("CDP session closed");
        }
    }
}
