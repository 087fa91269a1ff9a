use std::sync::Mutex;

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserSection;

use super::bridge::{lock, CorrelationId, ResultSink};
use super::error::{BrowserError, BrowserResult};

/// Script text ready for the surface, tagged with its correlation id.
#[derive(Debug, Clone)]
pub struct ScriptEnvelope {
    pub id: CorrelationId,
    pub label: String,
    pub source: String,
}

/// The script-capable page the automation drives.
///
/// `execute` must return without waiting for the script; the outcome comes
/// back later through the [`ResultSink`] passed to `initialize`.
#[async_trait]
pub trait BrowserSurface: Send + Sync {
    async fn initialize(&self, sink: ResultSink) -> BrowserResult<()>;
    fn execute(&self, envelope: ScriptEnvelope) -> BrowserResult<()>;
}

#[derive(Debug, Deserialize)]
struct BindingEnvelope {
    id: String,
    status: String,
    #[serde(default)]
    payload: Option<String>,
}

/// Chromium tab reached over the DevTools protocol.
///
/// Connects to a browser that is already running (and already logged in);
/// results travel back through a `Runtime.addBinding` function.
pub struct ChromiumSurface {
    config: BrowserSection,
    browser: Browser,
    handler_task: Mutex<Option<JoinHandle<()>>>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    page: Mutex<Option<Page>>,
    sink: Mutex<Option<ResultSink>>,
}

impl ChromiumSurface {
    pub async fn connect(config: BrowserSection) -> BrowserResult<Self> {
        info!(endpoint = %config.debugger_url, "connecting to running chromium");
        let (browser, mut handler) = Browser::connect(config.debugger_url.clone())
            .await
            .map_err(|err| BrowserError::Connect(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok(Self {
            config,
            browser,
            handler_task: Mutex::new(Some(handler_task)),
            listener_task: Mutex::new(None),
            page: Mutex::new(None),
            sink: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &BrowserSection {
        &self.config
    }

    /// Stops the background tasks. The browser itself stays open: it belongs
    /// to the user's logged-in session.
    pub fn shutdown(&self) {
        for slot in [&self.listener_task, &self.handler_task] {
            if let Some(handle) = lock(slot).take() {
                handle.abort();
            }
        }
        lock(&self.page).take();
        info!("detached from chromium");
    }

    async fn select_page(&self) -> BrowserResult<Page> {
        let pages = self.browser.pages().await?;
        if let Some(fragment) = &self.config.page_url_contains {
            for page in &pages {
                if let Ok(Some(url)) = page.url().await {
                    if url.contains(fragment.as_str()) {
                        info!(url = %url, "using logged-in tab");
                        return Ok(page.clone());
                    }
                }
            }
        }
        if let Some(target) = &self.config.target_url {
            warn!(url = %target, "no matching tab found, opening target url");
            let page = self
                .browser
                .new_page(CreateTargetParams::new(target.clone()))
                .await?;
            return Ok(page);
        }
        pages
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::Connect("browser has no open pages".into()))
    }
}

#[async_trait]
impl BrowserSurface for ChromiumSurface {
    async fn initialize(&self, sink: ResultSink) -> BrowserResult<()> {
        let page = self.select_page().await?;
        page.execute(AddBindingParams::new(self.config.binding_name.clone()))
            .await?;
        let mut events = page.event_listener::<EventBindingCalled>().await?;

        let binding = self.config.binding_name.clone();
        let listener_sink = sink.clone();
        let listener = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.name != binding {
                    continue;
                }
                match serde_json::from_str::<BindingEnvelope>(&event.payload) {
                    Ok(envelope) => {
                        listener_sink.deliver(
                            &envelope.id,
                            &envelope.status,
                            envelope.payload.as_deref().unwrap_or_default(),
                        );
                    }
                    Err(err) => {
                        debug!(error = %err, "ignoring malformed bridge payload");
                    }
                }
            }
        });

        if let Some(previous) = lock(&self.listener_task).replace(listener) {
            previous.abort();
        }
        *lock(&self.page) = Some(page);
        *lock(&self.sink) = Some(sink);
        info!(binding = %self.config.binding_name, "chromium surface initialized");
        Ok(())
    }

    fn execute(&self, envelope: ScriptEnvelope) -> BrowserResult<()> {
        let page = lock(&self.page).clone().ok_or(BrowserError::NotReady)?;
        let sink = lock(&self.sink).clone();
        tokio::spawn(async move {
            if let Err(err) = page.evaluate(envelope.source.as_str()).await {
                warn!(
                    correlation_id = %envelope.id,
                    label = %envelope.label,
                    error = %err,
                    "script evaluation failed"
                );
                // The wrapper never ran, so nothing else will report for this id.
                if let Some(sink) = sink {
                    sink.deliver(&envelope.id.to_string(), "error", &err.to_string());
                }
            }
        });
        Ok(())
    }
}

impl Drop for ChromiumSurface {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.handler_task).as_ref() {
            if !handle.is_finished() {
                warn!("chromium surface dropped without explicit shutdown");
                handle.abort();
            }
        }
        if let Some(handle) = lock(&self.listener_task).take() {
            handle.abort();
        }
    }
}
