//! Request/response correlation between fire-and-forget script execution and
//! the callers waiting on its result.
//!
//! Every dispatched script gets a fresh [`CorrelationId`] and an entry in the
//! pending map. The surface reports results through a [`ResultSink`], which
//! removes the entry and resolves the caller's oneshot exactly once. A result
//! whose id is no longer pending (already delivered, or abandoned after a
//! timeout) is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::error::{BrowserError, BrowserResult};
use super::metrics::AutomationMetrics;
use super::steps::{StepAction, StepResult};
use super::surface::{BrowserSurface, ScriptEnvelope};

/// Decoded script outcome: the returned value, or the thrown error's text.
pub type ScriptOutcome = Result<Value, String>;

type PendingMap = Arc<Mutex<HashMap<CorrelationId, PendingRequest>>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug)]
struct PendingRequest {
    responder: oneshot::Sender<ScriptOutcome>,
    label: String,
    issued_at: DateTime<Utc>,
}

/// Delivery side of the bridge, handed to the surface on initialization.
#[derive(Debug, Clone)]
pub struct ResultSink {
    pending: PendingMap,
    metrics: Arc<Mutex<AutomationMetrics>>,
}

impl ResultSink {
    /// Resolves the pending caller for `id`. Returns whether a caller was found.
    pub fn deliver(&self, id: &str, status: &str, payload: &str) -> bool {
        let request = CorrelationId::parse(id).and_then(|id| lock(&self.pending).remove(&id));
        lock(&self.metrics).record_delivery(request.is_some());

        let Some(request) = request else {
            debug!(correlation_id = id, status, "dropping delivery for unknown correlation id");
            return false;
        };

        let outcome = if status == "success" {
            Ok(decode_payload(payload))
        } else {
            Err(payload.to_string())
        };
        let waited_ms = (Utc::now() - request.issued_at).num_milliseconds();
        trace!(
            correlation_id = id,
            label = %request.label,
            status,
            waited_ms,
            "script result delivered"
        );
        if request.responder.send(outcome).is_err() {
            debug!(correlation_id = id, "caller went away before delivery");
        }
        true
    }
}

fn decode_payload(payload: &str) -> Value {
    if payload.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string()))
}

/// A dispatched script whose result has not arrived yet.
///
/// Dropping it before the result arrives abandons the request and removes it
/// from the pending set.
#[derive(Debug)]
pub struct PendingScript {
    id: CorrelationId,
    label: String,
    receiver: Option<oneshot::Receiver<ScriptOutcome>>,
    pending: PendingMap,
    metrics: Arc<Mutex<AutomationMetrics>>,
}

impl PendingScript {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub async fn wait(mut self) -> BrowserResult<ScriptOutcome> {
        let Some(receiver) = self.receiver.take() else {
            return Err(BrowserError::Abandoned(self.label.clone()));
        };
        receiver
            .await
            .map_err(|_| BrowserError::Abandoned(self.label.clone()))
    }
}

impl Drop for PendingScript {
    fn drop(&mut self) {
        if lock(&self.pending).remove(&self.id).is_some() {
            lock(&self.metrics).record_abandoned(1);
            debug!(correlation_id = %self.id, label = %self.label, "pending script abandoned");
        }
    }
}

pub struct BridgeChannel {
    surface: Arc<dyn BrowserSurface>,
    binding_name: String,
    pending: PendingMap,
    ready: AtomicBool,
    metrics: Arc<Mutex<AutomationMetrics>>,
}

impl BridgeChannel {
    pub fn new(surface: Arc<dyn BrowserSurface>, binding_name: impl Into<String>) -> Self {
        Self {
            surface,
            binding_name: binding_name.into(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            ready: AtomicBool::new(false),
            metrics: Arc::new(Mutex::new(AutomationMetrics::default())),
        }
    }

    pub async fn initialize(&self) -> BrowserResult<()> {
        self.surface.initialize(self.sink()).await?;
        self.ready.store(true, Ordering::SeqCst);
        debug!(binding = %self.binding_name, "bridge channel ready");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn sink(&self) -> ResultSink {
        ResultSink {
            pending: Arc::clone(&self.pending),
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn metrics(&self) -> AutomationMetrics {
        lock(&self.metrics).clone()
    }

    pub fn metrics_handle(&self) -> Arc<Mutex<AutomationMetrics>> {
        Arc::clone(&self.metrics)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Registers a correlation id, wraps `script` so its outcome is reported
    /// back under that id, and hands it to the surface.
    ///
    /// `script` must be a JavaScript function expression taking no arguments.
    pub fn dispatch(&self, label: &str, script: &str) -> BrowserResult<PendingScript> {
        if !self.is_ready() {
            return Err(BrowserError::NotReady);
        }

        let id = CorrelationId::new();
        let envelope = ScriptEnvelope {
            id,
            label: label.to_string(),
            source: self.wrap(id, script)?,
        };
        let (responder, receiver) = oneshot::channel();
        lock(&self.pending).insert(
            id,
            PendingRequest {
                responder,
                label: label.to_string(),
                issued_at: Utc::now(),
            },
        );

        if let Err(err) = self.surface.execute(envelope) {
            lock(&self.pending).remove(&id);
            warn!(correlation_id = %id, label, error = %err, "surface rejected script");
            return Err(err);
        }
        lock(&self.metrics).record_dispatch();
        trace!(correlation_id = %id, label, "script dispatched");

        Ok(PendingScript {
            id,
            label: label.to_string(),
            receiver: Some(receiver),
            pending: Arc::clone(&self.pending),
            metrics: Arc::clone(&self.metrics),
        })
    }

    pub fn deliver(&self, id: &str, status: &str, payload: &str) -> bool {
        self.sink().deliver(id, status, payload)
    }

    /// Compiles `action` and waits for its decoded result.
    pub async fn execute(&self, action: &StepAction) -> BrowserResult<StepResult> {
        let script = action.compile()?;
        let outcome = self.dispatch(action.label(), &script)?.wait().await?;
        Ok(StepResult::from_outcome(outcome))
    }

    /// Drops every pending request; their callers observe `Abandoned`.
    pub fn abandon_all(&self) -> usize {
        let drained = {
            let mut pending = lock(&self.pending);
            pending.drain().count()
        };
        if drained > 0 {
            lock(&self.metrics).record_abandoned(drained as u64);
            warn!(count = drained, "abandoned pending scripts");
        }
        drained
    }

    fn wrap(&self, id: CorrelationId, script: &str) -> BrowserResult<String> {
        let id = serde_json::to_string(&id.to_string())?;
        let binding = serde_json::to_string(&self.binding_name)?;
        Ok(format!(
            r#"(function() {{
    var report = function(status, payload) {{
        window[{binding}](JSON.stringify({{ id: {id}, status: status, payload: payload }}));
    }};
    try {{
        var result = ({script})();
        report('success', JSON.stringify(result === undefined ? null : result));
    }} catch (error) {{
        report('error', String(error));
    }}
}})();"#
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::browser::surface::BrowserSurface;

    #[derive(Default)]
    struct RecordingSurface {
        scripts: Mutex<Vec<ScriptEnvelope>>,
    }

    #[async_trait]
    impl BrowserSurface for RecordingSurface {
        async fn initialize(&self, _sink: ResultSink) -> BrowserResult<()> {
            Ok(())
        }

        fn execute(&self, envelope: ScriptEnvelope) -> BrowserResult<()> {
            self.scripts.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    async fn ready_bridge() -> (BridgeChannel, Arc<RecordingSurface>) {
        let surface = Arc::new(RecordingSurface::default());
        let bridge = BridgeChannel::new(surface.clone(), "kpjBridge");
        bridge.initialize().await.unwrap();
        (bridge, surface)
    }

    #[tokio::test]
    async fn dispatch_before_initialize_fails_immediately() {
        let surface = Arc::new(RecordingSurface::default());
        let bridge = BridgeChannel::new(surface.clone(), "kpjBridge");
        let err = bridge.dispatch("probe", "function() { return 1; }").unwrap_err();
        assert!(matches!(err, BrowserError::NotReady));
        assert_eq!(bridge.pending_count(), 0);
        assert!(surface.scripts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delivery_resolves_matching_caller() {
        let (bridge, surface) = ready_bridge().await;
        let pending = bridge.dispatch("probe", "function() { return 1; }").unwrap();
        let id = pending.id().to_string();
        assert_eq!(bridge.pending_count(), 1);

        let wrapped = surface.scripts.lock().unwrap()[0].source.clone();
        assert!(wrapped.contains(&format!("\"{id}\"")));
        assert!(wrapped.contains("window[\"kpjBridge\"]"));

        assert!(bridge.deliver(&id, "success", r#"{"success":true,"rows":2}"#));
        let outcome = pending.wait().await.unwrap();
        assert_eq!(outcome, Ok(json!({"success": true, "rows": 2})));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_and_repeated_deliveries_are_dropped() {
        let (bridge, _surface) = ready_bridge().await;
        assert!(!bridge.deliver("not-a-uuid", "success", "1"));
        assert!(!bridge.deliver(&CorrelationId::new().to_string(), "success", "1"));

        let pending = bridge.dispatch("probe", "function() { return 1; }").unwrap();
        let id = pending.id().to_string();
        assert!(bridge.deliver(&id, "success", "1"));
        assert!(!bridge.deliver(&id, "success", "2"));
        assert_eq!(pending.wait().await.unwrap(), Ok(json!(1)));

        let metrics = bridge.metrics();
        assert_eq!(metrics.results_delivered, 1);
        assert_eq!(metrics.deliveries_dropped, 3);
    }

    #[tokio::test]
    async fn non_json_payload_falls_back_to_text() {
        let (bridge, _surface) = ready_bridge().await;
        let pending = bridge.dispatch("probe", "function() {}").unwrap();
        bridge.deliver(&pending.id().to_string(), "success", "plain text");
        assert_eq!(pending.wait().await.unwrap(), Ok(json!("plain text")));
    }

    #[tokio::test]
    async fn error_status_carries_message() {
        let (bridge, _surface) = ready_bridge().await;
        let pending = bridge.dispatch("probe", "function() {}").unwrap();
        bridge.deliver(
            &pending.id().to_string(),
            "error",
            "TypeError: x is undefined",
        );
        assert_eq!(
            pending.wait().await.unwrap(),
            Err("TypeError: x is undefined".to_string())
        );
    }

    #[tokio::test]
    async fn dropping_pending_script_abandons_request() {
        let (bridge, _surface) = ready_bridge().await;
        let pending = bridge.dispatch("probe", "function() {}").unwrap();
        let id = pending.id().to_string();
        drop(pending);
        assert_eq!(bridge.pending_count(), 0);
        assert!(!bridge.deliver(&id, "success", "1"));
        assert_eq!(bridge.metrics().requests_abandoned, 1);
    }

    struct RejectingSurface;

    #[async_trait]
    impl BrowserSurface for RejectingSurface {
        async fn initialize(&self, _sink: ResultSink) -> BrowserResult<()> {
            Ok(())
        }

        fn execute(&self, _envelope: ScriptEnvelope) -> BrowserResult<()> {
            Err(BrowserError::NotReady)
        }
    }

    #[tokio::test]
    async fn rejected_script_leaves_no_pending_entry() {
        let bridge = BridgeChannel::new(Arc::new(RejectingSurface), "kpjBridge");
        bridge.initialize().await.unwrap();
        let err = bridge.dispatch("probe", "function() {}").unwrap_err();
        assert!(matches!(err, BrowserError::NotReady));
        assert_eq!(bridge.pending_count(), 0);
        assert_eq!(bridge.metrics().scripts_dispatched, 0);
    }

    #[tokio::test]
    async fn delivery_from_another_thread_resolves_each_caller() {
        let (bridge, _surface) = ready_bridge().await;
        let pending: Vec<PendingScript> = (0..3)
            .map(|_| bridge.dispatch("probe", "function() {}").unwrap())
            .collect();
        let ids: Vec<String> = pending.iter().map(|p| p.id().to_string()).collect();

        let sink = bridge.sink();
        let delivering = std::thread::spawn(move || {
            ids.iter()
                .enumerate()
                .rev()
                .map(|(index, id)| sink.deliver(id, "success", &index.to_string()))
                .collect::<Vec<bool>>()
        });

        for (index, script) in pending.into_iter().enumerate() {
            assert_eq!(script.wait().await.unwrap(), Ok(json!(index)));
        }
        assert_eq!(delivering.join().unwrap(), vec![true, true, true]);
        assert_eq!(bridge.pending_count(), 0);
        assert_eq!(bridge.metrics().results_delivered, 3);
    }

    #[tokio::test]
    async fn abandon_all_wakes_waiting_callers() {
        let (bridge, _surface) = ready_bridge().await;
        let pending = bridge.dispatch("probe", "function() {}").unwrap();
        assert_eq!(bridge.abandon_all(), 1);
        assert!(matches!(
            pending.wait().await,
            Err(BrowserError::Abandoned(label)) if label == "probe"
        ));
    }
}
