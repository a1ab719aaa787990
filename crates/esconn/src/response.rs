//! 👀 Response handlers -- the audience. They watch every remote call, they never heckle.
//!
//! After every call that reaches the engine, the raw JSON response is shown to the optional
//! [`ResponseHandler`] together with a label naming the operation. Logging, metrics, audit
//! trails: all fine. Control flow: not their job.
//!
//! A handler that panics is caught and logged. The orchestration carries on, because a
//! half-finished alias swap is a much worse day than a missing metric.

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::Value;
use tracing::{debug, warn};

/// 👀 Observer for raw engine responses.
pub trait ResponseHandler: Send + Sync {
    fn handle_response(&self, label: &str, response: &Value);
}

/// 📝 Logs every response at `debug`. What the CLI installs by default.
#[derive(Debug, Default, Clone)]
pub struct TracingResponseHandler;

impl ResponseHandler for TracingResponseHandler {
    fn handle_response(&self, label: &str, response: &Value) {
        debug!(label, %response, "📡 engine responded");
    }
}

/// 📣 Show a response to the handler, if there is one, with panics fenced off.
pub(crate) fn notify(handler: Option<&dyn ResponseHandler>, label: &str, response: &Value) {
    let Some(handler) = handler else {
        return;
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle_response(label, response)));
    if outcome.is_err() {
        warn!(
            label,
            "⚠️ The response handler panicked. We caught it, swept up, and carried on with the operation."
        );
    }
}
