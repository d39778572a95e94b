//! Pretty-printing of control-plane responses into the log.

use serde::Serialize;
use tracing::debug;

/// Renders `value` as indented JSON, falling back to a placeholder when the
/// value cannot be serialised.
#[must_use]
pub fn render<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|err| format!("<unrenderable response: {err}>"))
}

/// Log target response bodies are emitted under.
pub const RESPONSE_TARGET: &str = "garm_e2e::response";

/// Logs a response body at debug level under `label`.
pub fn log_response<T: Serialize + ?Sized>(label: &str, value: &T) {
    if tracing::enabled!(target: RESPONSE_TARGET, tracing::Level::DEBUG) {
        debug!(target: RESPONSE_TARGET, label, body = %render(value));
    }
}
