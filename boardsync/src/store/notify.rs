//! User-facing notification hook for store outcomes.

/// Receives success and error notices from store operations, for
/// surfacing rollbacks to the user. All methods default to no-ops so
/// embedders implement only what they show.
pub trait Notifier: Send + Sync {
    /// A mutation was confirmed by the server.
    fn success(&self, message: &str) {
        let _ = message;
    }

    /// A mutation failed and its optimistic effect was rolled back.
    fn error(&self, message: &str) {
        let _ = message;
    }
}

/// Discards all notices.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {}

/// Routes notices to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn success(&self, message: &str) {
        tracing::info!(message, "store operation confirmed");
    }

    fn error(&self, message: &str) {
        tracing::warn!(message, "store operation rolled back");
    }
}
