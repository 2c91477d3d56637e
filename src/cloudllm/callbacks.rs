//! Cooperative cancellation and fire-and-forget callbacks.
//!
//! Modeled on an `EventHandler` async-trait observability pattern, but simplified to the
//! synchronous, non-blocking hooks the step machine actually needs — a richer agent/orchestration
//! lifecycle is a separate, higher-level concern with no counterpart here.

use crate::cloudllm::error::CoreError;
use crate::cloudllm::mailbox::UsageReport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Synchronous, non-blocking hooks invoked by the step machine and tool registry.
pub trait StepCallbacks: Send + Sync {
    fn on_step_start(&self, _step_name: &str) {}
    fn on_step_complete(&self, _step_name: &str) {}
    fn on_tool_start(&self, _tool_name: &str, _args: &serde_json::Value) {}
    fn on_tool_complete(&self, _tool_name: &str, _result: &str) {}
    fn on_retry(&self, _attempt: u32, _cause: &CoreError) {}
    fn on_error(&self, _error: &CoreError) {}
    fn on_api_usage(&self, _usage: &UsageReport) {}
}

/// No-op default used when a bot is constructed without callbacks.
pub struct NoopCallbacks;
impl StepCallbacks for NoopCallbacks {}

/// Granularity at which [`CancellationToken::is_cancelled`] is expected to be polled by the step
/// machine's suspension points: cancellation should be observed within 100ms.
pub const CANCELLATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A cooperative cancellation flag shared between a bot and its surrounding supervisor. Cheap to
/// clone; all clones observe the same underlying flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// A child token for a spawned branch: cancelling the root must cancel every branch it
    /// spawned, so children share the same flag rather than getting an independent one.
    pub fn child(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelling_root_is_observed_by_child_tokens() {
        let root = CancellationToken::new();
        let child = root.child();
        assert!(!child.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
    }
}
