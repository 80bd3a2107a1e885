//! Frame graph configuration.

use std::time::Duration;

/// What a pass queue does when its inputs are still not ready after the
/// asynchronous wait budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitTimeoutPolicy {
    /// Abort the frame with [`FrameGraphError::InputTimeout`](crate::FrameGraphError::InputTimeout).
    #[default]
    Fail,
    /// Log a warning and run the pass anyway.
    Degrade,
}

/// Configuration for a [`FrameGraph`](crate::FrameGraph)
#[derive(Debug, Clone)]
pub struct FrameGraphConfig {
    /// Total time a queue waits for a pass's inputs in asynchronous mode
    pub async_wait_timeout: Duration,
    /// Number of wait slices the timeout is divided into
    pub async_wait_attempts: u32,
    /// Behaviour once the wait budget is exhausted
    pub wait_timeout_policy: WaitTimeoutPolicy,
    /// Frames an unused render object survives before it is disposed
    pub object_idle_timeout: u32,
    /// Name prefix for worker threads spawned by non-main queues
    pub worker_thread_prefix: String,
}

impl FrameGraphConfig {
    pub fn with_async_wait(mut self, timeout: Duration, attempts: u32) -> Self {
        self.async_wait_timeout = timeout;
        self.async_wait_attempts = attempts.max(1);
        self
    }

    pub fn with_wait_timeout_policy(mut self, policy: WaitTimeoutPolicy) -> Self {
        self.wait_timeout_policy = policy;
        self
    }

    pub fn with_object_idle_timeout(mut self, frames: u32) -> Self {
        self.object_idle_timeout = frames.max(1);
        self
    }

    pub fn with_worker_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_thread_prefix = prefix.into();
        self
    }

    /// Duration of one wait slice.
    pub fn wait_slice(&self) -> Duration {
        self.async_wait_timeout / self.async_wait_attempts.max(1)
    }
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            async_wait_timeout: Duration::from_millis(5000),
            async_wait_attempts: 100,
            wait_timeout_policy: WaitTimeoutPolicy::Fail,
            object_idle_timeout: 1,
            worker_thread_prefix: "framegraph-queue".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FrameGraphConfig::default();
        assert_eq!(config.async_wait_timeout, Duration::from_millis(5000));
        assert_eq!(config.async_wait_attempts, 100);
        assert_eq!(config.wait_slice(), Duration::from_millis(50));
        assert_eq!(config.wait_timeout_policy, WaitTimeoutPolicy::Fail);
    }

    #[test]
    fn test_attempts_never_zero() {
        let config = FrameGraphConfig::default().with_async_wait(Duration::from_millis(10), 0);
        assert_eq!(config.async_wait_attempts, 1);
        assert_eq!(config.wait_slice(), Duration::from_millis(10));
    }
}
