//! Write-once capture registry.
//!
//! The single synchronization point of the harness: interception rules
//! (engine thread) record the transition, request handlers (tokio tasks)
//! poll it. The transition `UNCAPTURED → CAPTURED` is irreversible for the
//! process lifetime; whichever rule fires first wins and later writers are
//! silently ignored.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::SignError;

/// Calling convention a captured capability exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityShape {
    /// The stored value is the signing function itself.
    Callable,
    /// The stored object carries the signing method under the well-known
    /// property name.
    NamedMethod,
    /// The stored object is invoked through its generic `call` dispatcher
    /// with the sentinel as first argument.
    CallTrampoline,
}

impl fmt::Display for CapabilityShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CapabilityShape::Callable => "callable",
            CapabilityShape::NamedMethod => "named-method",
            CapabilityShape::CallTrampoline => "call-trampoline",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureInfo {
    pub shape: CapabilityShape,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct CaptureRegistry {
    slot: Mutex<Option<CaptureInfo>>,
}

impl CaptureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the capture. First writer wins; returns whether this call
    /// performed the transition. Callers must only keep the raw capability
    /// when this returns true.
    pub fn record(&self, shape: CapabilityShape) -> bool {
        let mut slot = self.slot.lock().expect("capture registry poisoned");
        if slot.is_some() {
            return false;
        }
        *slot = Some(CaptureInfo {
            shape,
            captured_at: Utc::now(),
        });
        true
    }

    /// Non-blocking view, used by the health endpoint.
    pub fn snapshot(&self) -> Option<CaptureInfo> {
        *self.slot.lock().expect("capture registry poisoned")
    }

    pub fn is_captured(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Polls until captured or `timeout` elapses. Yields between polls so
    /// concurrent waiters make progress independently.
    pub async fn wait_until_ready(
        &self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<CaptureInfo, SignError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(info) = self.snapshot() {
                return Ok(info);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SignError::CaptureTimeout { waited: timeout });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_record_first_writer_wins() {
        let registry = CaptureRegistry::new();
        assert!(registry.record(CapabilityShape::Callable));
        // A later rule firing with a different shape must not overwrite
        assert!(!registry.record(CapabilityShape::CallTrampoline));
        assert_eq!(
            registry.snapshot().unwrap().shape,
            CapabilityShape::Callable
        );
    }

    #[test]
    fn test_uncaptured_snapshot_is_none() {
        let registry = CaptureRegistry::new();
        assert!(!registry.is_captured());
        assert!(registry.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_captured() {
        let registry = CaptureRegistry::new();
        registry.record(CapabilityShape::NamedMethod);
        let start = Instant::now();
        let info = registry
            .wait_until_ready(Duration::from_secs(5), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(info.shape, CapabilityShape::NamedMethod);
        assert!(start.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_wait_times_out_within_bound_plus_one_poll() {
        let registry = CaptureRegistry::new();
        let timeout = Duration::from_millis(100);
        let poll = Duration::from_millis(20);
        let start = Instant::now();
        let err = registry.wait_until_ready(timeout, poll).await.unwrap_err();
        assert!(matches!(err, SignError::CaptureTimeout { .. }));
        // Bound is timeout + one poll interval of slack
        assert!(start.elapsed() < timeout + poll + Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_wait_observes_capture_during_wait() {
        let registry = Arc::new(CaptureRegistry::new());
        let writer = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.record(CapabilityShape::Callable);
        });
        let info = registry
            .wait_until_ready(Duration::from_secs(2), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(info.shape, CapabilityShape::Callable);
    }
}
