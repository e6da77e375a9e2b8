//! Request service: one-shot and server modes over the same operation.
//!
//! Both modes wait for capture readiness with a bound, dispatch through
//! the engine, and report structured failures. Nothing here retries —
//! backoff is the caller's concern.

pub mod http;

use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::engine::EngineHandle;
use crate::error::SignError;
use crate::request::{RequestParams, SigningRequest};

pub struct ServiceState {
    engine: EngineHandle,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl ServiceState {
    pub fn new(engine: EngineHandle, config: &Config) -> Self {
        Self {
            engine,
            wait_timeout: Duration::from_secs(config.capture.wait_timeout_secs),
            poll_interval: Duration::from_millis(config.capture.poll_interval_ms),
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Waits for readiness, then dispatches. Every failure is scoped to
    /// this one request; concurrent requests wait and fail independently.
    pub async fn handle(&self, request: SigningRequest) -> Result<serde_json::Value, SignError> {
        self.engine
            .registry()
            .wait_until_ready(self.wait_timeout, self.poll_interval)
            .await?;
        self.engine.sign(request).await
    }
}

/// One-shot mode: a single JSON argument in, the signed artifact on
/// stdout, then exit. A bare string artifact is printed raw — stdout is
/// the API for wrapping callers.
pub async fn run_one_shot(state: &ServiceState, raw_arg: &str) -> anyhow::Result<()> {
    let params: RequestParams = serde_json::from_str(raw_arg)
        .map_err(|e| anyhow::anyhow!("invalid request argument: {e}"))?;
    let request = params.into_request();
    info!("one-shot signing request for {}", request.url);

    match state.handle(request).await {
        Ok(artifact) => {
            match artifact.as_str() {
                Some(token) => println!("{token}"),
                None => println!("{artifact}"),
            }
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("{e}")),
    }
}
