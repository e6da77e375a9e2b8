//! Engine host: one dedicated thread owns the sandbox.
//!
//! Engine values are not `Send`, and the harness model wants the bundle,
//! every interception callback and every invocation on a single cooperative
//! execution context anyway. The `signer-engine` thread builds the
//! environment, arms the interceptor, acks construction, loads the bundle,
//! then serves signing commands one at a time. The async side talks to it
//! only through channels and the shared capture registry.

pub mod canvas;
pub mod environment;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use boa_engine::{Context, JsString, JsValue, Source};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::capture::{adapter, CaptureRegistry, CaptureSlot, Interceptor};
use crate::config::Config;
use crate::error::SignError;
use crate::request::SigningRequest;

use environment::Environment;

enum EngineCommand {
    Sign {
        request: SigningRequest,
        reply: oneshot::Sender<Result<serde_json::Value, SignError>>,
    },
}

/// Cheap, clonable front to the engine thread. Dropping the last handle
/// ends the thread's command loop.
#[derive(Clone)]
pub struct EngineHandle {
    registry: Arc<CaptureRegistry>,
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub fn registry(&self) -> &Arc<CaptureRegistry> {
        &self.registry
    }

    /// Dispatches one signing request. Callers are expected to have
    /// observed readiness first; the engine still answers a premature
    /// request with a timeout-class error rather than blocking.
    pub async fn sign(&self, request: SigningRequest) -> Result<serde_json::Value, SignError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Sign {
                request,
                reply: reply_tx,
            })
            .map_err(|_| engine_gone())?;
        reply_rx.await.map_err(|_| engine_gone())?
    }
}

fn engine_gone() -> SignError {
    SignError::Invocation(serde_json::Value::String(
        "signer engine terminated".to_string(),
    ))
}

pub struct SignerEngine;

impl SignerEngine {
    /// Builds the sandbox on the engine thread and returns once
    /// construction either succeeded or failed for good. The bundle loads
    /// on the engine thread right after the ack, so the first signing
    /// command always queues behind the load — a command can never observe
    /// a half-loaded bundle.
    pub fn spawn(config: Config) -> Result<EngineHandle, SignError> {
        let registry = Arc::new(CaptureRegistry::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread_registry = registry.clone();
        thread::Builder::new()
            .name("signer-engine".to_string())
            .spawn(move || engine_main(config, thread_registry, cmd_rx, ready_tx))
            .map_err(|e| SignError::SandboxConstruction(format!("spawn engine thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(EngineHandle { registry, cmd_tx }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SignError::SandboxConstruction(
                "engine thread died during construction".to_string(),
            )),
        }
    }
}

fn engine_main(
    config: Config,
    registry: Arc<CaptureRegistry>,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    ready: std::sync::mpsc::Sender<Result<(), SignError>>,
) {
    let mut ctx = Context::default();
    let slot = CaptureSlot::new(registry);

    let env = match environment::build(&mut ctx, &config) {
        Ok(env) => env,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Every rule must be armed before the bundle's first instruction;
    // a late hook has lost the capture race for the process lifetime
    let mut interceptor = Interceptor::from_config(&config.capture);
    if let Err(e) = interceptor.install(&mut ctx, &slot) {
        let _ = ready.send(Err(SignError::SandboxConstruction(format!(
            "arming interception rules: {e}"
        ))));
        return;
    }

    let _ = ready.send(Ok(()));

    load_bundle(&mut ctx, &config, &env);
    if slot.registry().is_captured() {
        info!("sandbox ready, capability captured during load");
    } else {
        warn!("bundle loaded but no capability captured yet");
    }

    while let Some(EngineCommand::Sign { request, reply }) = commands.blocking_recv() {
        let result = match (slot.raw(), slot.registry().snapshot()) {
            (Some(raw), Some(info)) => adapter::invoke(
                &mut ctx,
                &raw,
                info.shape,
                request,
                &config.capture,
                &env.deferred,
            ),
            _ => Err(SignError::CaptureTimeout {
                waited: Duration::ZERO,
            }),
        };
        if let Err(ref e) = result {
            warn!("signing request failed: {e}");
        }
        let _ = reply.send(result);
    }
    debug!("engine command loop closed");
}

/// Loads the vendor bundle. Its own throws are logged and swallowed:
/// capture may already have happened before the throw, and a partially
/// initialized bundle with a captured capability is still a working one.
fn load_bundle(ctx: &mut Context, config: &Config, env: &Environment) {
    let path = &config.bundle.path;
    info!("loading vendor bundle from {}", path.display());

    let source = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("{}", SignError::ScriptLoad(format!("{}: {e}", path.display())));
            return;
        }
    };

    if let Err(e) = ctx.eval(Source::from_bytes(&source)) {
        warn!("{}", SignError::ScriptLoad(e.to_string()));
    }
    let _ = ctx.run_jobs();

    // Some bundle revisions define their entry point without running it
    match ctx.global_object().get(JsString::from("main"), ctx) {
        Ok(main) => {
            if let Some(f) = main.as_callable() {
                debug!("bundle exposes main(), invoking it");
                if let Err(e) = f.call(&JsValue::undefined(), &[], ctx) {
                    warn!("{}", SignError::ScriptLoad(format!("main() threw: {e}")));
                }
            }
        }
        Err(e) => debug!("probing bundle main(): {e}"),
    }

    if !env.deferred.is_empty() {
        debug!("bundle parked deferred jobs, draining");
    }
    env.deferred.drain(ctx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn engine_for(bundle_source: &str) -> (EngineHandle, NamedTempFile) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bundle_source.as_bytes()).unwrap();
        let mut config = Config::default();
        config.bundle.path = file.path().to_path_buf();
        let handle = SignerEngine::spawn(config).unwrap();
        (handle, file)
    }

    fn request() -> SigningRequest {
        SigningRequest::new("/rest/v/profile/get", BTreeMap::new())
    }

    async fn wait(handle: &EngineHandle) {
        handle
            .registry()
            .wait_until_ready(Duration::from_secs(2), Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_capture_and_sign_via_property_write() {
        let (handle, _file) = engine_for(
            "var holder = {}; holder.$encode = function(p, cb) { cb.suc('TOKEN123'); };",
        );
        wait(&handle).await;
        let token = handle.sign(request()).await.unwrap();
        assert_eq!(token, serde_json::json!("TOKEN123"));
    }

    #[tokio::test]
    async fn test_capture_and_sign_via_sentinel_call() {
        let (handle, _file) = engine_for(
            r#"
            function dispatch(p, cb) { cb.suc('TRAMPOLINE:' + p.query.caver); }
            dispatch.call('$encode', {}, {});
            "#,
        );
        wait(&handle).await;
        let token = handle.sign(request()).await.unwrap();
        assert_eq!(token, serde_json::json!("TRAMPOLINE:2"));
    }

    #[tokio::test]
    async fn test_load_throw_after_capture_is_non_fatal() {
        let (handle, _file) = engine_for(
            r#"
            var holder = {};
            holder.$encode = function(p, cb) { cb.suc('SURVIVED'); };
            throw new Error('late bundle failure');
            "#,
        );
        wait(&handle).await;
        let token = handle.sign(request()).await.unwrap();
        assert_eq!(token, serde_json::json!("SURVIVED"));
    }

    #[tokio::test]
    async fn test_missing_bundle_never_captures() {
        let mut config = Config::default();
        config.bundle.path = std::path::PathBuf::from("/nonexistent/core.js");
        let handle = SignerEngine::spawn(config).unwrap();
        let err = handle
            .registry()
            .wait_until_ready(Duration::from_millis(150), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::CaptureTimeout { .. }));
    }

    #[tokio::test]
    async fn test_deferred_capture_through_timer() {
        let (handle, _file) = engine_for(
            r#"
            setTimeout(function() {
                var holder = {};
                holder.$encode = function(p, cb) { cb.suc('DEFERRED'); };
            }, 3000);
            "#,
        );
        wait(&handle).await;
        let token = handle.sign(request()).await.unwrap();
        assert_eq!(token, serde_json::json!("DEFERRED"));
    }

    #[tokio::test]
    async fn test_sign_before_capture_fails_scoped() {
        let (handle, _file) = engine_for("var nothing = 1;");
        let err = handle.sign(request()).await.unwrap_err();
        assert!(matches!(err, SignError::CaptureTimeout { .. }));
    }

    #[tokio::test]
    async fn test_bundle_main_is_invoked_when_exposed() {
        let (handle, _file) = engine_for(
            r#"
            function main() {
                var holder = {};
                holder.$encode = function(p, cb) { cb.suc('FROM_MAIN'); };
            }
            "#,
        );
        wait(&handle).await;
        let token = handle.sign(request()).await.unwrap();
        assert_eq!(token, serde_json::json!("FROM_MAIN"));
    }

    #[tokio::test]
    async fn test_concurrent_signs_resolve_independently() {
        let (handle, _file) = engine_for(
            "var h = {}; h.$encode = function(p, cb) { cb.suc('T:' + p.url); };",
        );
        wait(&handle).await;

        let mut tasks = Vec::new();
        for i in 0..4 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                let req = SigningRequest::new(format!("/path/{i}"), BTreeMap::new());
                handle.sign(req).await.unwrap()
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), serde_json::json!(format!("T:/path/{i}")));
        }
    }
}
