//! Failure taxonomy of the signing harness.
//!
//! Only `SandboxConstruction` is fatal. Everything else is scoped to the
//! single request (or load attempt) that triggered it — the service never
//! crashes because one signing call went wrong, and no layer retries on
//! its own.

use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum SignError {
    /// The execution engine or its emulated environment could not be
    /// initialized at all. Aborts startup, no recovery.
    SandboxConstruction(String),
    /// The vendor bundle threw while loading. Non-fatal: capture may
    /// already have happened before the throw.
    ScriptLoad(String),
    /// The signing capability never appeared within the wait bound.
    CaptureTimeout { waited: Duration },
    /// A capability exists but matches no known calling convention.
    /// Usually means a new bundle revision needs a new interception rule.
    ShapeUnrecognized(String),
    /// The capability reported failure through its own error channel,
    /// or threw. The payload is passed through uninterpreted.
    Invocation(serde_json::Value),
}

impl fmt::Display for SignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignError::SandboxConstruction(msg) => {
                write!(f, "sandbox construction failed: {msg}")
            }
            SignError::ScriptLoad(msg) => {
                write!(f, "vendor bundle threw during load: {msg}")
            }
            SignError::CaptureTimeout { waited } => {
                write!(
                    f,
                    "signing capability not captured after {:.1}s",
                    waited.as_secs_f64()
                )
            }
            SignError::ShapeUnrecognized(msg) => {
                write!(f, "captured capability has no known calling convention: {msg}")
            }
            SignError::Invocation(payload) => match payload.as_str() {
                Some(s) => write!(f, "signing call failed: {s}"),
                None => write!(f, "signing call failed: {payload}"),
            },
        }
    }
}

impl std::error::Error for SignError {}
