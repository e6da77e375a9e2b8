//! Invocation adapter.
//!
//! Normalizes the captured capability's calling convention — whichever of
//! the known shapes it turned out to have — into one operation returning a
//! `Result`. The foreign convention is a single-shot callback pair
//! `{suc, err}`; exactly one of the two may fire, and the first signal
//! wins if a misbehaving bundle fires both. A capability that matches no
//! known convention fails closed instead of being duck-typed at call time.

use std::cell::RefCell;
use std::rc::Rc;

use boa_engine::{Context, JsError, JsString, JsValue, NativeFunction};

use crate::capture::CapabilityShape;
use crate::config::CaptureConfig;
use crate::engine::environment::DeferredQueue;
use crate::error::SignError;
use crate::request::SigningRequest;

/// Outcome slot shared by the `{suc, err}` pair. `None` until the first
/// signal; later signals are dropped.
type CallbackSlot = Rc<RefCell<Option<Result<serde_json::Value, serde_json::Value>>>>;

/// Dispatches one signing request against the captured capability.
///
/// Exactly one underlying call is issued per invocation. After the call,
/// pending promise jobs and deferred timers are drained once so a
/// completion signaled from a microtask still lands before we decide the
/// call never completed.
pub fn invoke(
    ctx: &mut Context,
    raw: &JsValue,
    shape: CapabilityShape,
    mut request: SigningRequest,
    capture: &CaptureConfig,
    deferred: &DeferredQueue,
) -> Result<serde_json::Value, SignError> {
    request.ensure_caver();

    let wire = serde_json::to_value(&request)
        .map_err(|e| SignError::Invocation(serde_json::Value::String(e.to_string())))?;
    let payload = JsValue::from_json(&wire, ctx)
        .map_err(|e| SignError::Invocation(js_error_to_json(&e, ctx)))?;

    let slot: CallbackSlot = Rc::new(RefCell::new(None));
    let callbacks = build_callbacks(ctx, &slot);

    let call_result = match shape {
        CapabilityShape::Callable => {
            let Some(func) = raw.as_callable() else {
                return Err(SignError::ShapeUnrecognized(
                    "capability tagged callable is not callable".to_string(),
                ));
            };
            func.call(&JsValue::undefined(), &[payload, callbacks], ctx)
        }
        CapabilityShape::NamedMethod => {
            let Some(obj) = raw.as_object() else {
                return Err(SignError::ShapeUnrecognized(
                    "capability tagged named-method is not an object".to_string(),
                ));
            };
            let method = obj
                .get(JsString::from(capture.property.as_str()), ctx)
                .map_err(|e| SignError::Invocation(js_error_to_json(&e, ctx)))?;
            let Some(method) = method.as_callable() else {
                return Err(SignError::ShapeUnrecognized(format!(
                    "capability exposes no callable `{}`",
                    capture.property
                )));
            };
            method.call(raw, &[payload, callbacks], ctx)
        }
        CapabilityShape::CallTrampoline => {
            let Some(obj) = raw.as_object() else {
                return Err(SignError::ShapeUnrecognized(
                    "capability tagged call-trampoline is not an object".to_string(),
                ));
            };
            // Go through the `call` property: a custom dispatcher method
            // and the (hooked) builtin both resolve correctly this way
            let call = obj
                .get(JsString::from("call"), ctx)
                .map_err(|e| SignError::Invocation(js_error_to_json(&e, ctx)))?;
            let Some(call) = call.as_callable() else {
                return Err(SignError::ShapeUnrecognized(
                    "capability exposes no callable `call`".to_string(),
                ));
            };
            let sentinel = JsValue::from(JsString::from(capture.sentinel.as_str()));
            call.call(raw, &[sentinel, payload, callbacks], ctx)
        }
    };

    if let Err(e) = call_result {
        // Synchronous throw instead of a callback signal
        return Err(SignError::Invocation(js_error_to_json(&e, ctx)));
    }

    // Give microtask/timer-signaled completions a chance to land
    if slot.borrow().is_none() {
        let _ = ctx.run_jobs();
        deferred.drain(ctx);
    }

    let outcome = slot.borrow_mut().take();
    match outcome {
        Some(Ok(token)) => Ok(token),
        Some(Err(reason)) => Err(SignError::Invocation(reason)),
        None => Err(SignError::Invocation(serde_json::Value::String(
            "completion callback never invoked".to_string(),
        ))),
    }
}

/// Builds the `{suc, err}` pair writing into `slot`, first signal wins.
fn build_callbacks(ctx: &mut Context, slot: &CallbackSlot) -> JsValue {
    let suc = {
        let slot = slot.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let payload = args.first().cloned().unwrap_or_default();
                let mut slot = slot.borrow_mut();
                if slot.is_none() {
                    *slot = Some(Ok(js_to_json(&payload, ctx)));
                }
                Ok(JsValue::undefined())
            })
        }
    };
    let err = {
        let slot = slot.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let reason = args.first().cloned().unwrap_or_default();
                let mut slot = slot.borrow_mut();
                if slot.is_none() {
                    *slot = Some(Err(js_to_json(&reason, ctx)));
                }
                Ok(JsValue::undefined())
            })
        }
    };

    boa_engine::object::ObjectInitializer::new(ctx)
        .function(suc, JsString::from("suc"), 1)
        .function(err, JsString::from("err"), 1)
        .build()
        .into()
}

/// Converts an engine value into JSON without interpreting it, going
/// through the engine's own `JSON.stringify` for structured values.
pub(crate) fn js_to_json(value: &JsValue, ctx: &mut Context) -> serde_json::Value {
    use serde_json::Value;

    if value.is_undefined() || value.is_null() {
        return Value::Null;
    }
    if let Some(b) = value.as_boolean() {
        return Value::Bool(b);
    }
    if let Some(s) = value.as_string() {
        return Value::String(s.to_std_string_escaped());
    }

    let stringified = (|| {
        let json = ctx
            .global_object()
            .get(JsString::from("JSON"), ctx)
            .ok()?
            .as_object()?
            .clone();
        let stringify = json.get(JsString::from("stringify"), ctx).ok()?;
        let stringify = stringify.as_callable()?.clone();
        stringify
            .call(&JsValue::from(json), &[value.clone()], ctx)
            .ok()
    })();

    if let Some(text) = stringified.and_then(|v| v.as_string().map(|s| s.to_std_string_escaped())) {
        if let Ok(parsed) = serde_json::from_str(&text) {
            return parsed;
        }
    }

    match value.to_string(ctx) {
        Ok(s) => Value::String(s.to_std_string_escaped()),
        Err(_) => Value::Null,
    }
}

fn js_error_to_json(error: &JsError, ctx: &mut Context) -> serde_json::Value {
    let opaque = error.to_opaque(ctx);
    let converted = js_to_json(&opaque, ctx);
    if converted.is_null() {
        serde_json::Value::String(error.to_string())
    } else {
        converted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;
    use std::collections::BTreeMap;

    fn eval(ctx: &mut Context, src: &str) -> JsValue {
        ctx.eval(Source::from_bytes(src.as_bytes())).unwrap()
    }

    fn run(
        ctx: &mut Context,
        raw: &JsValue,
        shape: CapabilityShape,
    ) -> Result<serde_json::Value, SignError> {
        let request = SigningRequest::new("/rest/v/profile/get", BTreeMap::new());
        invoke(
            ctx,
            raw,
            shape,
            request,
            &CaptureConfig::default(),
            &DeferredQueue::new(),
        )
    }

    #[test]
    fn test_callable_success() {
        let mut ctx = Context::default();
        let raw = eval(
            &mut ctx,
            "var calls = 0; (function(p, cb) { calls += 1; cb.suc('TOKEN123'); })",
        );
        let token = run(&mut ctx, &raw, CapabilityShape::Callable).unwrap();
        assert_eq!(token, serde_json::json!("TOKEN123"));
        // Exactly one underlying call
        assert_eq!(eval(&mut ctx, "calls").as_number(), Some(1.0));
    }

    #[test]
    fn test_callable_sees_caver_default() {
        let mut ctx = Context::default();
        let raw = eval(&mut ctx, "(function(p, cb) { cb.suc(p.query.caver); })");
        let token = run(&mut ctx, &raw, CapabilityShape::Callable).unwrap();
        assert_eq!(token, serde_json::json!("2"));
    }

    #[test]
    fn test_caller_supplied_caver_preserved() {
        let mut ctx = Context::default();
        let raw = eval(&mut ctx, "(function(p, cb) { cb.suc(p.query.caver); })");
        let mut query = BTreeMap::new();
        query.insert("caver".to_string(), "9".to_string());
        let request = SigningRequest::new("/x", query);
        let token = invoke(
            &mut ctx,
            &raw,
            CapabilityShape::Callable,
            request,
            &CaptureConfig::default(),
            &DeferredQueue::new(),
        )
        .unwrap();
        assert_eq!(token, serde_json::json!("9"));
    }

    #[test]
    fn test_callable_failure_channel() {
        let mut ctx = Context::default();
        let raw = eval(&mut ctx, "(function(p, cb) { cb.err('dispatcher said no'); })");
        let err = run(&mut ctx, &raw, CapabilityShape::Callable).unwrap_err();
        match err {
            SignError::Invocation(reason) => {
                assert_eq!(reason, serde_json::json!("dispatcher said no"))
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn test_double_signal_keeps_first() {
        let mut ctx = Context::default();
        let raw = eval(
            &mut ctx,
            "(function(p, cb) { cb.suc('first'); cb.err('second'); cb.suc('third'); })",
        );
        let token = run(&mut ctx, &raw, CapabilityShape::Callable).unwrap();
        assert_eq!(token, serde_json::json!("first"));
    }

    #[test]
    fn test_sync_throw_is_invocation_error() {
        let mut ctx = Context::default();
        let raw = eval(&mut ctx, "(function(p, cb) { throw new Error('exploded'); })");
        let err = run(&mut ctx, &raw, CapabilityShape::Callable).unwrap_err();
        assert!(matches!(err, SignError::Invocation(_)));
    }

    #[test]
    fn test_never_signaled_is_invocation_error() {
        let mut ctx = Context::default();
        let raw = eval(&mut ctx, "(function(p, cb) {})");
        let err = run(&mut ctx, &raw, CapabilityShape::Callable).unwrap_err();
        match err {
            SignError::Invocation(reason) => {
                assert_eq!(reason, serde_json::json!("completion callback never invoked"))
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn test_named_method_shape() {
        let mut ctx = Context::default();
        let raw = eval(
            &mut ctx,
            r#"
            ({
                calls: 0,
                $encode: function(p, cb) { this.calls += 1; cb.suc('NAMED:' + p.url); }
            })
            "#,
        );
        let token = run(&mut ctx, &raw, CapabilityShape::NamedMethod).unwrap();
        assert_eq!(token, serde_json::json!("NAMED:/rest/v/profile/get"));
        let calls = raw
            .as_object()
            .unwrap()
            .get(JsString::from("calls"), &mut ctx)
            .unwrap();
        assert_eq!(calls.as_number(), Some(1.0));
    }

    #[test]
    fn test_trampoline_shape_custom_dispatcher() {
        let mut ctx = Context::default();
        let raw = eval(
            &mut ctx,
            r#"
            ({
                call: function(name, p, cb) {
                    if (name === '$encode') { cb.suc('VIA:' + name); } else { cb.err('bad op'); }
                }
            })
            "#,
        );
        let token = run(&mut ctx, &raw, CapabilityShape::CallTrampoline).unwrap();
        assert_eq!(token, serde_json::json!("VIA:$encode"));
    }

    #[test]
    fn test_trampoline_shape_builtin_call() {
        let mut ctx = Context::default();
        // A bare function dispatcher: builtin `call` invokes it with the
        // sentinel as `this`
        let raw = eval(
            &mut ctx,
            "(function(p, cb) { cb.suc('OP:' + this); })",
        );
        let token = run(&mut ctx, &raw, CapabilityShape::CallTrampoline).unwrap();
        assert_eq!(token, serde_json::json!("OP:$encode"));
    }

    #[test]
    fn test_unrecognized_raw_fails_closed() {
        let mut ctx = Context::default();
        let raw = JsValue::from(42);
        let err = run(&mut ctx, &raw, CapabilityShape::Callable).unwrap_err();
        assert!(matches!(err, SignError::ShapeUnrecognized(_)));

        let raw = eval(&mut ctx, "({})");
        let err = run(&mut ctx, &raw, CapabilityShape::NamedMethod).unwrap_err();
        assert!(matches!(err, SignError::ShapeUnrecognized(_)));
    }

    #[test]
    fn test_structured_success_payload_passes_through() {
        let mut ctx = Context::default();
        let raw = eval(
            &mut ctx,
            "(function(p, cb) { cb.suc({ token: 'T', ttl: 60 }); })",
        );
        let token = run(&mut ctx, &raw, CapabilityShape::Callable).unwrap();
        assert_eq!(token, serde_json::json!({ "token": "T", "ttl": 60 }));
    }

    #[test]
    fn test_wire_payload_shape() {
        let mut ctx = Context::default();
        let raw = eval(
            &mut ctx,
            r#"(function(p, cb) {
                cb.suc([typeof p.url, typeof p.query, typeof p.form, typeof p.requestBody].join(','));
            })"#,
        );
        let token = run(&mut ctx, &raw, CapabilityShape::Callable).unwrap();
        assert_eq!(token, serde_json::json!("string,object,object,object"));
    }
}
