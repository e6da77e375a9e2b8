//! Capability interception.
//!
//! The bundle's internal variable names and invocation style are unknowable
//! ahead of time and drift between revisions, so several cheap, always-on
//! observers are armed instead of one exact match. Each rule watches one
//! idiom the bundle might use to construct or expose its signing object;
//! whichever fires first wins the capture for the process.
//!
//! Hard precondition: rules must be installed before the first instruction
//! of the bundle runs. A hook installed after load begins has lost the race
//! for good — there is no way to replay the bundle's construction path.

pub mod adapter;
pub mod registry;

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::PropertyDescriptor;
use boa_engine::{Context, JsArgs, JsNativeError, JsResult, JsString, JsValue, NativeFunction};
use tracing::{debug, info};

use crate::config::{CaptureConfig, RuleName};

pub use registry::{CapabilityShape, CaptureInfo, CaptureRegistry};

/// Pairs the engine-local raw capability with the cross-thread registry.
///
/// `raw` stays on the engine thread (engine values are not `Send`); the
/// registry carries everything other threads are allowed to see. The
/// registry's write-once transition decides which rule's candidate is kept.
#[derive(Clone)]
pub struct CaptureSlot {
    registry: Arc<CaptureRegistry>,
    raw: Rc<RefCell<Option<JsValue>>>,
}

impl CaptureSlot {
    pub fn new(registry: Arc<CaptureRegistry>) -> Self {
        Self {
            registry,
            raw: Rc::new(RefCell::new(None)),
        }
    }

    /// Records a candidate. First caller wins; later candidates are
    /// silently dropped, whatever their shape.
    pub fn seize(&self, raw: JsValue, shape: CapabilityShape) {
        if self.registry.record(shape) {
            info!("captured signing capability ({shape})");
            *self.raw.borrow_mut() = Some(raw);
        }
    }

    pub fn raw(&self) -> Option<JsValue> {
        self.raw.borrow().clone()
    }

    pub fn registry(&self) -> &Arc<CaptureRegistry> {
        &self.registry
    }
}

/// One capture strategy. Implementations install their hooks into the
/// context and report candidates through the slot; the callbacks they
/// install run synchronously inside the bundle's own execution and must
/// never throw on the capture path.
pub trait CaptureRule {
    fn name(&self) -> &'static str;
    fn install(&self, ctx: &mut Context, slot: &CaptureSlot) -> JsResult<()>;
}

/// Watches every `Function.prototype.call` invocation; when the first
/// argument is the signing entry-point sentinel, the receiver is the
/// bundle's dispatcher and is recorded as a trampoline capability.
/// Forwarding reproduces the builtin semantics exactly, so hooked code
/// behaves identically.
pub struct SentinelCallRule {
    sentinel: String,
}

impl SentinelCallRule {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }
}

impl CaptureRule for SentinelCallRule {
    fn name(&self) -> &'static str {
        "invocation-sentinel"
    }

    fn install(&self, ctx: &mut Context, slot: &CaptureSlot) -> JsResult<()> {
        let sentinel = self.sentinel.clone();
        let slot = slot.clone();
        let hook = unsafe {
            NativeFunction::from_closure(move |this, args, ctx| {
                if let Some(first) = args.first().and_then(JsValue::as_string) {
                    if first.to_std_string_escaped() == sentinel {
                        slot.seize(this.clone(), CapabilityShape::CallTrampoline);
                    }
                }

                // Builtin `call` semantics: invoke the receiver with
                // args[0] as `this` and the rest as arguments
                let Some(func) = this.as_callable() else {
                    return Err(JsNativeError::typ()
                        .with_message("Function.prototype.call called on non-callable")
                        .into());
                };
                let this_arg = args.get_or_undefined(0).clone();
                let rest = args.get(1..).unwrap_or_default();
                func.call(&this_arg, rest, ctx)
            })
        };
        let hook = FunctionObjectBuilder::new(ctx.realm(), hook)
            .name(JsString::from("call"))
            .length(1)
            .constructor(false)
            .build();

        let function_proto = ctx.intrinsics().constructors().function().prototype();
        function_proto.set(JsString::from("call"), hook, false, ctx)?;
        Ok(())
    }
}

/// Watches reads and writes of the well-known property on every object.
///
/// A write of a function records the function itself (and stashes it on
/// the receiver under a hidden name so later reads keep working). A read
/// with no prior stash records the reading object — it carries the method
/// somewhere the accessor cannot see — and returns a forwarder so the
/// bundle keeps executing either way.
pub struct PropertyHookRule {
    property: String,
}

impl PropertyHookRule {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
        }
    }

    fn stash_name(&self) -> String {
        format!("_{}", self.property)
    }
}

impl CaptureRule for PropertyHookRule {
    fn name(&self) -> &'static str {
        "property-accessor"
    }

    fn install(&self, ctx: &mut Context, slot: &CaptureSlot) -> JsResult<()> {
        let stash = self.stash_name();

        // Forwarder handed out on stashless reads: resolves the stash at
        // call time, and stays inert if nothing ever materializes
        let forwarder = {
            let stash = stash.clone();
            let native = unsafe {
                NativeFunction::from_closure(move |this, args, ctx| {
                    if let Some(obj) = this.as_object() {
                        let stashed = obj.get(JsString::from(stash.as_str()), ctx)?;
                        if let Some(f) = stashed.as_callable() {
                            return f.call(this, args, ctx);
                        }
                    }
                    Ok(JsValue::undefined())
                })
            };
            FunctionObjectBuilder::new(ctx.realm(), native)
                .name(JsString::from(self.property.as_str()))
                .length(2)
                .constructor(false)
                .build()
        };

        let getter = {
            let stash = stash.clone();
            let slot = slot.clone();
            let forwarder = forwarder.clone();
            let native = unsafe {
                NativeFunction::from_closure(move |this, _args, ctx| {
                    if let Some(obj) = this.as_object() {
                        if obj.has_own_property(JsString::from(stash.as_str()), ctx)? {
                            return obj.get(JsString::from(stash.as_str()), ctx);
                        }
                    }
                    // Read before any observable write: the receiver is
                    // the instance that owns the signing method
                    slot.seize(this.clone(), CapabilityShape::NamedMethod);
                    Ok(forwarder.clone().into())
                })
            };
            FunctionObjectBuilder::new(ctx.realm(), native)
                .name(JsString::from(self.property.as_str()))
                .length(0)
                .constructor(false)
                .build()
        };

        let setter = {
            let slot = slot.clone();
            let native = unsafe {
                NativeFunction::from_closure(move |this, args, ctx| {
                    let value = args.get_or_undefined(0).clone();
                    // Keep the write observable for the bundle itself
                    if let Some(obj) = this.as_object() {
                        obj.set(JsString::from(stash.as_str()), value.clone(), false, ctx)?;
                    }
                    if value.is_callable() {
                        slot.seize(value, CapabilityShape::Callable);
                    }
                    Ok(JsValue::undefined())
                })
            };
            FunctionObjectBuilder::new(ctx.realm(), native)
                .name(JsString::from(self.property.as_str()))
                .length(1)
                .constructor(false)
                .build()
        };

        let object_proto = ctx.intrinsics().constructors().object().prototype();
        object_proto.define_property_or_throw(
            JsString::from(self.property.as_str()),
            PropertyDescriptor::builder()
                .get(getter)
                .set(setter)
                .enumerable(false)
                .configurable(true)
                .build(),
            ctx,
        )?;
        Ok(())
    }
}

/// Installs the configured rule set. Re-installing is a no-op per rule,
/// so calling this twice within a process cannot double-wrap a hook.
pub struct Interceptor {
    rules: Vec<Box<dyn CaptureRule>>,
    installed: HashSet<&'static str>,
}

impl Interceptor {
    pub fn from_config(capture: &CaptureConfig) -> Self {
        let rules = capture
            .rules
            .iter()
            .map(|rule| match rule {
                RuleName::InvocationSentinel => {
                    Box::new(SentinelCallRule::new(&capture.sentinel)) as Box<dyn CaptureRule>
                }
                RuleName::PropertyAccessor => {
                    Box::new(PropertyHookRule::new(&capture.property)) as Box<dyn CaptureRule>
                }
            })
            .collect();
        Self {
            rules,
            installed: HashSet::new(),
        }
    }

    pub fn install(&mut self, ctx: &mut Context, slot: &CaptureSlot) -> JsResult<()> {
        for rule in &self.rules {
            if self.installed.insert(rule.name()) {
                rule.install(ctx, slot)?;
                debug!("armed interception rule: {}", rule.name());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;

    fn armed_context() -> (Context, CaptureSlot) {
        let mut ctx = Context::default();
        let slot = CaptureSlot::new(Arc::new(CaptureRegistry::new()));
        let mut interceptor = Interceptor::from_config(&CaptureConfig::default());
        interceptor.install(&mut ctx, &slot).unwrap();
        (ctx, slot)
    }

    fn eval(ctx: &mut Context, src: &str) -> JsValue {
        ctx.eval(Source::from_bytes(src.as_bytes())).unwrap()
    }

    #[test]
    fn test_sentinel_call_captures_trampoline() {
        let (mut ctx, slot) = armed_context();
        eval(
            &mut ctx,
            "function dispatch(payload, cb) {} dispatch.call('$encode', {}, {});",
        );
        let info = slot.registry().snapshot().unwrap();
        assert_eq!(info.shape, CapabilityShape::CallTrampoline);
        assert!(slot.raw().unwrap().is_callable());
    }

    #[test]
    fn test_non_sentinel_call_passes_through_without_capture() {
        let (mut ctx, slot) = armed_context();
        let v = eval(
            &mut ctx,
            "function add(a, b) { return a + b; } add.call(null, 1, 2)",
        );
        assert_eq!(v.as_number(), Some(3.0));
        assert!(!slot.registry().is_captured());
    }

    #[test]
    fn test_hooked_call_preserves_this_binding() {
        let (mut ctx, _slot) = armed_context();
        let v = eval(
            &mut ctx,
            r#"
            function who() { return this.name; }
            who.call({ name: 'receiver' })
            "#,
        );
        assert_eq!(
            v.as_string().map(|s| s.to_std_string_escaped()),
            Some("receiver".to_string())
        );
    }

    #[test]
    fn test_property_write_captures_function() {
        let (mut ctx, slot) = armed_context();
        eval(
            &mut ctx,
            "var holder = {}; holder.$encode = function(p, cb) { cb.suc('W'); };",
        );
        let info = slot.registry().snapshot().unwrap();
        assert_eq!(info.shape, CapabilityShape::Callable);
        assert!(slot.raw().unwrap().is_callable());
    }

    #[test]
    fn test_property_write_then_use_still_works() {
        let (mut ctx, _slot) = armed_context();
        let v = eval(
            &mut ctx,
            r#"
            var holder = {};
            holder.$encode = function(p, cb) { cb.suc('W:' + p.tag); };
            var out = null;
            holder.$encode({ tag: 'x' }, { suc: function(r) { out = r; }, err: function(e) {} });
            out
            "#,
        );
        assert_eq!(
            v.as_string().map(|s| s.to_std_string_escaped()),
            Some("W:x".to_string())
        );
    }

    #[test]
    fn test_property_read_first_captures_receiver() {
        let (mut ctx, slot) = armed_context();
        eval(&mut ctx, "var probe = { marker: 7 }; var f = probe.$encode;");
        let info = slot.registry().snapshot().unwrap();
        assert_eq!(info.shape, CapabilityShape::NamedMethod);
        // The recorded candidate is the reading object itself
        let raw = slot.raw().unwrap();
        let marker = raw
            .as_object()
            .unwrap()
            .get(JsString::from("marker"), &mut ctx)
            .unwrap();
        assert_eq!(marker.as_number(), Some(7.0));
    }

    #[test]
    fn test_stashless_read_result_is_inert() {
        let (mut ctx, _slot) = armed_context();
        // Calling the forwarder with no stashed implementation must not throw
        let v = eval(&mut ctx, "var p = {}; p.$encode({}, {}) === undefined");
        assert_eq!(v.as_boolean(), Some(true));
    }

    #[test]
    fn test_first_capture_wins_across_rules() {
        let (mut ctx, slot) = armed_context();
        eval(
            &mut ctx,
            r#"
            var holder = {};
            holder.$encode = function(p, cb) {};
            function dispatch() {}
            dispatch.call('$encode', {}, {});
            "#,
        );
        assert_eq!(
            slot.registry().snapshot().unwrap().shape,
            CapabilityShape::Callable
        );
    }

    #[test]
    fn test_install_is_idempotent() {
        let mut ctx = Context::default();
        let slot = CaptureSlot::new(Arc::new(CaptureRegistry::new()));
        let mut interceptor = Interceptor::from_config(&CaptureConfig::default());
        interceptor.install(&mut ctx, &slot).unwrap();
        interceptor.install(&mut ctx, &slot).unwrap();

        eval(
            &mut ctx,
            "var h = {}; h.$encode = function(p, cb) { cb.suc(1); };",
        );
        assert_eq!(
            slot.registry().snapshot().unwrap().shape,
            CapabilityShape::Callable
        );
    }

    #[test]
    fn test_seize_after_capture_is_ignored() {
        let (mut ctx, slot) = armed_context();
        eval(&mut ctx, "var h = {}; h.$encode = function(p, cb) {};");
        let first = slot.raw().unwrap();
        slot.seize(JsValue::from(42), CapabilityShape::NamedMethod);
        assert_eq!(
            slot.registry().snapshot().unwrap().shape,
            CapabilityShape::Callable
        );
        assert!(slot.raw().unwrap().is_callable());
        drop(first);
    }
}
