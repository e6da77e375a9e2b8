//! Emulated browser environment.
//!
//! Supplies just enough of a global object graph that the vendor bundle
//! runs to completion instead of crashing on missing browser primitives.
//! Nothing here is a correctness layer: every stub exists because some
//! revision of the bundle touched it during load. Values that make the
//! environment resemble a particular browser come from [`IdentityConfig`]
//! and are static configuration, not behavior.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use boa_engine::object::builtins::{JsArray, JsPromise};
use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::{Attribute, PropertyDescriptor};
use boa_engine::{Context, JsArgs, JsObject, JsResult, JsString, JsValue, NativeFunction};
use tracing::{debug, trace};
use url::Url;

use crate::config::Config;
use crate::engine::canvas;
use crate::error::SignError;

/// Passes over the deferred-job queue before giving up on convergence.
/// Callbacks may arm further callbacks; real bundles settle in two or three.
const MAX_DRAIN_PASSES: usize = 32;

/// Callbacks parked by the timer analogs (`setTimeout` and friends).
///
/// The engine has no event loop; parked callbacks run when the engine
/// host drains the queue — after bundle load and after each invocation,
/// never concurrently with either.
#[derive(Clone, Debug)]
pub struct DeferredQueue {
    jobs: Rc<RefCell<VecDeque<JsValue>>>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self {
            jobs: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    fn push(&self, callback: JsValue) {
        self.jobs.borrow_mut().push_back(callback);
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.borrow().is_empty()
    }

    /// Runs parked callbacks until the queue stays empty. Errors thrown by
    /// a callback are the bundle's own business and are swallowed.
    pub fn drain(&self, ctx: &mut Context) {
        for _ in 0..MAX_DRAIN_PASSES {
            let batch: Vec<JsValue> = self.jobs.borrow_mut().drain(..).collect();
            if batch.is_empty() {
                break;
            }
            for callback in batch {
                if let Some(f) = callback.as_callable() {
                    if let Err(e) = f.call(&JsValue::undefined(), &[], ctx) {
                        trace!("deferred callback threw: {e}");
                    }
                }
            }
            let _ = ctx.run_jobs();
        }
    }
}

/// Handles to the parts of the environment the engine host needs after
/// construction.
#[derive(Debug)]
pub struct Environment {
    pub deferred: DeferredQueue,
}

/// Builds the full global graph. Any failure here means the sandbox cannot
/// exist and startup must abort.
pub fn build(ctx: &mut Context, config: &Config) -> Result<Environment, SignError> {
    let base = Url::parse(&config.bundle.base_url)
        .map_err(|e| SignError::SandboxConstruction(format!("invalid base_url: {e}")))?;

    let deferred = DeferredQueue::new();

    install_self_refs(ctx).map_err(construction)?;
    install_location(ctx, &base).map_err(construction)?;
    install_document(ctx, config).map_err(construction)?;
    install_navigator(ctx, config).map_err(construction)?;
    install_screen(ctx, config).map_err(construction)?;
    install_storage(ctx).map_err(construction)?;
    install_history(ctx).map_err(construction)?;
    install_event_constructors(ctx).map_err(construction)?;
    install_element_constructors(ctx).map_err(construction)?;
    install_listener_noops(ctx).map_err(construction)?;
    install_timers(ctx, &deferred).map_err(construction)?;
    install_url_patch(ctx, &base).map_err(construction)?;
    install_module_preload_hook(ctx).map_err(construction)?;
    install_error_stack(ctx, &base).map_err(construction)?;
    install_console(ctx).map_err(construction)?;

    // The bundle branches on this before deciding to build its signer
    ctx.register_global_property(
        JsString::from("__USE_SSR__"),
        JsValue::from(false),
        Attribute::all(),
    )
    .map_err(construction)?;

    Ok(Environment { deferred })
}

fn construction(e: impl std::fmt::Display) -> SignError {
    SignError::SandboxConstruction(e.to_string())
}

fn noop() -> NativeFunction {
    unsafe { NativeFunction::from_closure(|_this, _args, _ctx| Ok(JsValue::undefined())) }
}

/// `window`, `self`, `top`, `parent` and `frames` all alias the global
/// object, so self-referencing chains like `window.top.window` resolve.
fn install_self_refs(ctx: &mut Context) -> JsResult<()> {
    let global = ctx.global_object();
    for name in ["window", "self", "top", "parent", "frames"] {
        ctx.register_global_property(
            JsString::from(name),
            JsValue::from(global.clone()),
            Attribute::all(),
        )?;
    }
    Ok(())
}

fn location_object(ctx: &mut Context, base: &Url) -> JsObject {
    let str_prop = |v: &str| JsValue::from(JsString::from(v));
    let href = base.as_str().to_string();
    let to_string = {
        let href = href.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, _args, _ctx| {
                Ok(JsValue::from(JsString::from(href.as_str())))
            })
        }
    };
    ObjectInitializer::new(ctx)
        .property(JsString::from("href"), str_prop(&href), Attribute::all())
        .property(
            JsString::from("origin"),
            str_prop(&base.origin().ascii_serialization()),
            Attribute::all(),
        )
        .property(
            JsString::from("protocol"),
            str_prop(&format!("{}:", base.scheme())),
            Attribute::all(),
        )
        .property(
            JsString::from("host"),
            str_prop(base.host_str().unwrap_or_default()),
            Attribute::all(),
        )
        .property(
            JsString::from("hostname"),
            str_prop(base.host_str().unwrap_or_default()),
            Attribute::all(),
        )
        .property(
            JsString::from("port"),
            str_prop(&base.port().map(|p| p.to_string()).unwrap_or_default()),
            Attribute::all(),
        )
        .property(JsString::from("pathname"), str_prop(base.path()), Attribute::all())
        .property(
            JsString::from("search"),
            str_prop(&base.query().map(|q| format!("?{q}")).unwrap_or_default()),
            Attribute::all(),
        )
        .property(
            JsString::from("hash"),
            str_prop(&base.fragment().map(|f| format!("#{f}")).unwrap_or_default()),
            Attribute::all(),
        )
        .function(to_string, JsString::from("toString"), 0)
        .function(noop(), JsString::from("reload"), 0)
        .function(noop(), JsString::from("replace"), 1)
        .function(noop(), JsString::from("assign"), 1)
        .build()
}

fn install_location(ctx: &mut Context, base: &Url) -> JsResult<()> {
    let location = location_object(ctx, base);
    ctx.register_global_property(JsString::from("location"), location, Attribute::all())
}

/// Generic inert element. Enough surface for append/attribute/listener
/// calls made while the bundle probes the page.
fn create_element_stub(ctx: &mut Context, tag: &str) -> JsObject {
    let style = ObjectInitializer::new(ctx).build();
    let append_child = unsafe {
        NativeFunction::from_closure(|_this, args, _ctx| Ok(args.get_or_undefined(0).clone()))
    };
    let get_attribute =
        unsafe { NativeFunction::from_closure(|_this, _args, _ctx| Ok(JsValue::null())) };
    ObjectInitializer::new(ctx)
        .property(
            JsString::from("tagName"),
            JsValue::from(JsString::from(tag.to_uppercase().as_str())),
            Attribute::all(),
        )
        .property(JsString::from("style"), style, Attribute::all())
        .property(
            JsString::from("innerHTML"),
            JsValue::from(JsString::from("")),
            Attribute::all(),
        )
        .function(append_child, JsString::from("appendChild"), 1)
        .function(noop(), JsString::from("removeChild"), 1)
        .function(noop(), JsString::from("setAttribute"), 2)
        .function(get_attribute, JsString::from("getAttribute"), 1)
        .function(noop(), JsString::from("addEventListener"), 2)
        .function(noop(), JsString::from("removeEventListener"), 2)
        .function(noop(), JsString::from("remove"), 0)
        .build()
}

fn install_document(ctx: &mut Context, config: &Config) -> JsResult<()> {
    let create_element = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let tag = args
                .get_or_undefined(0)
                .to_string(ctx)?
                .to_std_string_escaped()
                .to_lowercase();
            if tag == "canvas" {
                Ok(canvas::create_canvas_element(ctx).into())
            } else {
                Ok(create_element_stub(ctx, &tag).into())
            }
        })
    };

    // The page the bundle ships on has exactly one mount point, #app
    let get_element_by_id = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let id = args
                .get_or_undefined(0)
                .to_string(ctx)?
                .to_std_string_escaped();
            if id == "app" {
                Ok(create_element_stub(ctx, "div").into())
            } else {
                Ok(JsValue::null())
            }
        })
    };

    let query_selector =
        unsafe { NativeFunction::from_closure(|_this, _args, _ctx| Ok(JsValue::null())) };

    let body = create_element_stub(ctx, "body");
    let document_element = create_element_stub(ctx, "html");
    let head = create_element_stub(ctx, "head");

    let document = ObjectInitializer::new(ctx)
        .property(
            JsString::from("referrer"),
            JsValue::from(JsString::from(config.bundle.referrer.as_str())),
            Attribute::all(),
        )
        .property(
            JsString::from("cookie"),
            JsValue::from(JsString::from("")),
            Attribute::all(),
        )
        .property(
            JsString::from("hidden"),
            JsValue::from(false),
            Attribute::all(),
        )
        .property(
            JsString::from("visibilityState"),
            JsValue::from(JsString::from("visible")),
            Attribute::all(),
        )
        .property(JsString::from("body"), body, Attribute::all())
        .property(JsString::from("head"), head, Attribute::all())
        .property(
            JsString::from("documentElement"),
            document_element,
            Attribute::all(),
        )
        .function(create_element, JsString::from("createElement"), 1)
        .function(get_element_by_id, JsString::from("getElementById"), 1)
        .function(query_selector, JsString::from("querySelector"), 1)
        .function(noop(), JsString::from("addEventListener"), 2)
        .function(noop(), JsString::from("removeEventListener"), 2)
        .function(noop(), JsString::from("dispatchEvent"), 1)
        .build();

    ctx.register_global_property(JsString::from("document"), document, Attribute::all())
}

fn install_navigator(ctx: &mut Context, config: &Config) -> JsResult<()> {
    let identity = &config.identity;

    let languages = JsArray::from_iter(
        identity
            .languages
            .iter()
            .map(|l| JsValue::from(JsString::from(l.as_str()))),
        ctx,
    );

    // Array-like plugin surrogate: headless engines report 0 plugins,
    // which such bundles read as an automation signal
    let plugins: Vec<JsValue> = (0..identity.plugin_count)
        .map(|_| {
            ObjectInitializer::new(ctx)
                .property(
                    JsString::from("name"),
                    JsValue::from(JsString::from("PlugIn")),
                    Attribute::all(),
                )
                .build()
                .into()
        })
        .collect();
    let plugins = JsArray::from_iter(plugins, ctx);

    let language = identity
        .languages
        .first()
        .cloned()
        .unwrap_or_else(|| "en-US".to_string());

    let navigator = ObjectInitializer::new(ctx)
        .property(
            JsString::from("userAgent"),
            JsValue::from(JsString::from(identity.user_agent.as_str())),
            Attribute::all(),
        )
        .property(
            JsString::from("platform"),
            JsValue::from(JsString::from(identity.platform.as_str())),
            Attribute::all(),
        )
        .property(JsString::from("languages"), languages, Attribute::all())
        .property(
            JsString::from("language"),
            JsValue::from(JsString::from(language.as_str())),
            Attribute::all(),
        )
        .property(JsString::from("plugins"), plugins, Attribute::all())
        .property(
            JsString::from("webdriver"),
            JsValue::from(false),
            Attribute::all(),
        )
        .property(
            JsString::from("cookieEnabled"),
            JsValue::from(true),
            Attribute::all(),
        )
        .build();

    ctx.register_global_property(JsString::from("navigator"), navigator, Attribute::all())
}

fn install_screen(ctx: &mut Context, config: &Config) -> JsResult<()> {
    let s = &config.identity.screen;
    let screen = ObjectInitializer::new(ctx)
        .property(JsString::from("width"), JsValue::from(s.width), Attribute::all())
        .property(JsString::from("height"), JsValue::from(s.height), Attribute::all())
        .property(
            JsString::from("availWidth"),
            JsValue::from(s.avail_width),
            Attribute::all(),
        )
        .property(
            JsString::from("availHeight"),
            JsValue::from(s.avail_height),
            Attribute::all(),
        )
        .property(
            JsString::from("colorDepth"),
            JsValue::from(s.color_depth),
            Attribute::all(),
        )
        .property(
            JsString::from("pixelDepth"),
            JsValue::from(s.color_depth),
            Attribute::all(),
        )
        .build();
    ctx.register_global_property(JsString::from("screen"), screen, Attribute::all())
}

fn storage_object(ctx: &mut Context) -> JsObject {
    let store: Rc<RefCell<HashMap<String, String>>> = Rc::new(RefCell::new(HashMap::new()));

    let get_item = {
        let store = store.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let key = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
                Ok(store
                    .borrow()
                    .get(&key)
                    .map(|v| JsValue::from(JsString::from(v.as_str())))
                    .unwrap_or(JsValue::null()))
            })
        }
    };
    let set_item = {
        let store = store.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let key = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
                let value = args.get_or_undefined(1).to_string(ctx)?.to_std_string_escaped();
                store.borrow_mut().insert(key, value);
                Ok(JsValue::undefined())
            })
        }
    };
    let remove_item = {
        let store = store.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let key = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
                store.borrow_mut().remove(&key);
                Ok(JsValue::undefined())
            })
        }
    };
    let clear = {
        let store = store.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, _args, _ctx| {
                store.borrow_mut().clear();
                Ok(JsValue::undefined())
            })
        }
    };

    ObjectInitializer::new(ctx)
        .function(get_item, JsString::from("getItem"), 1)
        .function(set_item, JsString::from("setItem"), 2)
        .function(remove_item, JsString::from("removeItem"), 1)
        .function(clear, JsString::from("clear"), 0)
        .build()
}

fn install_storage(ctx: &mut Context) -> JsResult<()> {
    // Separate backing maps, matching real session/local separation
    let local = storage_object(ctx);
    let session = storage_object(ctx);
    ctx.register_global_property(JsString::from("localStorage"), local, Attribute::all())?;
    ctx.register_global_property(JsString::from("sessionStorage"), session, Attribute::all())
}

fn install_history(ctx: &mut Context) -> JsResult<()> {
    let history = ObjectInitializer::new(ctx)
        .property(JsString::from("length"), JsValue::from(1), Attribute::all())
        .property(JsString::from("state"), JsValue::null(), Attribute::all())
        .function(noop(), JsString::from("back"), 0)
        .function(noop(), JsString::from("forward"), 0)
        .function(noop(), JsString::from("go"), 1)
        .function(noop(), JsString::from("pushState"), 3)
        .function(noop(), JsString::from("replaceState"), 3)
        .build();
    ctx.register_global_property(JsString::from("history"), history, Attribute::all())
}

/// Registers a constructible native under `name`. The constructor ignores
/// its receiver and returns a fresh object, which covers both `new X()`
/// and plain calls.
fn register_constructor(
    ctx: &mut Context,
    name: &str,
    build: impl Fn(&[JsValue], &mut Context) -> JsResult<JsObject> + 'static,
) -> JsResult<()> {
    let native = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| Ok(build(args, ctx)?.into()))
    };
    let function = FunctionObjectBuilder::new(ctx.realm(), native)
        .name(JsString::from(name))
        .length(1)
        .constructor(true)
        .build();
    ctx.register_global_property(JsString::from(name), function, Attribute::all())
}

fn install_event_constructors(ctx: &mut Context) -> JsResult<()> {
    for name in ["Event", "CustomEvent", "MessageEvent"] {
        register_constructor(ctx, name, |args, ctx| {
            let kind = args.get_or_undefined(0).to_string(ctx)?;
            let detail = args
                .get_or_undefined(1)
                .as_object()
                .map(|init| init.get(JsString::from("detail"), ctx))
                .transpose()?
                .unwrap_or(JsValue::undefined());
            Ok(ObjectInitializer::new(ctx)
                .property(JsString::from("type"), kind, Attribute::all())
                .property(JsString::from("detail"), detail, Attribute::all())
                .function(noop(), JsString::from("preventDefault"), 0)
                .function(noop(), JsString::from("stopPropagation"), 0)
                .build())
        })?;
    }
    Ok(())
}

fn install_element_constructors(ctx: &mut Context) -> JsResult<()> {
    register_constructor(ctx, "Image", |_args, ctx| {
        Ok(ObjectInitializer::new(ctx)
            .property(JsString::from("src"), JsValue::from(JsString::from("")), Attribute::all())
            .property(JsString::from("width"), JsValue::from(0), Attribute::all())
            .property(JsString::from("height"), JsValue::from(0), Attribute::all())
            .property(JsString::from("onload"), JsValue::null(), Attribute::all())
            .function(noop(), JsString::from("addEventListener"), 2)
            .build())
    })?;

    register_constructor(ctx, "MutationObserver", |_args, ctx| {
        let take_records = unsafe {
            NativeFunction::from_closure(|_this, _args, ctx| Ok(JsArray::new(ctx).into()))
        };
        Ok(ObjectInitializer::new(ctx)
            .function(noop(), JsString::from("observe"), 2)
            .function(noop(), JsString::from("disconnect"), 0)
            .function(take_records, JsString::from("takeRecords"), 0)
            .build())
    })?;

    register_constructor(ctx, "XMLHttpRequest", |_args, ctx| {
        Ok(ObjectInitializer::new(ctx)
            .property(JsString::from("readyState"), JsValue::from(0), Attribute::all())
            .property(JsString::from("status"), JsValue::from(0), Attribute::all())
            .property(
                JsString::from("responseText"),
                JsValue::from(JsString::from("")),
                Attribute::all(),
            )
            .function(noop(), JsString::from("open"), 2)
            .function(noop(), JsString::from("send"), 1)
            .function(noop(), JsString::from("setRequestHeader"), 2)
            .function(noop(), JsString::from("abort"), 0)
            .function(noop(), JsString::from("addEventListener"), 2)
            .build())
    })
}

fn install_listener_noops(ctx: &mut Context) -> JsResult<()> {
    for name in ["addEventListener", "removeEventListener", "dispatchEvent"] {
        ctx.register_global_builtin_callable(JsString::from(name), 2, noop())?;
    }
    Ok(())
}

fn install_timers(ctx: &mut Context, deferred: &DeferredQueue) -> JsResult<()> {
    let next_id = Rc::new(Cell::new(1i32));

    for name in [
        "setTimeout",
        "setInterval",
        "requestAnimationFrame",
        "queueMicrotask",
    ] {
        let deferred = deferred.clone();
        let next_id = next_id.clone();
        let park = unsafe {
            NativeFunction::from_closure(move |_this, args, _ctx| {
                let callback = args.get_or_undefined(0).clone();
                if callback.is_callable() {
                    deferred.push(callback);
                }
                let id = next_id.get();
                next_id.set(id.wrapping_add(1));
                Ok(JsValue::from(id))
            })
        };
        ctx.register_global_builtin_callable(JsString::from(name), 1, park)?;
    }

    for name in ["clearTimeout", "clearInterval", "cancelAnimationFrame"] {
        ctx.register_global_builtin_callable(JsString::from(name), 1, noop())?;
    }
    Ok(())
}

/// `URL` analog that resolves relative inputs against the page base
/// instead of throwing. The bundle builds request URLs from bare paths.
fn install_url_patch(ctx: &mut Context, base: &Url) -> JsResult<()> {
    let base = base.clone();
    register_constructor(ctx, "URL", move |args, ctx| {
        let input = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
        let explicit_base = args
            .get_or_undefined(1)
            .as_string()
            .map(|s| s.to_std_string_escaped());

        let resolved = match &explicit_base {
            Some(b) => Url::parse(b).and_then(|b| b.join(&input)),
            None => Url::parse(&input),
        };
        let resolved = resolved
            .or_else(|_| base.join(input.trim_start_matches("./")))
            .unwrap_or_else(|_| base.clone());

        let href = resolved.as_str().to_string();
        let to_string = {
            let href = href.clone();
            unsafe {
                NativeFunction::from_closure(move |_this, _args, _ctx| {
                    Ok(JsValue::from(JsString::from(href.as_str())))
                })
            }
        };
        let str_prop = |v: &str| JsValue::from(JsString::from(v));
        Ok(ObjectInitializer::new(ctx)
            .property(JsString::from("href"), str_prop(&href), Attribute::all())
            .property(
                JsString::from("origin"),
                str_prop(&resolved.origin().ascii_serialization()),
                Attribute::all(),
            )
            .property(
                JsString::from("protocol"),
                str_prop(&format!("{}:", resolved.scheme())),
                Attribute::all(),
            )
            .property(
                JsString::from("host"),
                str_prop(resolved.host_str().unwrap_or_default()),
                Attribute::all(),
            )
            .property(
                JsString::from("hostname"),
                str_prop(resolved.host_str().unwrap_or_default()),
                Attribute::all(),
            )
            .property(JsString::from("pathname"), str_prop(resolved.path()), Attribute::all())
            .property(
                JsString::from("search"),
                str_prop(&resolved.query().map(|q| format!("?{q}")).unwrap_or_default()),
                Attribute::all(),
            )
            .property(
                JsString::from("hash"),
                str_prop(&resolved.fragment().map(|f| format!("#{f}")).unwrap_or_default()),
                Attribute::all(),
            )
            .function(to_string, JsString::from("toString"), 0)
            .build())
    })
}

/// Bundler-emitted preload hook. Resolving immediately with an empty
/// module keeps the bundle from stalling on an import that can never
/// complete here.
fn install_module_preload_hook(ctx: &mut Context) -> JsResult<()> {
    let preload = unsafe {
        NativeFunction::from_closure(|_this, args, ctx| {
            debug!(
                "intercepted module preload ({} deps)",
                args.get(1)
                    .and_then(JsValue::as_object)
                    .and_then(|deps| deps.get(JsString::from("length"), ctx).ok())
                    .and_then(|l| l.as_number())
                    .unwrap_or(0.0)
            );
            let empty = ObjectInitializer::new(ctx).build();
            Ok(JsPromise::resolve(empty, ctx).into())
        })
    };
    ctx.register_global_builtin_callable(JsString::from("__vitePreload"), 3, preload)
}

/// The engine exposes no `Error.stack`; bundles probe it for automation
/// tells. Serve a stable, browser-shaped stack derived from the page
/// origin on every error object.
fn install_error_stack(ctx: &mut Context, base: &Url) -> JsResult<()> {
    let origin = base.origin().ascii_serialization();
    let stack = format!(
        "Error\n    at p.call ({origin}/assets/core.js:1:1024)\n    \
         at getSig4 ({origin}/assets/core.js:1:2048)\n    \
         at Object.main ({origin}/assets/core.js:1:512)"
    );

    let getter = {
        let stack = stack.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, _args, _ctx| {
                Ok(JsValue::from(JsString::from(stack.as_str())))
            })
        }
    };
    let getter = FunctionObjectBuilder::new(ctx.realm(), getter)
        .name(JsString::from("stack"))
        .length(0)
        .constructor(false)
        .build();
    // Writes are accepted and dropped; the fake stack stays authoritative
    let setter = FunctionObjectBuilder::new(ctx.realm(), noop())
        .name(JsString::from("stack"))
        .length(1)
        .constructor(false)
        .build();

    let error_proto = ctx.intrinsics().constructors().error().prototype();
    error_proto.define_property_or_throw(
        JsString::from("stack"),
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

/// Routes the bundle's console traffic into the harness log stream.
fn install_console(ctx: &mut Context) -> JsResult<()> {
    let make_sink = |level: &'static str| unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let mut parts = Vec::with_capacity(args.len());
            for arg in args {
                parts.push(arg.to_string(ctx)?.to_std_string_escaped());
            }
            let line = parts.join(" ");
            match level {
                "error" | "warn" => debug!(target: "hxsign::sandbox", "console.{level}: {line}"),
                _ => trace!(target: "hxsign::sandbox", "console.{level}: {line}"),
            }
            Ok(JsValue::undefined())
        })
    };

    let console = ObjectInitializer::new(ctx)
        .function(make_sink("log"), JsString::from("log"), 1)
        .function(make_sink("info"), JsString::from("info"), 1)
        .function(make_sink("warn"), JsString::from("warn"), 1)
        .function(make_sink("error"), JsString::from("error"), 1)
        .function(make_sink("debug"), JsString::from("debug"), 1)
        .build();
    ctx.register_global_property(JsString::from("console"), console, Attribute::all())
}
