//! Canvas analog with a real raster backend.
//!
//! Pixel-based fingerprint probes call `getContext('2d')`, draw, then read
//! the result back through `toDataURL`/`getImageData` — and bail out when
//! the context is null or the pixels are empty. The drawing surface here is
//! a real RGBA buffer, so reads return real, deterministic pixel data; it
//! makes no attempt at faithful text shaping.

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

use base64::Engine;
use boa_engine::object::builtins::JsArray;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsArgs, JsObject, JsResult, JsString, JsValue, NativeFunction};
use image::{ImageFormat, Rgba, RgbaImage};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Default surface size of a fresh canvas element.
const DEFAULT_WIDTH: u32 = 300;
const DEFAULT_HEIGHT: u32 = 150;

struct Surface {
    pixels: RgbaImage,
    fill: Rgba<u8>,
}

impl Surface {
    fn new() -> Self {
        Self {
            pixels: RgbaImage::new(DEFAULT_WIDTH, DEFAULT_HEIGHT),
            fill: Rgba([0, 0, 0, 255]),
        }
    }

    fn fill_rect(&mut self, x: i64, y: i64, w: i64, h: i64) {
        let (iw, ih) = (self.pixels.width() as i64, self.pixels.height() as i64);
        for py in y.max(0)..(y + h).min(ih) {
            for px in x.max(0)..(x + w).min(iw) {
                self.pixels.put_pixel(px as u32, py as u32, self.fill);
            }
        }
    }

    /// Stamps a deterministic per-byte pattern instead of shaped glyphs.
    /// Probes only care that text produces stable, non-blank pixels.
    fn fill_text(&mut self, text: &str, x: i64, y: i64) {
        let (iw, ih) = (self.pixels.width() as i64, self.pixels.height() as i64);
        if iw == 0 || ih == 0 {
            return;
        }
        for (i, byte) in text.bytes().enumerate() {
            let px = (x + (i as i64) * 3).rem_euclid(iw);
            let py = y.rem_euclid(ih);
            let Rgba([r, g, b, _]) = self.fill;
            let shade = Rgba([
                r.wrapping_add(byte),
                g.wrapping_add(byte.rotate_left(3)),
                b.wrapping_add(byte.rotate_left(6)),
                255,
            ]);
            self.pixels.put_pixel(px as u32, py as u32, shade);
            if py + 1 < ih {
                self.pixels.put_pixel(px as u32, (py + 1) as u32, shade);
            }
        }
    }

    fn png_data_url(&self) -> String {
        let mut bytes = Vec::new();
        let encoded = image::DynamicImage::ImageRgba8(self.pixels.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .is_ok();
        if !encoded {
            // A blank data URL still satisfies "non-null string" probes
            return "data:image/png;base64,".to_string();
        }
        format!("data:image/png;base64,{}", B64.encode(&bytes))
    }
}

/// Parses the handful of CSS color forms fingerprint code actually uses.
/// Unknown syntax falls back to opaque black.
fn parse_color(spec: &str) -> Rgba<u8> {
    let s = spec.trim();
    if let Some(hex) = s.strip_prefix('#') {
        let full = match hex.len() {
            3 => hex
                .chars()
                .flat_map(|c| [c, c])
                .collect::<String>(),
            6 => hex.to_string(),
            _ => return Rgba([0, 0, 0, 255]),
        };
        if let Ok(v) = u32::from_str_radix(&full, 16) {
            return Rgba([(v >> 16) as u8, (v >> 8) as u8, v as u8, 255]);
        }
        return Rgba([0, 0, 0, 255]);
    }
    if let Some(body) = s
        .strip_prefix("rgba(")
        .or_else(|| s.strip_prefix("rgb("))
        .and_then(|r| r.strip_suffix(')'))
    {
        let parts: Vec<&str> = body.split(',').map(str::trim).collect();
        if parts.len() >= 3 {
            let chan = |i: usize| parts[i].parse::<f64>().unwrap_or(0.0).clamp(0.0, 255.0) as u8;
            let alpha = parts
                .get(3)
                .and_then(|a| a.parse::<f64>().ok())
                .map(|a| (a.clamp(0.0, 1.0) * 255.0) as u8)
                .unwrap_or(255);
            return Rgba([chan(0), chan(1), chan(2), alpha]);
        }
    }
    Rgba([0, 0, 0, 255])
}

fn arg_i64(args: &[JsValue], idx: usize, ctx: &mut Context) -> JsResult<i64> {
    let n = args.get_or_undefined(idx).to_number(ctx)?;
    if n.is_finite() {
        Ok(n as i64)
    } else {
        Ok(0)
    }
}

/// Builds a canvas element analog: `width`/`height` and `getContext`.
/// Each element owns its own surface.
pub fn create_canvas_element(ctx: &mut Context) -> JsObject {
    let surface = Rc::new(RefCell::new(Surface::new()));

    let get_context = {
        let surface = surface.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let kind = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
                if kind == "2d" {
                    Ok(build_context_2d(ctx, surface.clone()).into())
                } else {
                    Ok(JsValue::null())
                }
            })
        }
    };

    let to_data_url = {
        let surface = surface.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, _args, _ctx| {
                Ok(JsValue::from(JsString::from(
                    surface.borrow().png_data_url(),
                )))
            })
        }
    };

    ObjectInitializer::new(ctx)
        .property(
            JsString::from("width"),
            JsValue::from(DEFAULT_WIDTH),
            Attribute::all(),
        )
        .property(
            JsString::from("height"),
            JsValue::from(DEFAULT_HEIGHT),
            Attribute::all(),
        )
        .function(get_context, JsString::from("getContext"), 1)
        .function(to_data_url, JsString::from("toDataURL"), 0)
        .build()
}

fn build_context_2d(ctx: &mut Context, surface: Rc<RefCell<Surface>>) -> JsObject {
    let fill_style_get = {
        let surface = surface.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, _args, _ctx| {
                let Rgba([r, g, b, _]) = surface.borrow().fill;
                Ok(JsValue::from(JsString::from(format!(
                    "#{r:02x}{g:02x}{b:02x}"
                ))))
            })
        }
    };
    let fill_style_set = {
        let surface = surface.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let spec = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
                surface.borrow_mut().fill = parse_color(&spec);
                Ok(JsValue::undefined())
            })
        }
    };

    let fill_rect = {
        let surface = surface.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let (x, y) = (arg_i64(args, 0, ctx)?, arg_i64(args, 1, ctx)?);
                let (w, h) = (arg_i64(args, 2, ctx)?, arg_i64(args, 3, ctx)?);
                surface.borrow_mut().fill_rect(x, y, w, h);
                Ok(JsValue::undefined())
            })
        }
    };

    let fill_text = {
        let surface = surface.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let text = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
                let (x, y) = (arg_i64(args, 1, ctx)?, arg_i64(args, 2, ctx)?);
                surface.borrow_mut().fill_text(&text, x, y);
                Ok(JsValue::undefined())
            })
        }
    };

    let measure_text = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let text = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
            let metrics = ObjectInitializer::new(ctx)
                .property(
                    JsString::from("width"),
                    JsValue::from((text.len() as u32) * 8),
                    Attribute::all(),
                )
                .build();
            Ok(metrics.into())
        })
    };

    let get_image_data = {
        let surface = surface.clone();
        unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let (x, y) = (arg_i64(args, 0, ctx)?, arg_i64(args, 1, ctx)?);
                let (w, h) = (
                    arg_i64(args, 2, ctx)?.max(0),
                    arg_i64(args, 3, ctx)?.max(0),
                );
                let surface = surface.borrow();
                let (iw, ih) = (
                    surface.pixels.width() as i64,
                    surface.pixels.height() as i64,
                );
                let mut data = Vec::with_capacity((w * h * 4) as usize);
                for py in y..y + h {
                    for px in x..x + w {
                        let Rgba(channels) = if (0..iw).contains(&px) && (0..ih).contains(&py) {
                            *surface.pixels.get_pixel(px as u32, py as u32)
                        } else {
                            Rgba([0, 0, 0, 0])
                        };
                        data.extend(channels.iter().map(|c| JsValue::from(u32::from(*c))));
                    }
                }
                let array = JsArray::from_iter(data, ctx);
                let image_data = ObjectInitializer::new(ctx)
                    .property(JsString::from("width"), JsValue::from(w as u32), Attribute::all())
                    .property(JsString::from("height"), JsValue::from(h as u32), Attribute::all())
                    .property(JsString::from("data"), array, Attribute::all())
                    .build();
                Ok(image_data.into())
            })
        }
    };

    let noop = || unsafe {
        NativeFunction::from_closure(move |_this, _args, _ctx| Ok(JsValue::undefined()))
    };

    let fill_style_getter = boa_engine::object::FunctionObjectBuilder::new(
        ctx.realm(),
        fill_style_get,
    )
    .name(JsString::from("fillStyle"))
    .length(0)
    .constructor(false)
    .build();
    let fill_style_setter = boa_engine::object::FunctionObjectBuilder::new(
        ctx.realm(),
        fill_style_set,
    )
    .name(JsString::from("fillStyle"))
    .length(1)
    .constructor(false)
    .build();

    ObjectInitializer::new(ctx)
        .accessor(
            JsString::from("fillStyle"),
            Some(fill_style_getter),
            Some(fill_style_setter),
            Attribute::all(),
        )
        .function(fill_rect, JsString::from("fillRect"), 4)
        .function(fill_text, JsString::from("fillText"), 3)
        .function(measure_text, JsString::from("measureText"), 1)
        .function(get_image_data, JsString::from("getImageData"), 4)
        .function(noop(), JsString::from("beginPath"), 0)
        .function(noop(), JsString::from("closePath"), 0)
        .function(noop(), JsString::from("moveTo"), 2)
        .function(noop(), JsString::from("lineTo"), 2)
        .function(noop(), JsString::from("arc"), 5)
        .function(noop(), JsString::from("rect"), 4)
        .function(noop(), JsString::from("stroke"), 0)
        .function(noop(), JsString::from("fill"), 0)
        .function(noop(), JsString::from("strokeRect"), 4)
        .function(noop(), JsString::from("save"), 0)
        .function(noop(), JsString::from("restore"), 0)
        .function(noop(), JsString::from("rotate"), 1)
        .function(noop(), JsString::from("translate"), 2)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;

    fn context_with_canvas() -> Context {
        let mut ctx = Context::default();
        let canvas = create_canvas_element(&mut ctx);
        ctx.register_global_property(JsString::from("canvas"), canvas, Attribute::all())
            .unwrap();
        ctx
    }

    fn eval(ctx: &mut Context, src: &str) -> JsValue {
        ctx.eval(Source::from_bytes(src.as_bytes())).unwrap()
    }

    #[test]
    fn test_get_context_2d_is_not_null() {
        let mut ctx = context_with_canvas();
        let v = eval(&mut ctx, "canvas.getContext('2d') !== null");
        assert_eq!(v.as_boolean(), Some(true));
    }

    #[test]
    fn test_get_context_other_kind_is_null() {
        let mut ctx = context_with_canvas();
        let v = eval(&mut ctx, "canvas.getContext('webgl') === null");
        assert_eq!(v.as_boolean(), Some(true));
    }

    #[test]
    fn test_to_data_url_is_png() {
        let mut ctx = context_with_canvas();
        let v = eval(&mut ctx, "canvas.toDataURL()");
        let s = v.as_string().unwrap().to_std_string_escaped();
        assert!(s.starts_with("data:image/png;base64,"));
        assert!(s.len() > "data:image/png;base64,".len());
    }

    #[test]
    fn test_fill_rect_changes_pixels() {
        let mut ctx = context_with_canvas();
        let v = eval(
            &mut ctx,
            r#"
            var g = canvas.getContext('2d');
            g.fillStyle = '#ff0000';
            g.fillRect(0, 0, 10, 10);
            g.getImageData(0, 0, 1, 1).data[0]
            "#,
        );
        assert_eq!(v.to_number(&mut ctx).unwrap() as u8, 255);
    }

    #[test]
    fn test_fill_text_is_deterministic() {
        let draw = |ctx: &mut Context| {
            eval(
                ctx,
                r#"
                var g = canvas.getContext('2d');
                g.fillText('fingerprint', 10, 10);
                canvas.toDataURL()
                "#,
            )
            .as_string()
            .unwrap()
            .to_std_string_escaped()
        };
        let a = draw(&mut context_with_canvas());
        let b = draw(&mut context_with_canvas());
        assert_eq!(a, b);
        // And drawing actually changed the surface
        let blank = eval(&mut context_with_canvas(), "canvas.toDataURL()")
            .as_string()
            .unwrap()
            .to_std_string_escaped();
        assert_ne!(a, blank);
    }

    #[test]
    fn test_parse_color_forms() {
        assert_eq!(parse_color("#fff"), Rgba([255, 255, 255, 255]));
        assert_eq!(parse_color("#102030"), Rgba([16, 32, 48, 255]));
        assert_eq!(parse_color("rgb(1, 2, 3)"), Rgba([1, 2, 3, 255]));
        assert_eq!(parse_color("rgba(1, 2, 3, 0)"), Rgba([1, 2, 3, 0]));
        assert_eq!(parse_color("chartreuse"), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_get_image_data_out_of_bounds_is_transparent() {
        let mut ctx = context_with_canvas();
        let v = eval(&mut ctx, "canvas.getContext('2d').getImageData(-1, -1, 1, 1).data[3]");
        assert_eq!(v.to_number(&mut ctx).unwrap() as u8, 0);
    }
}
