use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tiny_skia::{
    FillRule, FilterQuality, IntRect, Mask, Path, PathBuilder, Pixmap, PixmapPaint, Transform,
};
use tracing::debug;

use crate::embed::{DEFAULT_MAX_PIXELS, decode_source};
use crate::error::{PressProofError, Result};
use crate::geometry::apply_orientation;
use crate::types::Color;

// Axis-aligned rectangle in canvas pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PxRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PxRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    #[default]
    Cover,
    // Fits inside the placement box; the background shows through.
    Contain,
}

// The padding box is the logical layout frame; the placement box positions
// the artwork relative to it and may extend past the canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionSpec {
    pub canvas_width_px: u32,
    pub canvas_height_px: u32,
    pub pad: PxRect,
    pub place: PxRect,
    pub corner_radius_px: f32,
    pub rotate_deg: f32,
    pub fit: FitMode,
    pub bleed_mm: f32,
    pub width_cm: f32,
    pub height_cm: f32,
    pub background: Color,
}

impl Default for CompositionSpec {
    fn default() -> Self {
        Self {
            canvas_width_px: 1080,
            canvas_height_px: 1080,
            pad: PxRect::new(0.0, 0.0, 1080.0, 1080.0),
            place: PxRect::new(0.0, 0.0, 1080.0, 1080.0),
            corner_radius_px: 0.0,
            rotate_deg: 0.0,
            fit: FitMode::Cover,
            bleed_mm: 0.0,
            width_cm: 10.0,
            height_cm: 10.0,
            background: Color::WHITE,
        }
    }
}

// Attached to invalid_bbox failures and returned with successes.
#[derive(Debug, Clone, Serialize)]
pub struct ComposeDebug {
    pub canvas_width_px: u32,
    pub canvas_height_px: u32,
    pub width_cm: f32,
    pub height_cm: f32,
    pub bleed_mm: f32,
    pub px_per_mm: f32,
    pub bleed_px: i32,
    pub inner: PxRect,
    pub scale: f32,
    pub place_scaled: PxRect,
    pub artwork_width_px: u32,
    pub artwork_height_px: u32,
    pub draw: PxRect,
    pub rotate_deg: f32,
    pub clip_x: f32,
    pub clip_y: f32,
    pub clip_w: f32,
    pub clip_h: f32,
    pub radius_scaled: f32,
    pub fit: FitMode,
}

#[derive(Debug)]
pub struct ComposeResult {
    // Bleed-inclusive canvas, PNG-encoded.
    pub print_png: Vec<u8>,
    // The same canvas inset by the bleed, PNG-encoded.
    pub inner_png: Vec<u8>,
    pub debug: ComposeDebug,
}

// Artwork reaching past the canvas is cropped, never stretched.
pub fn compose_artwork(spec: &CompositionSpec, artwork: &[u8]) -> Result<ComposeResult> {
    for (field, value) in [
        ("canvas_width_px", spec.canvas_width_px as f32),
        ("canvas_height_px", spec.canvas_height_px as f32),
        ("width_cm", spec.width_cm),
        ("height_cm", spec.height_cm),
        ("pad_width_px", spec.pad.width),
        ("pad_height_px", spec.pad.height),
        ("place_width_px", spec.place.width),
        ("place_height_px", spec.place.height),
    ] {
        if value <= 0.0 || !value.is_finite() {
            return Err(PressProofError::InvalidDimension { field, value });
        }
    }
    if spec.bleed_mm < 0.0 || !spec.bleed_mm.is_finite() {
        return Err(PressProofError::InvalidDimension {
            field: "bleed_mm",
            value: spec.bleed_mm,
        });
    }

    let source = decode_source(artwork, DEFAULT_MAX_PIXELS)?;
    let artwork_img = apply_orientation(source.image, source.exif_orientation);
    let (art_w, art_h) = (artwork_img.width(), artwork_img.height());

    let canvas_w = spec.canvas_width_px as f32;
    let canvas_h = spec.canvas_height_px as f32;
    let px_per_mm = canvas_w / (spec.width_cm * 10.0 + 2.0 * spec.bleed_mm);
    let bleed_px = (spec.bleed_mm * px_per_mm).round() as i32;
    let inner = PxRect::new(
        bleed_px as f32,
        bleed_px as f32,
        canvas_w - 2.0 * bleed_px as f32,
        canvas_h - 2.0 * bleed_px as f32,
    );

    let scale = (inner.width / spec.pad.width).min(inner.height / spec.pad.height);
    // The padding box lands centered in the inner box at uniform scale; the
    // placement box rides the same affine.
    let offset_x = inner.x + (inner.width - spec.pad.width * scale) / 2.0 - spec.pad.x * scale;
    let offset_y = inner.y + (inner.height - spec.pad.height * scale) / 2.0 - spec.pad.y * scale;
    let place_scaled = PxRect::new(
        offset_x + spec.place.x * scale,
        offset_y + spec.place.y * scale,
        spec.place.width * scale,
        spec.place.height * scale,
    );

    let fit_scale = {
        let sx = place_scaled.width / art_w as f32;
        let sy = place_scaled.height / art_h as f32;
        match spec.fit {
            FitMode::Cover => sx.max(sy),
            FitMode::Contain => sx.min(sy),
        }
    };
    let draw_w = art_w as f32 * fit_scale;
    let draw_h = art_h as f32 * fit_scale;
    let draw = PxRect::new(
        place_scaled.x + (place_scaled.width - draw_w) / 2.0,
        place_scaled.y + (place_scaled.height - draw_h) / 2.0,
        draw_w,
        draw_h,
    );

    let center_x = place_scaled.x + place_scaled.width / 2.0;
    let center_y = place_scaled.y + place_scaled.height / 2.0;
    let rotation = rotate_about(spec.rotate_deg, center_x, center_y);
    let (clip_x, clip_y, clip_w, clip_h) =
        clipped_extent(&place_scaled, rotation, canvas_w, canvas_h);

    let radius_scaled = (spec.corner_radius_px * scale).round() + bleed_px as f32;

    let state = ComposeDebug {
        canvas_width_px: spec.canvas_width_px,
        canvas_height_px: spec.canvas_height_px,
        width_cm: spec.width_cm,
        height_cm: spec.height_cm,
        bleed_mm: spec.bleed_mm,
        px_per_mm,
        bleed_px,
        inner,
        scale,
        place_scaled,
        artwork_width_px: art_w,
        artwork_height_px: art_h,
        draw,
        rotate_deg: spec.rotate_deg,
        clip_x,
        clip_y,
        clip_w,
        clip_h,
        radius_scaled,
        fit: spec.fit,
    };

    if inner.width <= 0.0 || inner.height <= 0.0 || clip_w <= 0.0 || clip_h <= 0.0 {
        return Err(PressProofError::InvalidBbox {
            debug: debug_json(&state),
        });
    }

    let mut pixmap = Pixmap::new(spec.canvas_width_px, spec.canvas_height_px).ok_or(
        PressProofError::InvalidDimension {
            field: "canvas_px",
            value: canvas_w,
        },
    )?;
    let [r, g, b] = spec.background.to_rgb8();
    pixmap.fill(tiny_skia::Color::from_rgba8(r, g, b, 255));

    // Mask box is the placement box grown by the bleed so the rounding sits
    // outside the trimmed area.
    let mask_box = PxRect::new(
        place_scaled.x - bleed_px as f32,
        place_scaled.y - bleed_px as f32,
        place_scaled.width + 2.0 * bleed_px as f32,
        place_scaled.height + 2.0 * bleed_px as f32,
    );
    let clip_mask = rounded_mask(
        spec.canvas_width_px,
        spec.canvas_height_px,
        &mask_box,
        radius_scaled,
        rotation,
    );

    let art_pixmap = image_to_pixmap(&artwork_img).ok_or_else(|| {
        PressProofError::InvalidImageBuffer("artwork raster allocation failed".to_string())
    })?;
    let place_ts = rotation.pre_concat(Transform::from_row(
        draw.width / art_w as f32,
        0.0,
        0.0,
        draw.height / art_h as f32,
        draw.x,
        draw.y,
    ));
    let mut paint = PixmapPaint::default();
    paint.quality = FilterQuality::Bilinear;
    pixmap.draw_pixmap(0, 0, art_pixmap.as_ref(), &paint, place_ts, clip_mask.as_ref());

    let print_png = encode_png(&pixmap)?;
    let inner_rect = IntRect::from_xywh(
        bleed_px,
        bleed_px,
        (inner.width.round() as u32).max(1),
        (inner.height.round() as u32).max(1),
    )
    .ok_or_else(|| PressProofError::InvalidBbox {
        debug: debug_json(&state),
    })?;
    let inner_pixmap = pixmap
        .clone_rect(inner_rect)
        .ok_or_else(|| PressProofError::InvalidBbox {
            debug: debug_json(&state),
        })?;
    let inner_png = encode_png(&inner_pixmap)?;

    debug!(
        px_per_mm,
        scale,
        clip_w,
        clip_h,
        rotate = spec.rotate_deg,
        "composed artwork"
    );

    Ok(ComposeResult {
        print_png,
        inner_png,
        debug: state,
    })
}

fn encode_png(pixmap: &Pixmap) -> Result<Vec<u8>> {
    pixmap
        .encode_png()
        .map_err(|e| std::io::Error::other(e).into())
}

fn debug_json(debug: &ComposeDebug) -> serde_json::Value {
    serde_json::to_value(debug).unwrap_or(serde_json::Value::Null)
}

fn rotate_about(deg: f32, cx: f32, cy: f32) -> Transform {
    let rad = deg.to_radians();
    let s = libm::sinf(rad);
    let c = libm::cosf(rad);
    Transform::from_row(c, s, -s, c, cx - c * cx + s * cy, cy - s * cx - c * cy)
}

fn map_point(ts: Transform, x: f32, y: f32) -> (f32, f32) {
    (
        ts.sx * x + ts.kx * y + ts.tx,
        ts.ky * x + ts.sy * y + ts.ty,
    )
}

// Axis-aligned extent of the rotated rectangle intersected with the canvas.
// Width or height going non-positive means nothing would be visible.
fn clipped_extent(
    rect: &PxRect,
    ts: Transform,
    canvas_w: f32,
    canvas_h: f32,
) -> (f32, f32, f32, f32) {
    let corners = [
        (rect.x, rect.y),
        (rect.x + rect.width, rect.y),
        (rect.x + rect.width, rect.y + rect.height),
        (rect.x, rect.y + rect.height),
    ];
    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    for (x, y) in corners {
        let (px, py) = map_point(ts, x, y);
        min_x = min_x.min(px);
        min_y = min_y.min(py);
        max_x = max_x.max(px);
        max_y = max_y.max(py);
    }
    let x0 = min_x.max(0.0);
    let y0 = min_y.max(0.0);
    let x1 = max_x.min(canvas_w);
    let y1 = max_y.min(canvas_h);
    (x0, y0, x1 - x0, y1 - y0)
}

fn rounded_mask(width: u32, height: u32, rect: &PxRect, radius: f32, ts: Transform) -> Option<Mask> {
    let path = rounded_rect_path(rect, radius)?;
    let mut mask = Mask::new(width, height)?;
    mask.fill_path(&path, FillRule::Winding, true, ts);
    Some(mask)
}

fn rounded_rect_path(rect: &PxRect, radius: f32) -> Option<Path> {
    let r = radius
        .max(0.0)
        .min(rect.width / 2.0)
        .min(rect.height / 2.0);
    if r <= 0.0 {
        let rc = tiny_skia::Rect::from_xywh(rect.x, rect.y, rect.width, rect.height)?;
        return Some(PathBuilder::from_rect(rc));
    }
    // Circular-arc corners as cubics with the usual kappa control offset.
    const K: f32 = 0.552_284_75;
    let k = r * K;
    let x0 = rect.x;
    let y0 = rect.y;
    let x1 = rect.x + rect.width;
    let y1 = rect.y + rect.height;
    let mut pb = PathBuilder::new();
    pb.move_to(x0 + r, y0);
    pb.line_to(x1 - r, y0);
    pb.cubic_to(x1 - r + k, y0, x1, y0 + r - k, x1, y0 + r);
    pb.line_to(x1, y1 - r);
    pb.cubic_to(x1, y1 - r + k, x1 - r + k, y1, x1 - r, y1);
    pb.line_to(x0 + r, y1);
    pb.cubic_to(x0 + r - k, y1, x0, y1 - r + k, x0, y1 - r);
    pb.line_to(x0, y0 + r);
    pb.cubic_to(x0, y0 + r - k, x0 + r - k, y0, x0 + r, y0);
    pb.close();
    pb.finish()
}

// Decoded pixels to a premultiplied pixmap, ready for tiny-skia drawing.
pub(crate) fn image_to_pixmap(image: &DynamicImage) -> Option<Pixmap> {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    let src = rgba.as_raw();
    let dst = pixmap.data_mut();
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}
