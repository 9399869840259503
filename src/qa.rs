use image::DynamicImage;
use image::imageops::FilterType;
use lopdf::{Document as LoDocument, Object as LoObject};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tiny_skia::{FilterQuality, Pixmap, PixmapPaint, Transform};
use tracing::debug;

use crate::compose::image_to_pixmap;
use crate::error::{PressProofError, Result};
use crate::geometry::{PageGeometry, apply_orientation};
use crate::types::Color;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaOptions {
    pub min_psnr: f64,
    pub min_ssim: f64,
    // Caps the compare-canvas area so huge pages stay cheap to check.
    pub max_compare_pixels: u64,
}

impl Default for QaOptions {
    fn default() -> Self {
        Self {
            min_psnr: 45.0,
            min_ssim: 0.99,
            max_compare_pixels: 4_000_000,
        }
    }
}

// Only ever observed with passed == true; failing documents abort instead.
#[derive(Debug, Clone, Serialize)]
pub struct QaReport {
    pub psnr: f64,
    pub ssim: Option<f64>,
    pub jpeg_stream_match: Option<bool>,
    pub compare_width: u32,
    pub compare_height: u32,
    pub compare_ppi: f32,
    pub passed: bool,
}

pub(crate) struct QaInput<'a> {
    pub source_image: &'a DynamicImage,
    pub source_bytes: &'a [u8],
    // Container bytes of the rendition that went into the page.
    pub rendition_bytes: &'a [u8],
    pub exif: u8,
    pub geometry: &'a PageGeometry,
    pub background: Color,
    pub pdf_bytes: &'a [u8],
    pub expected_stream_sha: [u8; 32],
    pub jpeg_verbatim: bool,
}

// For verbatim JPEG embeds a byte-identical stream is the whole proof;
// everything else renders the page twice and scores the two rasters.
pub(crate) fn verify(input: &QaInput<'_>, options: &QaOptions) -> Result<QaReport> {
    let extracted = extract_embedded_stream(input.pdf_bytes)?;
    let extracted_sha: [u8; 32] = Sha256::digest(&extracted).into();

    if input.jpeg_verbatim {
        let source_sha: [u8; 32] = Sha256::digest(input.source_bytes).into();
        if extracted_sha != source_sha {
            return Err(PressProofError::JpegStreamMismatch);
        }
        debug!("jpeg stream verbatim, raster comparison skipped");
        return Ok(QaReport {
            psnr: f64::INFINITY,
            ssim: None,
            jpeg_stream_match: Some(true),
            compare_width: 0,
            compare_height: 0,
            compare_ppi: 0.0,
            passed: true,
        });
    }

    if extracted_sha != input.expected_stream_sha {
        return Err(PressProofError::PdfParseFailed(
            "embedded image stream does not match the prepared rendition".to_string(),
        ));
    }

    let rendition = image::load_from_memory(input.rendition_bytes)
        .map_err(|e| PressProofError::InvalidImageBuffer(e.to_string()))?;

    let layout = CompareLayout::for_page(
        input.geometry,
        effective_px(input.source_image, input.exif),
        options.max_compare_pixels,
    );
    let raster_a = compose_page_raster(input.source_image, input.exif, input.background, &layout)?;
    let raster_b = compose_page_raster(&rendition, input.exif, input.background, &layout)?;

    let psnr = psnr(&raster_a, &raster_b);
    let ssim = ssim(&raster_a, &raster_b);
    debug!(
        psnr,
        ssim = ?ssim,
        width = layout.canvas_w,
        height = layout.canvas_h,
        ppi = layout.density,
        "raster comparison scored"
    );

    let psnr_ok = psnr.is_infinite() || psnr >= options.min_psnr;
    let ssim_ok = ssim.map_or(true, |s| s >= options.min_ssim);
    if !psnr_ok || !ssim_ok {
        return Err(PressProofError::QaCheckFailed { psnr, ssim });
    }

    Ok(QaReport {
        psnr,
        ssim,
        jpeg_stream_match: None,
        compare_width: layout.canvas_w,
        compare_height: layout.canvas_h,
        compare_ppi: layout.density,
        passed: true,
    })
}

fn effective_px(image: &DynamicImage, exif: u8) -> (u32, u32) {
    if (5..=8).contains(&exif) {
        (image.height(), image.width())
    } else {
        (image.width(), image.height())
    }
}

struct CompareLayout {
    canvas_w: u32,
    canvas_h: u32,
    box_x: f32,
    box_y: f32,
    box_w: u32,
    box_h: u32,
    density: f32,
}

impl CompareLayout {
    // The page at the artwork's own density, clamped to the pixel budget.
    fn for_page(geometry: &PageGeometry, effective_px: (u32, u32), max_pixels: u64) -> Self {
        let page_w_in = geometry.page_width_pt.to_inches().max(f32::EPSILON);
        let page_h_in = geometry.page_height_pt.to_inches().max(f32::EPSILON);
        let image_w_in = geometry.image_width_pt.to_inches().max(f32::EPSILON);
        let image_h_in = geometry.image_height_pt.to_inches().max(f32::EPSILON);

        let native = (effective_px.0 as f32 / image_w_in)
            .max(effective_px.1 as f32 / image_h_in)
            .max(1.0);
        let budget = ((max_pixels.max(1) as f32) / (page_w_in * page_h_in)).sqrt();
        let density = native.min(budget).max(1.0);

        let bleed_in = geometry.bleed_pt.to_inches();
        Self {
            canvas_w: ((page_w_in * density).round() as u32).max(1),
            canvas_h: ((page_h_in * density).round() as u32).max(1),
            box_x: bleed_in * density,
            box_y: bleed_in * density,
            box_w: ((image_w_in * density).round() as u32).max(1),
            box_h: ((image_h_in * density).round() as u32).max(1),
            density,
        }
    }
}

// Background fill, then the oriented artwork, mirroring the content stream.
fn compose_page_raster(
    pixels: &DynamicImage,
    exif: u8,
    background: Color,
    layout: &CompareLayout,
) -> Result<Pixmap> {
    let mut pixmap = Pixmap::new(layout.canvas_w, layout.canvas_h).ok_or_else(|| {
        PressProofError::InvalidImageBuffer("compare canvas allocation failed".to_string())
    })?;
    let [r, g, b] = background.to_rgb8();
    pixmap.fill(tiny_skia::Color::from_rgba8(r, g, b, 255));

    // Resize in stored orientation first so the rotate touches the small copy.
    let (stored_w, stored_h) = if (5..=8).contains(&exif) {
        (layout.box_h, layout.box_w)
    } else {
        (layout.box_w, layout.box_h)
    };
    let thumb = if pixels.width() == stored_w && pixels.height() == stored_h {
        pixels.clone()
    } else {
        pixels.resize_exact(stored_w, stored_h, FilterType::Triangle)
    };
    let oriented = apply_orientation(thumb, exif);
    let source = image_to_pixmap(&oriented).ok_or_else(|| {
        PressProofError::InvalidImageBuffer("compare raster allocation failed".to_string())
    })?;

    let ts = Transform::from_row(1.0, 0.0, 0.0, 1.0, layout.box_x, layout.box_y);
    let mut paint = PixmapPaint::default();
    paint.quality = FilterQuality::Bilinear;
    pixmap.draw_pixmap(0, 0, source.as_ref(), &paint, ts, None);
    Ok(pixmap)
}

// PSNR over the RGB channels, in dB. Identical rasters score infinity.
fn psnr(a: &Pixmap, b: &Pixmap) -> f64 {
    let mut sum = 0u64;
    let mut count = 0u64;
    for (pa, pb) in a.data().chunks_exact(4).zip(b.data().chunks_exact(4)) {
        for i in 0..3 {
            let d = i64::from(pa[i]) - i64::from(pb[i]);
            sum += (d * d) as u64;
        }
        count += 3;
    }
    if count == 0 || sum == 0 {
        return f64::INFINITY;
    }
    let mse = sum as f64 / count as f64;
    10.0 * ((255.0 * 255.0) / mse).log10()
}

// Mean SSIM over 8x8 luma windows; None below one full window.
fn ssim(a: &Pixmap, b: &Pixmap) -> Option<f64> {
    use rayon::prelude::*;

    const WINDOW: usize = 8;
    let width = a.width() as usize;
    let height = a.height() as usize;
    if width < WINDOW || height < WINDOW {
        return None;
    }
    let luma_a = luma_plane(a);
    let luma_b = luma_plane(b);
    let cols = width / WINDOW;
    let rows = height / WINDOW;
    let c1 = (0.01f64 * 255.0) * (0.01f64 * 255.0);
    let c2 = (0.03f64 * 255.0) * (0.03f64 * 255.0);

    let total: f64 = (0..rows)
        .into_par_iter()
        .map(|wy| {
            let mut row_sum = 0.0f64;
            for wx in 0..cols {
                row_sum += window_score(
                    &luma_a,
                    &luma_b,
                    width,
                    wx * WINDOW,
                    wy * WINDOW,
                    c1,
                    c2,
                );
            }
            row_sum
        })
        .sum();
    Some(total / (rows * cols) as f64)
}

fn luma_plane(pixmap: &Pixmap) -> Vec<f64> {
    pixmap
        .data()
        .chunks_exact(4)
        .map(|px| 0.299 * f64::from(px[0]) + 0.587 * f64::from(px[1]) + 0.114 * f64::from(px[2]))
        .collect()
}

fn window_score(a: &[f64], b: &[f64], stride: usize, x0: usize, y0: usize, c1: f64, c2: f64) -> f64 {
    const WINDOW: usize = 8;
    const N: f64 = (WINDOW * WINDOW) as f64;
    let mut sum_a = 0.0;
    let mut sum_b = 0.0;
    let mut sum_aa = 0.0;
    let mut sum_bb = 0.0;
    let mut sum_ab = 0.0;
    for y in y0..y0 + WINDOW {
        let row = y * stride;
        for x in x0..x0 + WINDOW {
            let va = a[row + x];
            let vb = b[row + x];
            sum_a += va;
            sum_b += vb;
            sum_aa += va * va;
            sum_bb += vb * vb;
            sum_ab += va * vb;
        }
    }
    let mean_a = sum_a / N;
    let mean_b = sum_b / N;
    let var_a = (sum_aa / N - mean_a * mean_a).max(0.0);
    let var_b = (sum_bb / N - mean_b * mean_b).max(0.0);
    let cov = sum_ab / N - mean_a * mean_b;
    ((2.0 * mean_a * mean_b + c1) * (2.0 * cov + c2))
        / ((mean_a * mean_a + mean_b * mean_b + c1) * (var_a + var_b + c2))
}

fn lopdf_err(err: lopdf::Error) -> PressProofError {
    PressProofError::PdfParseFailed(err.to_string())
}

fn resolve_object<'a>(doc: &'a LoDocument, mut obj: &'a LoObject) -> Result<&'a LoObject> {
    loop {
        match obj {
            LoObject::Reference(id) => {
                obj = doc.get_object(*id).map_err(lopdf_err)?;
            }
            _ => return Ok(obj),
        }
    }
}

pub(crate) fn extract_embedded_stream(pdf: &[u8]) -> Result<Vec<u8>> {
    let doc = LoDocument::load_mem(pdf).map_err(lopdf_err)?;
    let pages = doc.get_pages();
    let (_, &page_id) = pages
        .iter()
        .next()
        .ok_or(PressProofError::PdfPageMissing)?;
    let page = doc.get_dictionary(page_id).map_err(lopdf_err)?;

    let resources = resolve_object(&doc, page.get(b"Resources").map_err(lopdf_err)?)?;
    let LoObject::Dictionary(resources) = resources else {
        return Err(PressProofError::PdfParseFailed(
            "page resources missing".to_string(),
        ));
    };
    let xobjects = resolve_object(&doc, resources.get(b"XObject").map_err(lopdf_err)?)?;
    let LoObject::Dictionary(xobjects) = xobjects else {
        return Err(PressProofError::PdfParseFailed(
            "page has no xobject table".to_string(),
        ));
    };

    for (_name, entry) in xobjects.iter() {
        let LoObject::Reference(id) = entry else {
            continue;
        };
        let stream = doc
            .get_object(*id)
            .map_err(lopdf_err)?
            .as_stream()
            .map_err(lopdf_err)?;
        let is_image = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|o| o.as_name().ok())
            .map(|n| n == b"Image".as_slice())
            .unwrap_or(false);
        if is_image {
            return Ok(stream.content.clone());
        }
    }
    Err(PressProofError::PdfParseFailed(
        "no image xobject on first page".to_string(),
    ))
}
