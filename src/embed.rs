use std::io::Cursor;

use image::codecs::jpeg::JpegDecoder;
use image::codecs::png::PngDecoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::color::{ProfileSource, resolve_profile};
use crate::error::{PressProofError, Result};
use crate::geometry::{
    OrientationInfo, PageGeometry, PhysicalSpec, actual_ppi, resolve_orientation,
    resolve_page_geometry,
};
use crate::pdf::{AlphaStream, DocumentMeta, ImageStream, build_single_page_pdf, flate_compress};
use crate::qa::{QaInput, QaOptions, QaReport, verify};
use crate::types::Color;

// 0x3FFF * 0x3FFF, the classic guard against hostile pixel bombs.
pub const DEFAULT_MAX_PIXELS: u64 = 268_402_689;
pub const DEFAULT_MAX_PDF_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedOptions {
    pub background: Color,
    pub bleed_cm: f32,
    pub width_cm: Option<f32>,
    pub height_cm: Option<f32>,
    pub target_ppi: Option<f32>,
    pub enforce_srgb: bool,
    pub upscale: bool,
    pub max_pixels: u64,
    pub max_pdf_bytes: usize,
    pub allow_oversize: bool,
    pub title: Option<String>,
    pub creator: Option<String>,
    pub qa: QaOptions,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            background: Color::WHITE,
            bleed_cm: 0.0,
            width_cm: None,
            height_cm: None,
            target_ppi: None,
            enforce_srgb: true,
            upscale: false,
            max_pixels: DEFAULT_MAX_PIXELS,
            max_pdf_bytes: DEFAULT_MAX_PDF_BYTES,
            allow_oversize: false,
            title: None,
            creator: None,
            qa: QaOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddedFormat {
    Jpeg,
    Png,
}

impl EmbeddedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddedFormat::Jpeg => "jpeg",
            EmbeddedFormat::Png => "png",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            EmbeddedFormat::Jpeg => "image/jpeg",
            EmbeddedFormat::Png => "image/png",
        }
    }
}

#[derive(Debug)]
pub struct EmbeddedDocument {
    pub pdf: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    pub width_cm: f32,
    pub height_cm: f32,
    pub page_width_pt: f32,
    pub page_height_pt: f32,
    pub bleed_cm: f32,
    pub embedded_format: EmbeddedFormat,
    pub icc_profile: Option<ProfileSource>,
    pub recompression: bool,
    pub qa: QaReport,
    pub target_ppi: Option<f32>,
    pub diagnostics: Diagnostics,
}

// Informational only; never feeds back into the output bytes.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub orientation: &'static str,
    pub orientation_exif: u8,
    pub source_format: &'static str,
    pub embedded_format: &'static str,
    pub icc_source: Option<&'static str>,
    pub recompression: bool,
    pub upscaled: bool,
    pub width_px: u32,
    pub height_px: u32,
    pub effective_width_px: u32,
    pub effective_height_px: u32,
    pub actual_ppi_x: f32,
    pub actual_ppi_y: f32,
    pub target_ppi: Option<f32>,
    pub page_width_pt: f32,
    pub page_height_pt: f32,
    pub bleed_pt: f32,
    pub source_sha256: String,
    pub pdf_sha256: String,
    pub pdf_bytes: usize,
    pub qa: QaReport,
}

pub(crate) struct SourceImage {
    pub image: DynamicImage,
    pub width_px: u32,
    pub height_px: u32,
    pub format: ImageFormat,
    pub exif_orientation: u8,
    pub icc_profile: Option<Vec<u8>>,
    pub original_color: ExtendedColorType,
}

impl SourceImage {
    pub fn format_str(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "jpeg",
            _ => "png",
        }
    }
}

// The pixel ceiling is enforced before any pixel allocation happens.
pub(crate) fn decode_source(data: &[u8], max_pixels: u64) -> Result<SourceImage> {
    let format = image::guess_format(data)
        .map_err(|e| PressProofError::InvalidImageBuffer(e.to_string()))?;
    match format {
        ImageFormat::Jpeg => {
            let decoder = JpegDecoder::new(Cursor::new(data))
                .map_err(|e| PressProofError::ImageMetadataUnavailable(e.to_string()))?;
            finish_decode(decoder, format, max_pixels)
        }
        ImageFormat::Png => {
            let decoder = PngDecoder::new(Cursor::new(data))
                .map_err(|e| PressProofError::ImageMetadataUnavailable(e.to_string()))?;
            finish_decode(decoder, format, max_pixels)
        }
        other => Err(PressProofError::InvalidImageBuffer(format!(
            "unsupported container {other:?}"
        ))),
    }
}

fn finish_decode<D: ImageDecoder>(
    mut decoder: D,
    format: ImageFormat,
    max_pixels: u64,
) -> Result<SourceImage> {
    let (width, height) = decoder.dimensions();
    if width == 0 || height == 0 {
        return Err(PressProofError::ImageMetadataUnavailable(
            "zero pixel extent".to_string(),
        ));
    }
    if u64::from(width) * u64::from(height) > max_pixels {
        return Err(PressProofError::ImageTooLarge {
            width,
            height,
            max_pixels,
        });
    }
    let exif_orientation = decoder
        .orientation()
        .map(|o| o.to_exif())
        .unwrap_or(1);
    let icc_profile = decoder
        .icc_profile()
        .ok()
        .flatten()
        .filter(|bytes| !bytes.is_empty());
    let original_color = decoder.original_color_type();
    let image = DynamicImage::from_decoder(decoder)
        .map_err(|e| PressProofError::InvalidImageBuffer(e.to_string()))?;
    Ok(SourceImage {
        image,
        width_px: width,
        height_px: height,
        format,
        exif_orientation,
        icc_profile,
        original_color,
    })
}

struct PngInfo {
    width: u32,
    bit_depth: u8,
    color_type: u8,
    interlace: u8,
    // A tRNS chunk makes gray/truecolor pixels transparent without an alpha
    // channel in IHDR.
    transparency: bool,
    idat: Vec<u8>,
}

// Returns None for anything that is not a plausible PNG.
fn parse_png_chunks(data: &[u8]) -> Option<PngInfo> {
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];
    if data.len() < 8 || data[..8] != SIGNATURE {
        return None;
    }
    let mut info: Option<PngInfo> = None;
    let mut idat = Vec::new();
    let mut transparency = false;
    let mut pos = 8usize;
    while pos + 8 <= data.len() {
        let len = u32::from_be_bytes(data[pos..pos + 4].try_into().ok()?) as usize;
        let kind = &data[pos + 4..pos + 8];
        let body = data.get(pos + 8..pos + 8 + len)?;
        match kind {
            b"IHDR" => {
                if body.len() < 13 {
                    return None;
                }
                info = Some(PngInfo {
                    width: u32::from_be_bytes(body[0..4].try_into().ok()?),
                    bit_depth: body[8],
                    color_type: body[9],
                    interlace: body[12],
                    transparency: false,
                    idat: Vec::new(),
                });
            }
            b"IDAT" => idat.extend_from_slice(body),
            b"tRNS" => transparency = true,
            b"IEND" => break,
            _ => {}
        }
        pos += 12 + len; // length + type + crc
    }
    let mut info = info?;
    if idat.is_empty() {
        return None;
    }
    info.idat = idat;
    info.transparency = transparency;
    Some(info)
}

struct Rendition {
    format: EmbeddedFormat,
    // Container bytes of what went into the page; QA decodes these.
    container: Vec<u8>,
    stream: ImageStream,
    recompression: bool,
    jpeg_verbatim: bool,
}

// Verbatim paths move the original compressed bytes straight into the
// XObject stream; everything else is re-emitted losslessly.
fn normalize_rendition(
    source: &SourceImage,
    data: &[u8],
    working: &DynamicImage,
    upscaled: bool,
) -> Rendition {
    if !upscaled {
        if source.format == ImageFormat::Jpeg {
            match source.original_color {
                ExtendedColorType::L8 | ExtendedColorType::Rgb8 => {
                    let color_space = if source.original_color == ExtendedColorType::L8 {
                        "/DeviceGray"
                    } else {
                        "/DeviceRGB"
                    };
                    let container = data.to_vec();
                    return Rendition {
                        format: EmbeddedFormat::Jpeg,
                        stream: ImageStream {
                            width: source.width_px,
                            height: source.height_px,
                            color_space,
                            bits_per_component: 8,
                            filter: "/DCTDecode",
                            decode_parms: None,
                            data: container.clone(),
                            alpha: None,
                        },
                        container,
                        recompression: false,
                        jpeg_verbatim: true,
                    };
                }
                other => {
                    debug!(color = ?other, "jpeg color space not eligible for passthrough");
                }
            }
        }
        if source.format == ImageFormat::Png {
            if let Some(png) = parse_png_chunks(data) {
                let eligible = png.bit_depth == 8
                    && (png.color_type == 0 || png.color_type == 2)
                    && png.interlace == 0
                    && !png.transparency;
                if eligible {
                    let colors = if png.color_type == 2 { 3 } else { 1 };
                    let color_space = if colors == 3 { "/DeviceRGB" } else { "/DeviceGray" };
                    let parms = format!(
                        "<< /Predictor 15 /Colors {} /BitsPerComponent 8 /Columns {} >>",
                        colors, png.width
                    );
                    return Rendition {
                        format: EmbeddedFormat::Png,
                        container: data.to_vec(),
                        stream: ImageStream {
                            width: source.width_px,
                            height: source.height_px,
                            color_space,
                            bits_per_component: 8,
                            filter: "/FlateDecode",
                            decode_parms: Some(parms),
                            data: png.idat,
                            alpha: None,
                        },
                        recompression: false,
                        jpeg_verbatim: false,
                    };
                }
                debug!(
                    bit_depth = png.bit_depth,
                    color_type = png.color_type,
                    interlace = png.interlace,
                    transparency = png.transparency,
                    "png not eligible for verbatim embedding"
                );
            }
        }
    }

    reencode_rendition(working)
}

// Lossless fallback: raw samples re-compressed, alpha split into an SMask,
// and a PNG container of the same pixels for the QA raster.
fn reencode_rendition(working: &DynamicImage) -> Rendition {
    let rgba = working.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut rgb = Vec::with_capacity((width as usize) * (height as usize) * 3);
    let mut alpha = Vec::with_capacity((width as usize) * (height as usize));
    let mut has_alpha = false;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a != 255 {
            has_alpha = true;
        }
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }

    let mut container = Vec::new();
    // PNG encoding of in-memory pixels cannot fail on a Vec writer.
    let _ = working.write_to(&mut Cursor::new(&mut container), ImageFormat::Png);

    Rendition {
        format: EmbeddedFormat::Png,
        container,
        stream: ImageStream {
            width,
            height,
            color_space: "/DeviceRGB",
            bits_per_component: 8,
            filter: "/FlateDecode",
            decode_parms: None,
            data: flate_compress(&rgb),
            alpha: has_alpha.then(|| AlphaStream {
                data: flate_compress(&alpha),
            }),
        },
        recompression: true,
        jpeg_verbatim: false,
    }
}

// Never runs by default, never shrinks, and the resample target honors the
// same pixel ceiling as the decode.
fn maybe_upscale(
    image: &DynamicImage,
    orientation: &OrientationInfo,
    geometry: &PageGeometry,
    options: &EmbedOptions,
) -> Result<Option<DynamicImage>> {
    let Some(target) = options.target_ppi else {
        return Ok(None);
    };
    if !options.upscale || target <= 0.0 || !target.is_finite() {
        return Ok(None);
    }
    let want_w = (geometry.image_width_pt.to_inches() * target).round().max(1.0) as u32;
    let want_h = (geometry.image_height_pt.to_inches() * target).round().max(1.0) as u32;
    if want_w <= orientation.width_px && want_h <= orientation.height_px {
        return Ok(None);
    }
    if u64::from(want_w) * u64::from(want_h) > options.max_pixels {
        return Err(PressProofError::ImageTooLarge {
            width: want_w,
            height: want_h,
            max_pixels: options.max_pixels,
        });
    }
    let (stored_w, stored_h) = if orientation.swaps_dimensions {
        (want_h, want_w)
    } else {
        (want_w, want_h)
    };
    debug!(
        from_w = image.width(),
        from_h = image.height(),
        to_w = stored_w,
        to_h = stored_h,
        target_ppi = target,
        "upscaling toward target density"
    );
    Ok(Some(image.resize_exact(stored_w, stored_h, FilterType::Lanczos3)))
}

// A QA failure aborts the call; no PDF leaves with a failed gate.
pub fn embed_image(data: &[u8], options: &EmbedOptions) -> Result<EmbeddedDocument> {
    let source = decode_source(data, options.max_pixels)?;
    debug!(
        width = source.width_px,
        height = source.height_px,
        format = source.format_str(),
        exif = source.exif_orientation,
        icc = source.icc_profile.is_some(),
        "decoded source image"
    );

    let orientation =
        resolve_orientation(source.exif_orientation, source.width_px, source.height_px);
    let spec = PhysicalSpec {
        width_cm: options.width_cm,
        height_cm: options.height_cm,
        bleed_cm: options.bleed_cm,
        target_ppi: options.target_ppi,
    };
    let geometry = resolve_page_geometry(&spec, &orientation)?;

    let resampled = maybe_upscale(&source.image, &orientation, &geometry, options)?;
    let upscaled = resampled.is_some();
    let working = resampled.as_ref().unwrap_or(&source.image);
    let rendition = normalize_rendition(&source, data, working, upscaled);

    let profile = resolve_profile(source.icc_profile.clone(), options.enforce_srgb);
    let icc_source = profile.as_ref().map(|p| p.source);

    let meta = DocumentMeta {
        title: options.title.as_deref(),
        creator: options.creator.as_deref(),
    };
    let pdf = build_single_page_pdf(
        &geometry,
        orientation.exif,
        options.background,
        &rendition.stream,
        profile.as_ref(),
        &meta,
    )?;

    if pdf.len() > options.max_pdf_bytes && !options.allow_oversize {
        return Err(PressProofError::PdfTooLarge {
            size: pdf.len(),
            max_bytes: options.max_pdf_bytes,
        });
    }

    let expected_stream_sha: [u8; 32] = Sha256::digest(&rendition.stream.data).into();
    let qa = verify(
        &QaInput {
            source_image: &source.image,
            source_bytes: data,
            rendition_bytes: &rendition.container,
            exif: orientation.exif,
            geometry: &geometry,
            background: options.background,
            pdf_bytes: &pdf,
            expected_stream_sha,
            jpeg_verbatim: rendition.jpeg_verbatim,
        },
        &options.qa,
    )?;

    let (embedded_w, embedded_h) = (rendition.stream.width, rendition.stream.height);
    let (effective_w, effective_h) = if orientation.swaps_dimensions {
        (embedded_h, embedded_w)
    } else {
        (embedded_w, embedded_h)
    };
    let ppi_x = actual_ppi(effective_w, geometry.image_width_pt);
    let ppi_y = actual_ppi(effective_h, geometry.image_height_pt);
    if let Some(target) = options.target_ppi {
        if ppi_x + 0.5 < target || ppi_y + 0.5 < target {
            warn!(ppi_x, ppi_y, target, "artwork density below target");
        }
    }

    let diagnostics = Diagnostics {
        orientation: orientation.label,
        orientation_exif: orientation.exif,
        source_format: source.format_str(),
        embedded_format: rendition.format.as_str(),
        icc_source: icc_source.map(|s| s.as_str()),
        recompression: rendition.recompression,
        upscaled,
        width_px: embedded_w,
        height_px: embedded_h,
        effective_width_px: effective_w,
        effective_height_px: effective_h,
        actual_ppi_x: ppi_x,
        actual_ppi_y: ppi_y,
        target_ppi: options.target_ppi,
        page_width_pt: geometry.page_width_pt.to_f32(),
        page_height_pt: geometry.page_height_pt.to_f32(),
        bleed_pt: geometry.bleed_pt.to_f32(),
        source_sha256: hex_digest(&Sha256::digest(data)),
        pdf_sha256: hex_digest(&Sha256::digest(&pdf)),
        pdf_bytes: pdf.len(),
        qa: qa.clone(),
    };
    debug!(
        pdf_bytes = pdf.len(),
        psnr = qa.psnr,
        ssim = ?qa.ssim,
        recompression = rendition.recompression,
        "embed complete"
    );

    Ok(EmbeddedDocument {
        width_px: embedded_w,
        height_px: embedded_h,
        width_cm: geometry.image_width_pt.to_cm(),
        height_cm: geometry.image_height_pt.to_cm(),
        page_width_pt: geometry.page_width_pt.to_f32(),
        page_height_pt: geometry.page_height_pt.to_f32(),
        bleed_cm: options.bleed_cm,
        embedded_format: rendition.format,
        icc_profile: icc_source,
        recompression: rendition.recompression,
        qa,
        target_ppi: options.target_ppi,
        diagnostics,
        pdf,
    })
}

fn hex_digest(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
