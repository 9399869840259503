use std::borrow::Cow;
use std::io;

use base64::Engine;
use serde::Serialize;
use tracing::{debug, warn};

use crate::embed::{EmbedOptions, EmbeddedDocument, embed_image};
use crate::error::{PressProofError, Result};

// The crate's only I/O seam. Implementations own transport, credentials and
// timeouts; a timeout surfaces as an Err and the resolution chain moves on.
pub trait AssetFetcher {
    // Ok(None) when the key is absent.
    fn fetch_object(&self, bucket: &str, key: &str) -> io::Result<Option<Vec<u8>>>;

    // Ok(None) when unreachable or the response is not usable.
    fn fetch_url(&self, url: &str) -> io::Result<Option<Vec<u8>>>;
}

// The inline buffer is preferred, then the object store, then the URL (which
// may be a data: URI). margin_cm becomes the bleed on every page side.
#[derive(Default)]
pub struct GenerateRequest<'a> {
    pub width_cm: f32,
    pub height_cm: f32,
    pub margin_cm: f32,
    pub original_buffer: Option<&'a [u8]>,
    pub original_bucket: Option<&'a str>,
    pub original_object_key: Option<&'a str>,
    pub original_url: Option<&'a str>,
    pub fetcher: Option<&'a dyn AssetFetcher>,
    // Request and diagnostics correlation ids, echoed into the logs only.
    pub rid: Option<&'a str>,
    pub diag_id: Option<&'a str>,
    pub options: EmbedOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrintArea {
    pub width_cm: f32,
    pub height_cm: f32,
    pub width_px: u32,
    pub height_px: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrintInfo {
    pub page_width_cm: f32,
    pub page_height_cm: f32,
    pub margin_cm: f32,
    pub area: PrintArea,
    pub source_mime: &'static str,
    pub artwork: crate::embed::Diagnostics,
}

#[derive(Debug)]
pub struct GenerateResult {
    pub buffer: Vec<u8>,
    pub info: PrintInfo,
}

pub fn generate_print_pdf(request: &GenerateRequest<'_>) -> Result<GenerateResult> {
    for (field, value) in [
        ("width_cm", request.width_cm),
        ("height_cm", request.height_cm),
    ] {
        if value <= 0.0 || !value.is_finite() {
            return Err(PressProofError::InvalidDimension { field, value });
        }
    }
    if request.margin_cm < 0.0 || !request.margin_cm.is_finite() {
        return Err(PressProofError::InvalidDimension {
            field: "margin_cm",
            value: request.margin_cm,
        });
    }

    let (source, origin) = resolve_original(request)?;
    debug!(
        rid = request.rid.unwrap_or(""),
        diag_id = request.diag_id.unwrap_or(""),
        origin,
        bytes = source.len(),
        "resolved original asset"
    );

    let mut options = request.options.clone();
    options.width_cm = Some(request.width_cm);
    options.height_cm = Some(request.height_cm);
    options.bleed_cm = request.margin_cm;

    let document = embed_image(&source, &options)?;
    Ok(assemble_result(document, request.margin_cm))
}

// Fetch failures are logged and fold into the next candidate; only a fully
// exhausted chain is an error.
fn resolve_original<'a>(request: &GenerateRequest<'a>) -> Result<(Cow<'a, [u8]>, &'static str)> {
    if let Some(buffer) = request.original_buffer {
        if !buffer.is_empty() {
            return Ok((Cow::Borrowed(buffer), "buffer"));
        }
    }
    if let (Some(fetcher), Some(bucket), Some(key)) = (
        request.fetcher,
        request.original_bucket,
        request.original_object_key,
    ) {
        match fetcher.fetch_object(bucket, key) {
            Ok(Some(bytes)) => return Ok((Cow::Owned(bytes), "object")),
            Ok(None) => debug!(bucket, key, "object not found in storage"),
            Err(e) => warn!(bucket, key, error = %e, "object fetch failed"),
        }
    }
    if let Some(url) = request.original_url {
        if let Some((_, bytes)) = parse_data_uri(url) {
            return Ok((Cow::Owned(bytes), "data-uri"));
        }
        if let Some(fetcher) = request.fetcher {
            match fetcher.fetch_url(url) {
                Ok(Some(bytes)) => return Ok((Cow::Owned(bytes), "url")),
                Ok(None) => debug!(url, "url fetch returned nothing"),
                Err(e) => warn!(url, error = %e, "url fetch failed"),
            }
        }
    }
    Err(PressProofError::OriginalNotFound)
}

fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}

fn assemble_result(document: EmbeddedDocument, margin_cm: f32) -> GenerateResult {
    let EmbeddedDocument {
        pdf,
        width_cm,
        height_cm,
        diagnostics,
        ..
    } = document;
    let source_mime = match diagnostics.source_format {
        "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    };
    let info = PrintInfo {
        page_width_cm: width_cm + 2.0 * margin_cm,
        page_height_cm: height_cm + 2.0 * margin_cm,
        margin_cm,
        area: PrintArea {
            width_cm,
            height_cm,
            width_px: diagnostics.effective_width_px,
            height_px: diagnostics.effective_height_px,
        },
        source_mime,
        artwork: diagnostics,
    };
    GenerateResult { buffer: pdf, info }
}
