use thiserror::Error;

pub type Result<T> = std::result::Result<T, PressProofError>;

#[derive(Debug, Error)]
pub enum PressProofError {
    #[error("image buffer is not a decodable raster: {0}")]
    InvalidImageBuffer(String),

    #[error("image metadata unavailable: {0}")]
    ImageMetadataUnavailable(String),

    #[error("image is {width}x{height}px, pixel ceiling is {max_pixels}")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    #[error("{field} must be positive, got {value}")]
    InvalidDimension { field: &'static str, value: f32 },

    #[error("produced PDF is {size} bytes, ceiling is {max_bytes}")]
    PdfTooLarge { size: usize, max_bytes: usize },

    #[error("embedded JPEG stream does not match the source bytes")]
    JpegStreamMismatch,

    #[error("fidelity gate failed: psnr {psnr}, ssim {ssim:?}")]
    QaCheckFailed { psnr: f64, ssim: Option<f64> },

    #[error("composition clip region is degenerate: {debug}")]
    InvalidBbox { debug: serde_json::Value },

    #[error("pdf parse failed: {0}")]
    PdfParseFailed(String),

    #[error("pdf has no readable page")]
    PdfPageMissing,

    #[error("source image could not be resolved from any configured origin")]
    OriginalNotFound,

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl PressProofError {
    // Stable machine-readable tag, part of the caller contract.
    pub fn code(&self) -> &'static str {
        match self {
            PressProofError::InvalidImageBuffer(_) => "invalid_image_buffer",
            PressProofError::ImageMetadataUnavailable(_) => "image_metadata_unavailable",
            PressProofError::ImageTooLarge { .. } => "image_too_large",
            PressProofError::InvalidDimension { .. } => "invalid_dimension",
            PressProofError::PdfTooLarge { .. } => "pdf_too_large",
            PressProofError::JpegStreamMismatch => "jpeg_stream_mismatch",
            PressProofError::QaCheckFailed { .. } => "qa_check_failed",
            PressProofError::InvalidBbox { .. } => "invalid_bbox",
            PressProofError::PdfParseFailed(_) => "pdf_parse_failed",
            PressProofError::PdfPageMissing => "pdf_page_missing",
            PressProofError::OriginalNotFound => "original_not_found",
            PressProofError::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let cases: Vec<(PressProofError, &str)> = vec![
            (
                PressProofError::InvalidImageBuffer("bad magic".into()),
                "invalid_image_buffer",
            ),
            (
                PressProofError::ImageTooLarge {
                    width: 100_000,
                    height: 100_000,
                    max_pixels: 268_402_689,
                },
                "image_too_large",
            ),
            (
                PressProofError::InvalidDimension {
                    field: "width_cm",
                    value: -1.0,
                },
                "invalid_dimension",
            ),
            (PressProofError::JpegStreamMismatch, "jpeg_stream_mismatch"),
            (
                PressProofError::QaCheckFailed {
                    psnr: 31.2,
                    ssim: Some(0.97),
                },
                "qa_check_failed",
            ),
            (PressProofError::PdfPageMissing, "pdf_page_missing"),
            (PressProofError::OriginalNotFound, "original_not_found"),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn display_names_the_offending_field() {
        let err = PressProofError::InvalidDimension {
            field: "height_cm",
            value: 0.0,
        };
        let text = err.to_string();
        assert!(text.contains("height_cm"), "{text}");
        assert!(text.contains('0'), "{text}");
    }

    #[test]
    fn bbox_failure_carries_debug_state() {
        let err = PressProofError::InvalidBbox {
            debug: serde_json::json!({ "clip_w": -4, "clip_h": 12 }),
        };
        let text = err.to_string();
        assert!(text.contains("clip_w"), "{text}");
    }
}
