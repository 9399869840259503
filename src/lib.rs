mod color;
mod compose;
mod embed;
mod error;
mod geometry;
mod orchestrate;
mod pdf;
mod pdfcheck;
mod qa;
mod types;

pub use color::{ColorProfile, ProfileSource, resolve_profile, srgb_profile_bytes};
pub use compose::{ComposeDebug, ComposeResult, CompositionSpec, FitMode, PxRect, compose_artwork};
pub use embed::{
    DEFAULT_MAX_PDF_BYTES, DEFAULT_MAX_PIXELS, Diagnostics, EmbedOptions, EmbeddedDocument,
    EmbeddedFormat, embed_image,
};
pub use error::{PressProofError, Result};
pub use geometry::{
    DEFAULT_DENSITY_PPI, OrientationInfo, PageGeometry, PhysicalSpec, actual_ppi,
    apply_orientation, placement_matrix, resolve_orientation, resolve_page_geometry,
};
pub use orchestrate::{
    AssetFetcher, GenerateRequest, GenerateResult, PrintArea, PrintInfo, generate_print_pdf,
};
pub use pdfcheck::{PageMeasurements, ValidateOptions, ValidationReport, validate_pdf_bytes};
pub use qa::{QaOptions, QaReport};
pub use types::{CM_PER_INCH, Color, MM_PER_INCH, POINTS_PER_INCH, Pt, Rect};
