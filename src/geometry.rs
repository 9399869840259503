use image::DynamicImage;
use tracing::debug;

use crate::error::{PressProofError, Result};
use crate::types::{Pt, Rect};

pub const DEFAULT_DENSITY_PPI: f32 = 72.0;

// Both dimensions absent means density mode: the page derives from pixel count.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhysicalSpec {
    pub width_cm: Option<f32>,
    pub height_cm: Option<f32>,
    pub bleed_cm: f32,
    pub target_ppi: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrientationInfo {
    pub exif: u8,
    pub label: &'static str,
    // Pixel extent after the implied transform (swapped for the 90/270 family).
    pub width_px: u32,
    pub height_px: u32,
    pub swaps_dimensions: bool,
}

// Page and artwork extents in points. page = image + 2*bleed holds exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub page_width_pt: Pt,
    pub page_height_pt: Pt,
    pub image_width_pt: Pt,
    pub image_height_pt: Pt,
    pub bleed_pt: Pt,
}

impl PageGeometry {
    pub fn image_box(&self) -> Rect {
        Rect {
            x: self.bleed_pt,
            y: self.bleed_pt,
            width: self.image_width_pt,
            height: self.image_height_pt,
        }
    }
}

struct OrientationEntry {
    exif: u8,
    label: &'static str,
    swaps_dimensions: bool,
}

const ORIENTATIONS: [OrientationEntry; 8] = [
    OrientationEntry {
        exif: 1,
        label: "identity",
        swaps_dimensions: false,
    },
    OrientationEntry {
        exif: 2,
        label: "mirror-horizontal",
        swaps_dimensions: false,
    },
    OrientationEntry {
        exif: 3,
        label: "rotate-180",
        swaps_dimensions: false,
    },
    OrientationEntry {
        exif: 4,
        label: "mirror-vertical",
        swaps_dimensions: false,
    },
    OrientationEntry {
        exif: 5,
        label: "transpose",
        swaps_dimensions: true,
    },
    OrientationEntry {
        exif: 6,
        label: "rotate-90",
        swaps_dimensions: true,
    },
    OrientationEntry {
        exif: 7,
        label: "transverse",
        swaps_dimensions: true,
    },
    OrientationEntry {
        exif: 8,
        label: "rotate-270",
        swaps_dimensions: true,
    },
];

// Codes outside 1..=8 resolve to identity.
pub fn resolve_orientation(exif: u8, width_px: u32, height_px: u32) -> OrientationInfo {
    let entry = ORIENTATIONS
        .iter()
        .find(|entry| entry.exif == exif)
        .unwrap_or_else(|| {
            if exif != 1 {
                debug!(exif, "unrecognized exif orientation, using identity");
            }
            &ORIENTATIONS[0]
        });
    let (w, h) = if entry.swaps_dimensions {
        (height_px, width_px)
    } else {
        (width_px, height_px)
    };
    OrientationInfo {
        exif: entry.exif,
        label: entry.label,
        width_px: w,
        height_px: h,
        swaps_dimensions: entry.swaps_dimensions,
    }
}

// PDF `cm` operands [a b c d e f] mapping the unit image square onto
// image_box. Mirroring shows up as a negative extent.
pub fn placement_matrix(exif: u8, image_box: Rect) -> [f32; 6] {
    let x = image_box.x.to_f32();
    let y = image_box.y.to_f32();
    let w = image_box.width.to_f32();
    let h = image_box.height.to_f32();
    match exif {
        2 => [-w, 0.0, 0.0, h, x + w, y],
        3 => [-w, 0.0, 0.0, -h, x + w, y + h],
        4 => [w, 0.0, 0.0, -h, x, y + h],
        5 => [0.0, -h, -w, 0.0, x + w, y + h],
        6 => [0.0, -h, w, 0.0, x, y + h],
        7 => [0.0, h, w, 0.0, x, y],
        8 => [0.0, h, -w, 0.0, x + w, y],
        _ => [w, 0.0, 0.0, h, x, y],
    }
}

// Raster-space counterpart of placement_matrix; the two must agree.
pub fn apply_orientation(image: DynamicImage, exif: u8) -> DynamicImage {
    match exif {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

pub fn resolve_page_geometry(
    spec: &PhysicalSpec,
    orientation: &OrientationInfo,
) -> Result<PageGeometry> {
    if spec.bleed_cm < 0.0 || !spec.bleed_cm.is_finite() {
        return Err(PressProofError::InvalidDimension {
            field: "bleed_cm",
            value: spec.bleed_cm,
        });
    }
    for (field, value) in [("width_cm", spec.width_cm), ("height_cm", spec.height_cm)] {
        if let Some(v) = value {
            if v <= 0.0 || !v.is_finite() {
                return Err(PressProofError::InvalidDimension { field, value: v });
            }
        }
    }

    let eff_w = orientation.width_px.max(1);
    let eff_h = orientation.height_px.max(1);
    let (image_width_pt, image_height_pt) = match (spec.width_cm, spec.height_cm) {
        (Some(w), Some(h)) => (Pt::from_cm(w), Pt::from_cm(h)),
        // A single physical dimension keeps the artwork's aspect ratio.
        (Some(w), None) => {
            let h = w * eff_h as f32 / eff_w as f32;
            (Pt::from_cm(w), Pt::from_cm(h))
        }
        (None, Some(h)) => {
            let w = h * eff_w as f32 / eff_h as f32;
            (Pt::from_cm(w), Pt::from_cm(h))
        }
        (None, None) => {
            let density = spec.target_ppi.unwrap_or(DEFAULT_DENSITY_PPI);
            if density <= 0.0 || !density.is_finite() {
                return Err(PressProofError::InvalidDimension {
                    field: "target_ppi",
                    value: density,
                });
            }
            (Pt::from_px(eff_w, density), Pt::from_px(eff_h, density))
        }
    };

    let bleed_pt = Pt::from_cm(spec.bleed_cm);
    let geometry = PageGeometry {
        page_width_pt: image_width_pt + bleed_pt * 2,
        page_height_pt: image_height_pt + bleed_pt * 2,
        image_width_pt,
        image_height_pt,
        bleed_pt,
    };
    debug!(
        page_w = geometry.page_width_pt.to_f32(),
        page_h = geometry.page_height_pt.to_f32(),
        bleed = bleed_pt.to_f32(),
        exif = orientation.exif,
        "resolved page geometry"
    );
    Ok(geometry)
}

pub fn actual_ppi(px: u32, extent: Pt) -> f32 {
    let inches = extent.to_inches();
    if inches <= 0.0 { 0.0 } else { px as f32 / inches }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_codes_preserve_pixel_area() {
        for code in 1..=8u8 {
            let info = resolve_orientation(code, 1024, 1536);
            assert_eq!(
                u64::from(info.width_px) * u64::from(info.height_px),
                1024u64 * 1536,
                "code {code}"
            );
        }
    }

    #[test]
    fn rotated_family_swaps_dimensions() {
        for code in [5u8, 6, 7, 8] {
            let info = resolve_orientation(code, 1024, 1536);
            assert!(info.swaps_dimensions, "code {code}");
            assert_eq!(info.width_px, 1536);
            assert_eq!(info.height_px, 1024);
        }
        for code in [1u8, 2, 3, 4] {
            let info = resolve_orientation(code, 1024, 1536);
            assert!(!info.swaps_dimensions, "code {code}");
            assert_eq!(info.width_px, 1024);
        }
    }

    #[test]
    fn unknown_codes_fall_back_to_identity() {
        for code in [0u8, 9, 17, 255] {
            let info = resolve_orientation(code, 640, 480);
            assert_eq!(info.label, "identity");
            assert_eq!((info.width_px, info.height_px), (640, 480));
            assert!(!info.swaps_dimensions);
        }
    }

    #[test]
    fn placement_matrices_preserve_box_area() {
        let image_box = Rect {
            x: Pt::from_f32(28.35),
            y: Pt::from_f32(28.35),
            width: Pt::from_f32(300.0),
            height: Pt::from_f32(200.0),
        };
        for code in 1..=8u8 {
            let [a, b, c, d, _, _] = placement_matrix(code, image_box);
            let det = (a * d - b * c).abs();
            assert!((det - 300.0 * 200.0).abs() < 0.5, "code {code}: det {det}");
        }
    }

    #[test]
    fn identity_and_rotate90_matrices() {
        let image_box = Rect {
            x: Pt::from_f32(10.0),
            y: Pt::from_f32(20.0),
            width: Pt::from_f32(100.0),
            height: Pt::from_f32(50.0),
        };
        let m1 = placement_matrix(1, image_box);
        assert_eq!(m1, [100.0, 0.0, 0.0, 50.0, 10.0, 20.0]);
        let m6 = placement_matrix(6, image_box);
        assert_eq!(m6, [0.0, -50.0, 100.0, 0.0, 10.0, 70.0]);
    }

    #[test]
    fn physical_mode_adds_bleed_exactly() {
        let spec = PhysicalSpec {
            width_cm: Some(90.0),
            height_cm: Some(60.0),
            bleed_cm: 1.0,
            target_ppi: None,
        };
        let orientation = resolve_orientation(1, 1800, 1200);
        let g = resolve_page_geometry(&spec, &orientation).unwrap();
        assert_eq!(
            g.page_width_pt.to_milli_i64(),
            g.image_width_pt.to_milli_i64() + 2 * g.bleed_pt.to_milli_i64()
        );
        assert_eq!(
            g.page_height_pt.to_milli_i64(),
            g.image_height_pt.to_milli_i64() + 2 * g.bleed_pt.to_milli_i64()
        );
        // 92cm and 62cm in points, within a milli-point or two of quantization.
        assert!((g.page_width_pt.to_f32() - 92.0 / 2.54 * 72.0).abs() < 0.01);
        assert!((g.page_height_pt.to_f32() - 62.0 / 2.54 * 72.0).abs() < 0.01);
    }

    #[test]
    fn density_mode_uses_target_or_default() {
        let orientation = resolve_orientation(1, 1800, 1200);
        let default_spec = PhysicalSpec::default();
        let g = resolve_page_geometry(&default_spec, &orientation).unwrap();
        assert_eq!(g.image_width_pt.to_milli_i64(), 1_800_000);
        assert_eq!(g.image_height_pt.to_milli_i64(), 1_200_000);

        let at_150 = PhysicalSpec {
            target_ppi: Some(150.0),
            ..Default::default()
        };
        let g = resolve_page_geometry(&at_150, &orientation).unwrap();
        assert_eq!(g.image_width_pt.to_milli_i64(), 864_000);
        assert_eq!(g.image_height_pt.to_milli_i64(), 576_000);
    }

    #[test]
    fn single_dimension_keeps_aspect() {
        let spec = PhysicalSpec {
            width_cm: Some(90.0),
            height_cm: None,
            bleed_cm: 0.0,
            target_ppi: None,
        };
        let orientation = resolve_orientation(1, 1800, 1200);
        let g = resolve_page_geometry(&spec, &orientation).unwrap();
        assert!((g.image_height_pt.to_cm() - 60.0).abs() < 0.01);
    }

    #[test]
    fn orientation_swap_feeds_aspect_derivation() {
        let spec = PhysicalSpec {
            width_cm: Some(30.0),
            height_cm: None,
            bleed_cm: 0.0,
            target_ppi: None,
        };
        // Portrait pixels shot with a rotate-90 tag become landscape.
        let orientation = resolve_orientation(6, 1024, 1536);
        let g = resolve_page_geometry(&spec, &orientation).unwrap();
        let expect = 30.0 * 1024.0 / 1536.0;
        assert!((g.image_height_pt.to_cm() - expect).abs() < 0.01);
    }

    #[test]
    fn rejects_bad_dimensions() {
        let orientation = resolve_orientation(1, 100, 100);
        let negative_bleed = PhysicalSpec {
            bleed_cm: -0.5,
            ..Default::default()
        };
        let err = resolve_page_geometry(&negative_bleed, &orientation).unwrap_err();
        assert_eq!(err.code(), "invalid_dimension");

        let zero_width = PhysicalSpec {
            width_cm: Some(0.0),
            height_cm: Some(10.0),
            ..Default::default()
        };
        let err = resolve_page_geometry(&zero_width, &orientation).unwrap_err();
        assert_eq!(err.code(), "invalid_dimension");

        let bad_density = PhysicalSpec {
            target_ppi: Some(0.0),
            ..Default::default()
        };
        let err = resolve_page_geometry(&bad_density, &orientation).unwrap_err();
        assert_eq!(err.code(), "invalid_dimension");
    }

    #[test]
    fn pixel_transforms_match_the_table() {
        use image::{Rgba, RgbaImage};
        // 2x1: red then blue left to right.
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([0, 0, 255, 255]));
        let img = DynamicImage::ImageRgba8(img);

        let mirrored = apply_orientation(img.clone(), 2).to_rgba8();
        assert_eq!(mirrored.get_pixel(0, 0)[2], 255, "mirror puts blue first");

        let rotated = apply_orientation(img.clone(), 6).to_rgba8();
        assert_eq!(rotated.dimensions(), (1, 2));
        // Rotate 90 CW: the left column becomes the top row.
        assert_eq!(rotated.get_pixel(0, 0)[0], 255);
        assert_eq!(rotated.get_pixel(0, 1)[2], 255);

        let identity = apply_orientation(img, 1).to_rgba8();
        assert_eq!(identity.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn actual_ppi_reports_density() {
        let ppi = actual_ppi(1800, Pt::from_cm(90.0));
        let expect = 1800.0 / (90.0 / 2.54);
        assert!((ppi - expect).abs() < 0.1, "{ppi} vs {expect}");
    }
}
