use lopdf::{Document as LoDocument, Object as LoObject, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PressProofError, Result};
use crate::types::{MM_PER_INCH, POINTS_PER_INCH};

// All in centimeters; the printable area is the page minus the margin on
// each side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateOptions {
    pub expected_page_width_cm: f32,
    pub expected_page_height_cm: f32,
    pub expected_area_width_cm: f32,
    pub expected_area_height_cm: f32,
    pub margin_cm: f32,
    pub tolerance_mm: f32,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            expected_page_width_cm: 0.0,
            expected_page_height_cm: 0.0,
            expected_area_width_cm: 0.0,
            expected_area_height_cm: 0.0,
            margin_cm: 0.0,
            tolerance_mm: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PageMeasurements {
    pub page_width_mm: f32,
    pub page_height_mm: f32,
    pub area_width_mm: f32,
    pub area_height_mm: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub expected: PageMeasurements,
    pub measured: PageMeasurements,
    pub deltas_mm: PageMeasurements,
}

pub fn validate_pdf_bytes(data: &[u8], options: &ValidateOptions) -> Result<ValidationReport> {
    let doc =
        LoDocument::load_mem(data).map_err(|e| PressProofError::PdfParseFailed(e.to_string()))?;
    let page_id = doc
        .get_pages()
        .into_iter()
        .next()
        .map(|(_, id)| id)
        .ok_or(PressProofError::PdfPageMissing)?;
    let (page_width_pt, page_height_pt) = page_size(&doc, page_id)?;

    let margin_mm = options.margin_cm * 10.0;
    let measured = PageMeasurements {
        page_width_mm: pt_to_mm(page_width_pt),
        page_height_mm: pt_to_mm(page_height_pt),
        area_width_mm: pt_to_mm(page_width_pt) - 2.0 * margin_mm,
        area_height_mm: pt_to_mm(page_height_pt) - 2.0 * margin_mm,
    };
    let expected = PageMeasurements {
        page_width_mm: options.expected_page_width_cm * 10.0,
        page_height_mm: options.expected_page_height_cm * 10.0,
        area_width_mm: options.expected_area_width_cm * 10.0,
        area_height_mm: options.expected_area_height_cm * 10.0,
    };
    let deltas_mm = PageMeasurements {
        page_width_mm: measured.page_width_mm - expected.page_width_mm,
        page_height_mm: measured.page_height_mm - expected.page_height_mm,
        area_width_mm: measured.area_width_mm - expected.area_width_mm,
        area_height_mm: measured.area_height_mm - expected.area_height_mm,
    };
    let ok = [
        deltas_mm.page_width_mm,
        deltas_mm.page_height_mm,
        deltas_mm.area_width_mm,
        deltas_mm.area_height_mm,
    ]
    .iter()
    .all(|d| d.abs() <= options.tolerance_mm);

    debug!(
        ok,
        page_width_mm = measured.page_width_mm,
        page_height_mm = measured.page_height_mm,
        tolerance_mm = options.tolerance_mm,
        "validated page geometry"
    );
    Ok(ValidationReport {
        ok,
        expected,
        measured,
        deltas_mm,
    })
}

// MediaBox may be inherited, so walk the Parent chain from the page.
fn page_size(doc: &LoDocument, mut id: ObjectId) -> Result<(f32, f32)> {
    loop {
        let dict = doc
            .get_object(id)
            .and_then(LoObject::as_dict)
            .map_err(|e| PressProofError::PdfParseFailed(e.to_string()))?;
        if let Ok(arr) = dict.get(b"MediaBox").and_then(LoObject::as_array) {
            if let Some(size) = parse_media_box_array(arr) {
                return Ok(size);
            }
        }
        id = match dict.get(b"Parent").and_then(LoObject::as_reference) {
            Ok(parent_id) => parent_id,
            Err(_) => break,
        };
    }
    Err(PressProofError::PdfParseFailed(
        "first page has no MediaBox".to_string(),
    ))
}

fn parse_media_box_array(arr: &[LoObject]) -> Option<(f32, f32)> {
    if arr.len() < 4 {
        return None;
    }
    let x0 = obj_to_f32(&arr[0])?;
    let y0 = obj_to_f32(&arr[1])?;
    let x1 = obj_to_f32(&arr[2])?;
    let y1 = obj_to_f32(&arr[3])?;
    Some(((x1 - x0).abs(), (y1 - y0).abs()))
}

fn obj_to_f32(obj: &LoObject) -> Option<f32> {
    if let Ok(v) = obj.as_float() {
        return Some(v);
    }
    obj.as_i64().ok().map(|v| v as f32)
}

fn pt_to_mm(pt: f32) -> f32 {
    pt * MM_PER_INCH / POINTS_PER_INCH
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};
    use lopdf::dictionary;

    use crate::embed::{EmbedOptions, embed_image};

    fn produced_pdf() -> Vec<u8> {
        let image = RgbImage::from_pixel(40, 30, Rgb([120, 90, 200]));
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        let options = EmbedOptions {
            width_cm: Some(4.0),
            height_cm: Some(3.0),
            bleed_cm: 0.5,
            ..Default::default()
        };
        embed_image(&png, &options).unwrap().pdf
    }

    fn matching_options() -> ValidateOptions {
        ValidateOptions {
            expected_page_width_cm: 5.0,
            expected_page_height_cm: 4.0,
            expected_area_width_cm: 4.0,
            expected_area_height_cm: 3.0,
            margin_cm: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn produced_pdf_passes_within_tolerance() {
        let report = validate_pdf_bytes(&produced_pdf(), &matching_options()).unwrap();
        assert!(report.ok, "{report:?}");
        assert!((report.measured.page_width_mm - 50.0).abs() < 0.1);
        assert!((report.measured.area_height_mm - 30.0).abs() < 0.1);
        assert!(report.deltas_mm.page_width_mm.abs() < 0.1);
    }

    #[test]
    fn off_by_more_than_tolerance_fails() {
        let options = ValidateOptions {
            expected_page_width_cm: 5.2,
            ..matching_options()
        };
        let report = validate_pdf_bytes(&produced_pdf(), &options).unwrap();
        assert!(!report.ok);
        assert!((report.deltas_mm.page_width_mm + 2.0).abs() < 0.1);
        // The other axes still line up.
        assert!(report.deltas_mm.page_height_mm.abs() < 0.1);
    }

    #[test]
    fn tolerance_is_configurable() {
        let options = ValidateOptions {
            expected_page_width_cm: 5.2,
            tolerance_mm: 3.0,
            ..matching_options()
        };
        let report = validate_pdf_bytes(&produced_pdf(), &options).unwrap();
        assert!(report.ok);
    }

    #[test]
    fn garbage_bytes_are_a_parse_failure() {
        let err = validate_pdf_bytes(b"not a pdf at all", &ValidateOptions::default()).unwrap_err();
        assert_eq!(err.code(), "pdf_parse_failed");
    }

    #[test]
    fn document_without_pages_is_page_missing() {
        let mut doc = LoDocument::with_version("1.7");
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<LoObject>::new(),
            "Count" => 0,
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut Cursor::new(&mut bytes)).unwrap();

        let err = validate_pdf_bytes(&bytes, &ValidateOptions::default()).unwrap_err();
        assert_eq!(err.code(), "pdf_page_missing");
    }

    #[test]
    fn media_box_walks_to_the_parent_node() {
        let mut doc = LoDocument::with_version("1.7");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                LoObject::Real(141.732),
                LoObject::Real(113.386),
            ],
        };
        doc.objects.insert(pages_id, LoObject::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut Cursor::new(&mut bytes)).unwrap();

        let options = ValidateOptions {
            expected_page_width_cm: 5.0,
            expected_page_height_cm: 4.0,
            expected_area_width_cm: 5.0,
            expected_area_height_cm: 4.0,
            ..Default::default()
        };
        let report = validate_pdf_bytes(&bytes, &options).unwrap();
        assert!(report.ok, "{report:?}");
    }
}
