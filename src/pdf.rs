use std::io::{self, Write};

use fixed::types::I32F32;
use sha2::{Digest, Sha256};

use crate::color::ColorProfile;
use crate::geometry::{PageGeometry, placement_matrix};
use crate::types::{Color, Pt};

const PDF_CATALOG_ID: usize = 1;
const PDF_PAGES_ID: usize = 2;
const PDF_RESOURCES_ID: usize = 3;
const PDF_PAGE_ID: usize = 4;
const PDF_CONTENT_ID: usize = 5;
const PDF_IMAGE_ID: usize = 6;

// The one raster embedded in the page, already normalized to a PDF-ready
// stream: verbatim JPEG (/DCTDecode), verbatim PNG IDAT (/FlateDecode plus
// predictor parms), or zlib-compressed raw samples.
pub(crate) struct ImageStream {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub bits_per_component: u8,
    pub filter: &'static str,
    pub decode_parms: Option<String>,
    pub data: Vec<u8>,
    pub alpha: Option<AlphaStream>,
}

// Flate-compressed 8-bit alpha samples, same extent as the parent image.
pub(crate) struct AlphaStream {
    pub data: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct DocumentMeta<'a> {
    pub title: Option<&'a str>,
    pub creator: Option<&'a str>,
}

// Objects are written in a fixed order; identical inputs yield identical
// bytes.
pub(crate) fn build_single_page_pdf(
    geometry: &PageGeometry,
    orientation_exif: u8,
    background: Color,
    image: &ImageStream,
    profile: Option<&ColorProfile>,
    meta: &DocumentMeta<'_>,
) -> io::Result<Vec<u8>> {
    let mut next_id = PDF_IMAGE_ID + 1;
    let mut take_id = || {
        let id = next_id;
        next_id += 1;
        id
    };
    let smask_id = image.alpha.as_ref().map(|_| take_id());
    let (icc_id, intent_id) = match profile {
        Some(_) => (Some(take_id()), Some(take_id())),
        None => (None, None),
    };
    let info_id = take_id();
    let total_objects = info_id;

    let mut out: Vec<u8> = Vec::new();
    let mut writer = PdfWriter::new(&mut out, total_objects)?;

    let mut catalog = format!("<< /Type /Catalog /Pages {} 0 R", PDF_PAGES_ID);
    if let Some(id) = intent_id {
        catalog.push_str(&format!(" /OutputIntents [{} 0 R]", id));
    }
    catalog.push_str(" >>");
    writer.write_object(PDF_CATALOG_ID, &catalog)?;

    writer.write_object(
        PDF_PAGES_ID,
        &format!(
            "<< /Type /Pages /Kids [{} 0 R] /Count 1 >>",
            PDF_PAGE_ID
        ),
    )?;

    writer.write_object(
        PDF_RESOURCES_ID,
        &format!("<< /XObject << /Im0 {} 0 R >> >>", PDF_IMAGE_ID),
    )?;

    writer.write_object(
        PDF_PAGE_ID,
        &format!(
            "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] /Resources {} 0 R /Contents {} 0 R >>",
            PDF_PAGES_ID,
            fmt_pt(geometry.page_width_pt),
            fmt_pt(geometry.page_height_pt),
            PDF_RESOURCES_ID,
            PDF_CONTENT_ID,
        ),
    )?;

    let content = content_stream(geometry, orientation_exif, background);
    writer.write_object(PDF_CONTENT_ID, &stream_object(&content))?;

    writer.write_binary_stream(
        PDF_IMAGE_ID,
        &image_dict(image, icc_id, smask_id),
        &image.data,
    )?;

    if let (Some(id), Some(alpha)) = (smask_id, image.alpha.as_ref()) {
        let dict = format!(
            "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceGray /BitsPerComponent 8 /Length {} /Filter /FlateDecode >>",
            image.width,
            image.height,
            alpha.data.len(),
        );
        writer.write_binary_stream(id, &dict, &alpha.data)?;
    }

    if let (Some(icc), Some(intent), Some(profile)) = (icc_id, intent_id, profile) {
        let compressed = flate_compress(&profile.bytes);
        let dict = format!(
            "<< /N {} /Alternate {} /Length {} /Filter /FlateDecode >>",
            icc_component_count(&profile.bytes),
            icc_alternate_space(&profile.bytes),
            compressed.len(),
        );
        writer.write_binary_stream(icc, &dict, &compressed)?;
        writer.write_object(intent, &output_intent_object(profile, icc))?;
    }

    writer.write_object(info_id, &info_object(meta))?;

    let document_id = document_id_hex(image, &content);
    writer.finish(PDF_CATALOG_ID, info_id, &document_id)?;
    Ok(out)
}

// Background fill first, then the artwork through its placement matrix.
fn content_stream(geometry: &PageGeometry, orientation_exif: u8, background: Color) -> String {
    let [a, b, c, d, e, f] = placement_matrix(orientation_exif, geometry.image_box());
    let mut out = String::new();
    out.push_str("q\n");
    out.push_str(&format!(
        "{} {} {} rg\n",
        fmt(background.r),
        fmt(background.g),
        fmt(background.b)
    ));
    out.push_str(&format!(
        "0 0 {} {} re\nf\nQ\n",
        fmt_pt(geometry.page_width_pt),
        fmt_pt(geometry.page_height_pt)
    ));
    out.push_str("q\n");
    out.push_str(&format!(
        "{} {} {} {} {} {} cm\n",
        fmt(a),
        fmt(b),
        fmt(c),
        fmt(d),
        fmt(e),
        fmt(f)
    ));
    out.push_str("/Im0 Do\nQ");
    out
}

fn image_dict(image: &ImageStream, icc_id: Option<usize>, smask_id: Option<usize>) -> String {
    let color_space = match icc_id {
        Some(id) if image.color_space == "/DeviceRGB" => format!("[/ICCBased {} 0 R]", id),
        _ => image.color_space.to_string(),
    };
    let parms = image
        .decode_parms
        .as_deref()
        .map(|p| format!(" /DecodeParms {}", p))
        .unwrap_or_default();
    let smask = smask_id
        .map(|id| format!(" /SMask {} 0 R", id))
        .unwrap_or_default();
    format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace {} /BitsPerComponent {} /Length {} /Filter {}{}{} >>",
        image.width,
        image.height,
        color_space,
        image.bits_per_component,
        image.data.len(),
        image.filter,
        parms,
        smask,
    )
}

fn output_intent_object(profile: &ColorProfile, icc_id: usize) -> String {
    let mut dict = format!(
        "<< /Type /OutputIntent /S /GTS_PDFA1 /DestOutputProfile {} 0 R /OutputConditionIdentifier ({}) /OutputCondition ({})",
        icc_id,
        escape_pdf_string(&profile.name),
        escape_pdf_string(&profile.name),
    );
    dict.push_str(" /RegistryName (http://www.color.org)");
    dict.push_str(&format!(
        " /Info ({})",
        escape_pdf_string(&profile.name)
    ));
    dict.push_str(" >>");
    dict
}

fn info_object(meta: &DocumentMeta<'_>) -> String {
    let mut entries: Vec<String> = Vec::new();
    if let Some(title) = meta.title {
        entries.push(format!("/Title ({})", escape_pdf_string(title)));
    }
    if let Some(creator) = meta.creator {
        entries.push(format!("/Creator ({})", escape_pdf_string(creator)));
    }
    entries.push("/Producer (pressproof)".to_string());
    format!("<< {} >>", entries.join(" "))
}

// /N for the ICC stream, read off the profile's data color space field.
fn icc_component_count(profile: &[u8]) -> u8 {
    match profile.get(16..20) {
        Some(b"GRAY") => 1,
        Some(b"CMYK") => 4,
        _ => 3,
    }
}

fn icc_alternate_space(profile: &[u8]) -> &'static str {
    match icc_component_count(profile) {
        1 => "/DeviceGray",
        4 => "/DeviceCMYK",
        _ => "/DeviceRGB",
    }
}

// Trailer /ID, derived from the payload.
fn document_id_hex(image: &ImageStream, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&image.data);
    if let Some(alpha) = image.alpha.as_ref() {
        hasher.update(&alpha.data);
    }
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{:02X}", b)).collect()
}

struct PdfWriter<'a, W: Write> {
    writer: &'a mut W,
    offset: usize,
    offsets: Vec<usize>, // index by object id; 0 is the free object.
    total_objects: usize,
}

impl<'a, W: Write> PdfWriter<'a, W> {
    fn new(writer: &'a mut W, total_objects: usize) -> io::Result<Self> {
        let mut offset = 0;
        write_bytes(writer, b"%PDF-1.7\n", &mut offset)?;
        write_bytes(writer, b"%\xE2\xE3\xCF\xD3\n", &mut offset)?;
        Ok(Self {
            writer,
            offset,
            offsets: vec![0; total_objects + 1],
            total_objects,
        })
    }

    fn begin_object(&mut self, obj_id: usize) -> io::Result<()> {
        self.offsets[obj_id] = self.offset;
        write_str(self.writer, &format!("{} 0 obj\n", obj_id), &mut self.offset)
    }

    fn write_object(&mut self, obj_id: usize, body: &str) -> io::Result<()> {
        self.begin_object(obj_id)?;
        write_str(self.writer, body, &mut self.offset)?;
        write_str(self.writer, "\nendobj\n", &mut self.offset)
    }

    fn write_binary_stream(&mut self, obj_id: usize, dict: &str, data: &[u8]) -> io::Result<()> {
        self.begin_object(obj_id)?;
        write_str(self.writer, dict, &mut self.offset)?;
        write_str(self.writer, "\nstream\n", &mut self.offset)?;
        write_bytes(self.writer, data, &mut self.offset)?;
        write_str(self.writer, "\nendstream\nendobj\n", &mut self.offset)
    }

    fn finish(&mut self, root_id: usize, info_id: usize, document_id: &str) -> io::Result<()> {
        let xref_start = self.offset;
        write_str(
            self.writer,
            &format!("xref\n0 {}\n", self.total_objects + 1),
            &mut self.offset,
        )?;
        write_bytes(self.writer, b"0000000000 65535 f \n", &mut self.offset)?;
        for id in 1..=self.total_objects {
            let obj_offset = self.offsets.get(id).copied().unwrap_or(0);
            write_str(
                self.writer,
                &format!("{:010} 00000 n \n", obj_offset),
                &mut self.offset,
            )?;
        }
        let trailer = format!(
            "trailer\n<< /Size {} /Root {} 0 R /Info {} 0 R /ID [<{}> <{}>] >>\nstartxref\n{}\n%%EOF",
            self.total_objects + 1,
            root_id,
            info_id,
            document_id,
            document_id,
            xref_start
        );
        write_str(self.writer, &trailer, &mut self.offset)
    }
}

fn stream_object(content: &str) -> String {
    let length = content.as_bytes().len();
    format!("<< /Length {} >>\nstream\n{}\nendstream", length, content)
}

pub(crate) fn flate_compress(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

fn write_bytes<W: Write>(writer: &mut W, data: &[u8], offset: &mut usize) -> io::Result<()> {
    writer.write_all(data)?;
    *offset += data.len();
    Ok(())
}

fn write_str<W: Write>(writer: &mut W, data: &str, offset: &mut usize) -> io::Result<()> {
    write_bytes(writer, data.as_bytes(), offset)
}

fn escape_pdf_string(input: &str) -> String {
    let mut out = String::new();
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

fn fmt(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let fixed = I32F32::from_num(value);
    let scaled = (fixed * I32F32::from_num(1000)).round();
    let milli: i64 = scaled.to_num();
    format_milli(milli)
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli_i64())
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let mut s = format!("{}{}.{:03}", sign, int_part, frac_part);
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::resolve_profile;
    use crate::geometry::{PhysicalSpec, resolve_orientation, resolve_page_geometry};

    fn sample_geometry() -> PageGeometry {
        let spec = PhysicalSpec {
            width_cm: Some(10.0),
            height_cm: Some(15.0),
            bleed_cm: 0.5,
            target_ppi: None,
        };
        let orientation = resolve_orientation(1, 200, 300);
        resolve_page_geometry(&spec, &orientation).unwrap()
    }

    fn sample_image() -> ImageStream {
        let rgb: Vec<u8> = (0..200u32 * 300 * 3).map(|i| (i % 251) as u8).collect();
        ImageStream {
            width: 200,
            height: 300,
            color_space: "/DeviceRGB",
            bits_per_component: 8,
            filter: "/FlateDecode",
            decode_parms: None,
            data: flate_compress(&rgb),
            alpha: None,
        }
    }

    #[test]
    fn builds_a_loadable_single_page_document() {
        let geometry = sample_geometry();
        let image = sample_image();
        let profile = resolve_profile(None, true);
        let bytes = build_single_page_pdf(
            &geometry,
            1,
            Color::WHITE,
            &image,
            profile.as_ref(),
            &DocumentMeta::default(),
        )
        .unwrap();

        assert!(bytes.starts_with(b"%PDF-1.7"));
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let catalog = doc.catalog().unwrap();
        assert!(catalog.get(b"OutputIntents").is_ok());
    }

    fn number(obj: &lopdf::Object) -> f32 {
        obj.as_float()
            .ok()
            .or_else(|| obj.as_i64().ok().map(|v| v as f32))
            .unwrap()
    }

    #[test]
    fn media_box_matches_geometry() {
        let geometry = sample_geometry();
        let image = sample_image();
        let bytes = build_single_page_pdf(
            &geometry,
            1,
            Color::WHITE,
            &image,
            None,
            &DocumentMeta::default(),
        )
        .unwrap();
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        let (_, &page_id) = doc.get_pages().iter().next().unwrap();
        let page = doc.get_dictionary(page_id).unwrap();
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        let w = number(&media_box[2]);
        let h = number(&media_box[3]);
        assert!((w - geometry.page_width_pt.to_f32()).abs() < 0.01);
        assert!((h - geometry.page_height_pt.to_f32()).abs() < 0.01);
    }

    #[test]
    fn content_stream_places_image_behind_matrix() {
        let geometry = sample_geometry();
        let content = content_stream(&geometry, 6, Color::rgb(1.0, 0.5, 0.0));
        assert!(content.contains("re\nf\n"), "{content}");
        assert!(content.contains("/Im0 Do"), "{content}");
        let [a, b, c, d, e, f] = placement_matrix(6, geometry.image_box());
        let expect = format!(
            "{} {} {} {} {} {} cm",
            fmt(a),
            fmt(b),
            fmt(c),
            fmt(d),
            fmt(e),
            fmt(f)
        );
        assert!(content.contains(&expect), "{content} missing {expect}");
    }

    #[test]
    fn identical_inputs_produce_identical_bytes() {
        let geometry = sample_geometry();
        let image_a = sample_image();
        let image_b = sample_image();
        let meta = DocumentMeta {
            title: Some("poster"),
            creator: Some("unit-test"),
        };
        let a = build_single_page_pdf(&geometry, 3, Color::WHITE, &image_a, None, &meta).unwrap();
        let b = build_single_page_pdf(&geometry, 3, Color::WHITE, &image_b, None, &meta).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn smask_and_predictor_entries_appear_when_present() {
        let geometry = sample_geometry();
        let alpha: Vec<u8> = vec![200u8; 200 * 300];
        let rgb: Vec<u8> = vec![10u8; 200 * 300 * 3];
        let image = ImageStream {
            width: 200,
            height: 300,
            color_space: "/DeviceRGB",
            bits_per_component: 8,
            filter: "/FlateDecode",
            decode_parms: Some(
                "<< /Predictor 15 /Colors 3 /BitsPerComponent 8 /Columns 200 >>".to_string(),
            ),
            data: flate_compress(&rgb),
            alpha: Some(AlphaStream {
                data: flate_compress(&alpha),
            }),
        };
        let bytes = build_single_page_pdf(
            &geometry,
            1,
            Color::WHITE,
            &image,
            None,
            &DocumentMeta::default(),
        )
        .unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/SMask"));
        assert!(text.contains("/Predictor 15"));
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn format_milli_trims_zeros() {
        assert_eq!(fmt(1.5), "1.5");
        assert_eq!(fmt(0.0), "0");
        assert_eq!(fmt(-2.25), "-2.25");
        assert_eq!(fmt_pt(Pt::from_f32(28.346)), "28.346");
        assert_eq!(fmt_pt(Pt::from_f32(72.0)), "72");
    }

    #[test]
    fn escapes_reserved_characters_in_strings() {
        assert_eq!(escape_pdf_string("a(b)c\\d"), "a\\(b\\)c\\\\d");
    }
}
