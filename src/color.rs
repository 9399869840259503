use std::sync::OnceLock;

use tracing::debug;

// Substitution only ever fills a gap; pixel data is never converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    Image,
    Srgb,
}

impl ProfileSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileSource::Image => "image",
            ProfileSource::Srgb => "srgb",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorProfile {
    pub bytes: Vec<u8>,
    pub source: ProfileSource,
    pub name: String,
}

const SRGB_PROFILE_NAME: &str = "sRGB IEC61966-2.1";
const ICC_HEADER_LEN: usize = 128;

pub fn resolve_profile(embedded: Option<Vec<u8>>, enforce_srgb: bool) -> Option<ColorProfile> {
    match embedded {
        Some(bytes) if looks_like_icc(&bytes) => Some(ColorProfile {
            bytes,
            source: ProfileSource::Image,
            name: "embedded ICC".to_string(),
        }),
        Some(bytes) => {
            debug!(len = bytes.len(), "ignoring malformed embedded icc payload");
            if enforce_srgb {
                Some(srgb_color_profile())
            } else {
                None
            }
        }
        None if enforce_srgb => Some(srgb_color_profile()),
        None => None,
    }
}

fn srgb_color_profile() -> ColorProfile {
    ColorProfile {
        bytes: srgb_profile_bytes().to_vec(),
        source: ProfileSource::Srgb,
        name: SRGB_PROFILE_NAME.to_string(),
    }
}

// Racing first loads build identical bytes.
pub fn srgb_profile_bytes() -> &'static [u8] {
    static SRGB: OnceLock<Vec<u8>> = OnceLock::new();
    SRGB.get_or_init(build_srgb_profile)
}

fn looks_like_icc(bytes: &[u8]) -> bool {
    bytes.len() >= ICC_HEADER_LEN + 4 && &bytes[36..40] == b"acsp"
}

// Minimal ICC v2 matrix/TRC profile with the Bradford-adapted sRGB primaries,
// a gamma-2.2 curve and a D50 PCS. The bytes never vary between runs.
fn build_srgb_profile() -> Vec<u8> {
    let desc = text_description_tag(SRGB_PROFILE_NAME);
    let wtpt = xyz_tag([0x0000_F6D6, 0x0001_0000, 0x0000_D32D]);
    let r_xyz = xyz_tag([0x0000_6FA2, 0x0000_38F5, 0x0000_0390]);
    let g_xyz = xyz_tag([0x0000_6299, 0x0000_B785, 0x0000_18DA]);
    let b_xyz = xyz_tag([0x0000_24A0, 0x0000_0F84, 0x0000_B6CF]);
    let trc = gamma_curve_tag(0x0233); // 2.2 in u8Fixed8
    let cprt = text_tag("Public Domain");

    let bodies: [&[u8]; 7] = [&desc, &wtpt, &r_xyz, &g_xyz, &b_xyz, &trc, &cprt];
    // The three TRC tags share one curve body.
    let table: [(&[u8; 4], usize); 9] = [
        (b"desc", 0),
        (b"wtpt", 1),
        (b"rXYZ", 2),
        (b"gXYZ", 3),
        (b"bXYZ", 4),
        (b"rTRC", 5),
        (b"gTRC", 5),
        (b"bTRC", 5),
        (b"cprt", 6),
    ];

    let table_len = 4 + table.len() * 12;
    let mut offsets = [0u32; 7];
    let mut cursor = ICC_HEADER_LEN + table_len;
    for (i, body) in bodies.iter().enumerate() {
        offsets[i] = cursor as u32;
        cursor += body.len().next_multiple_of(4);
    }

    let mut profile = vec![0u8; ICC_HEADER_LEN];
    profile[8..12].copy_from_slice(&0x0210_0000u32.to_be_bytes()); // version 2.1
    profile[12..16].copy_from_slice(b"mntr");
    profile[16..20].copy_from_slice(b"RGB ");
    profile[20..24].copy_from_slice(b"XYZ ");
    // Fixed creation date; a wall-clock stamp would break embed determinism.
    for (i, v) in [2023u16, 1, 1, 0, 0, 0].into_iter().enumerate() {
        profile[24 + i * 2..26 + i * 2].copy_from_slice(&v.to_be_bytes());
    }
    profile[36..40].copy_from_slice(b"acsp");
    // D50 PCS illuminant.
    profile[68..72].copy_from_slice(&0x0000_F6D6u32.to_be_bytes());
    profile[72..76].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    profile[76..80].copy_from_slice(&0x0000_D32Du32.to_be_bytes());

    profile.extend_from_slice(&(table.len() as u32).to_be_bytes());
    for (sig, body_index) in table {
        profile.extend_from_slice(sig);
        profile.extend_from_slice(&offsets[body_index].to_be_bytes());
        profile.extend_from_slice(&(bodies[body_index].len() as u32).to_be_bytes());
    }
    for body in bodies {
        profile.extend_from_slice(body);
        profile.resize(profile.len().next_multiple_of(4), 0);
    }

    let total = profile.len() as u32;
    profile[0..4].copy_from_slice(&total.to_be_bytes());
    profile
}

// ICC desc tag; unicode and scriptcode parts left empty.
fn text_description_tag(text: &str) -> Vec<u8> {
    let mut tag = Vec::with_capacity(90 + text.len() + 1);
    tag.extend_from_slice(b"desc");
    tag.extend_from_slice(&[0u8; 4]);
    tag.extend_from_slice(&((text.len() as u32) + 1).to_be_bytes());
    tag.extend_from_slice(text.as_bytes());
    tag.push(0);
    tag.extend_from_slice(&[0u8; 4]); // unicode language
    tag.extend_from_slice(&[0u8; 4]); // unicode count
    tag.extend_from_slice(&[0u8; 2]); // scriptcode code
    tag.push(0); // macintosh count
    tag.extend_from_slice(&[0u8; 67]);
    tag
}

fn text_tag(text: &str) -> Vec<u8> {
    let mut tag = Vec::with_capacity(9 + text.len());
    tag.extend_from_slice(b"text");
    tag.extend_from_slice(&[0u8; 4]);
    tag.extend_from_slice(text.as_bytes());
    tag.push(0);
    tag
}

fn xyz_tag(values: [u32; 3]) -> Vec<u8> {
    let mut tag = Vec::with_capacity(20);
    tag.extend_from_slice(b"XYZ ");
    tag.extend_from_slice(&[0u8; 4]);
    for v in values {
        tag.extend_from_slice(&v.to_be_bytes());
    }
    tag
}

fn gamma_curve_tag(gamma_u8fixed8: u16) -> Vec<u8> {
    let mut tag = Vec::with_capacity(14);
    tag.extend_from_slice(b"curv");
    tag.extend_from_slice(&[0u8; 4]);
    tag.extend_from_slice(&1u32.to_be_bytes());
    tag.extend_from_slice(&gamma_u8fixed8.to_be_bytes());
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_profile_has_a_valid_shell() {
        let profile = srgb_profile_bytes();
        assert!(profile.len() >= 240);
        assert_eq!(profile.len() % 4, 0);
        let declared = u32::from_be_bytes(profile[0..4].try_into().unwrap());
        assert_eq!(declared as usize, profile.len());
        assert_eq!(&profile[12..16], b"mntr");
        assert_eq!(&profile[16..20], b"RGB ");
        assert_eq!(&profile[36..40], b"acsp");
    }

    #[test]
    fn synthesized_profile_tag_table_is_complete() {
        let profile = srgb_profile_bytes();
        let count = u32::from_be_bytes(profile[128..132].try_into().unwrap());
        assert_eq!(count, 9);
        let mut seen = Vec::new();
        for i in 0..count as usize {
            let base = 132 + i * 12;
            let sig = &profile[base..base + 4];
            let offset = u32::from_be_bytes(profile[base + 4..base + 8].try_into().unwrap());
            let size = u32::from_be_bytes(profile[base + 8..base + 12].try_into().unwrap());
            assert!(offset as usize + size as usize <= profile.len(), "{sig:?}");
            seen.push(sig.to_vec());
        }
        for required in [b"wtpt", b"rXYZ", b"gXYZ", b"bXYZ", b"rTRC", b"gTRC", b"bTRC"] {
            assert!(seen.iter().any(|s| s == required));
        }
    }

    #[test]
    fn trc_tags_share_one_curve() {
        let profile = srgb_profile_bytes();
        let count = u32::from_be_bytes(profile[128..132].try_into().unwrap()) as usize;
        let mut trc_offsets = Vec::new();
        for i in 0..count {
            let base = 132 + i * 12;
            if &profile[base + 1..base + 4] == b"TRC" {
                trc_offsets
                    .push(u32::from_be_bytes(profile[base + 4..base + 8].try_into().unwrap()));
            }
        }
        assert_eq!(trc_offsets.len(), 3);
        assert!(trc_offsets.windows(2).all(|w| w[0] == w[1]));
        let start = trc_offsets[0] as usize;
        assert_eq!(&profile[start..start + 4], b"curv");
    }

    #[test]
    fn cached_profile_is_loaded_once() {
        let a = srgb_profile_bytes();
        let b = srgb_profile_bytes();
        assert!(std::ptr::eq(a.as_ptr(), b.as_ptr()));
    }

    #[test]
    fn embedded_profile_wins_even_under_enforcement() {
        let mut fake = vec![0u8; 200];
        fake[36..40].copy_from_slice(b"acsp");
        let resolved = resolve_profile(Some(fake.clone()), true).unwrap();
        assert_eq!(resolved.source, ProfileSource::Image);
        assert_eq!(resolved.bytes, fake);
    }

    #[test]
    fn enforcement_fills_the_gap_with_srgb() {
        let resolved = resolve_profile(None, true).unwrap();
        assert_eq!(resolved.source, ProfileSource::Srgb);
        assert_eq!(resolved.name, SRGB_PROFILE_NAME);
        assert!(resolve_profile(None, false).is_none());
    }

    #[test]
    fn malformed_embedded_payload_is_ignored() {
        let junk = vec![1u8; 16];
        let resolved = resolve_profile(Some(junk.clone()), true).unwrap();
        assert_eq!(resolved.source, ProfileSource::Srgb);
        assert!(resolve_profile(Some(junk), false).is_none());
    }
}
