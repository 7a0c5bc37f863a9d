//! The self contained font blob the rasterizer produces and the font cache stores. Every
//! region is addressed relative to the start of the blob so it works wherever it is mapped.
use crate::format::{write_records, Glyph, KernPair, LigaturePair, Record, Table, UnicodeInterval};
use crate::glyph_store::{FontMetrics, GlyphStore};
use crate::kerning::Kerning;
use alloc::vec::Vec;
use inkleaf_embedded::FLASH_BINCODE_CONFIG;

pub const BLOB_HEADER_SIZE: usize = 30;

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub bitmap_size: u32,
    pub glyph_count: u32,
    pub interval_count: u32,
    pub kern_pair_count: u32,
    pub ligature_pair_count: u32,
    pub advance_y: u8,
    pub ascender: i32,
    pub descender: i32,
    pub is_2bit: u8,
}

#[derive(Debug)]
pub enum BlobError {
    Header(bincode::error::DecodeError),
    Truncated { region: &'static str },
    TooLarge { region: &'static str },
}

impl core::fmt::Display for BlobError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BlobError::Header(e) => write!(f, "font blob header could not be decoded: {e}"),
            BlobError::Truncated { region } => {
                write!(f, "font blob ends before its {region} region does")
            }
            BlobError::TooLarge { region } => {
                write!(f, "font blob {region} region does not fit in 32 bits")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BlobError {}

/// Owned contents of a font blob.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FontBlob {
    pub metrics: FontMetrics,
    pub bitmap: Vec<u8>,
    pub glyphs: Vec<Glyph>,
    pub intervals: Vec<UnicodeInterval>,
    pub kern_pairs: Vec<KernPair>,
    pub ligatures: Vec<LigaturePair>,
}

fn count(len: usize, region: &'static str) -> Result<u32, BlobError> {
    u32::try_from(len).map_err(|_| BlobError::TooLarge { region })
}

impl FontBlob {
    pub fn header(&self) -> Result<BlobHeader, BlobError> {
        Ok(BlobHeader {
            bitmap_size: count(self.bitmap.len(), "bitmap")?,
            glyph_count: count(self.glyphs.len(), "glyph")?,
            interval_count: count(self.intervals.len(), "interval")?,
            kern_pair_count: count(self.kern_pairs.len(), "kerning")?,
            ligature_pair_count: count(self.ligatures.len(), "ligature")?,
            advance_y: self.metrics.advance_y,
            ascender: self.metrics.ascender,
            descender: self.metrics.descender,
            is_2bit: self.metrics.is_2bit as u8,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BlobError> {
        let header = self.header()?;
        let mut out = bincode::encode_to_vec(header, FLASH_BINCODE_CONFIG)
            .map_err(|_| BlobError::TooLarge { region: "header" })?;
        debug_assert_eq!(out.len(), BLOB_HEADER_SIZE);
        out.extend_from_slice(&self.bitmap);
        out.extend_from_slice(&write_records(&self.glyphs));
        out.extend_from_slice(&write_records(&self.intervals));
        out.extend_from_slice(&write_records(&self.kern_pairs));
        out.extend_from_slice(&write_records(&self.ligatures));
        Ok(out)
    }

    /// Copies a store's tables back out. Class based kerning is not representable in a blob and
    /// is dropped.
    pub fn from_store(store: &GlyphStore<'_>) -> Self {
        FontBlob {
            metrics: store.metrics(),
            bitmap: store.bitmap().to_vec(),
            glyphs: store.glyph_table().iter().collect(),
            intervals: store.interval_table().iter().collect(),
            kern_pairs: match store.kerning_table() {
                Kerning::Pairs(pairs) => pairs.iter().collect(),
                _ => Vec::new(),
            },
            ligatures: store.ligature_table().iter().collect(),
        }
    }
}

pub fn parse_header(bytes: &[u8]) -> Result<BlobHeader, BlobError> {
    let header = bytes
        .get(..BLOB_HEADER_SIZE)
        .ok_or(BlobError::Truncated { region: "header" })?;
    let (header, _) = bincode::decode_from_slice(header, FLASH_BINCODE_CONFIG)
        .map_err(BlobError::Header)?;
    Ok(header)
}

fn take_table<'a, R: Record>(
    rest: &mut &'a [u8],
    count: u32,
    region: &'static str,
) -> Result<Table<'a, R>, BlobError> {
    let table = Table::new(rest, count as usize).ok_or(BlobError::Truncated { region })?;
    *rest = &rest[table.byte_len()..];
    Ok(table)
}

/// A view over a serialized blob. Every region is bounds checked up front.
pub fn parse(bytes: &[u8]) -> Result<GlyphStore<'_>, BlobError> {
    let header = parse_header(bytes)?;
    let mut rest = &bytes[BLOB_HEADER_SIZE..];
    let bitmap = rest
        .get(..header.bitmap_size as usize)
        .ok_or(BlobError::Truncated { region: "bitmap" })?;
    rest = &rest[bitmap.len()..];
    let glyphs = take_table::<Glyph>(&mut rest, header.glyph_count, "glyph")?;
    let intervals = take_table::<UnicodeInterval>(&mut rest, header.interval_count, "interval")?;
    let kern_pairs = take_table::<KernPair>(&mut rest, header.kern_pair_count, "kerning")?;
    let ligatures = take_table::<LigaturePair>(&mut rest, header.ligature_pair_count, "ligature")?;

    let metrics = FontMetrics {
        advance_y: header.advance_y,
        ascender: header.ascender,
        descender: header.descender,
        is_2bit: header.is_2bit != 0,
    };
    let kerning = if kern_pairs.is_empty() {
        Kerning::None
    } else {
        Kerning::Pairs(kern_pairs)
    };
    Ok(GlyphStore::new(bitmap, glyphs, intervals, metrics)
        .with_kerning(kerning)
        .with_ligatures(ligatures))
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> FontBlob {
        FontBlob {
            metrics: FontMetrics {
                advance_y: 25,
                ascender: 19,
                descender: -6,
                is_2bit: true,
            },
            bitmap: vec![0xde, 0xad, 0xbe, 0xef, 0x01],
            glyphs: vec![
                Glyph {
                    width: 2,
                    height: 2,
                    advance: 40,
                    left: 0,
                    top: 2,
                    data_length: 2,
                    data_offset: 0,
                },
                Glyph {
                    width: 3,
                    height: 3,
                    advance: 56,
                    left: -1,
                    top: 3,
                    data_length: 3,
                    data_offset: 2,
                },
            ],
            intervals: vec![UnicodeInterval {
                first: 'a' as u32,
                last: 'b' as u32,
                offset: 0,
            }],
            kern_pairs: vec![KernPair {
                pair: ('a' as u32) << 16 | 'b' as u32,
                adjust: -5,
            }],
            ligatures: vec![LigaturePair {
                pair: ('a' as u32) << 16 | 'b' as u32,
                ligature: 0xFB01,
            }],
        }
    }

    #[test]
    fn header_is_packed() {
        let blob = sample();
        let bytes = blob.to_bytes().unwrap();
        assert_eq!(
            bytes.len(),
            BLOB_HEADER_SIZE + 5 + 2 * 16 + 12 + 5 + 8
        );
        assert_eq!(&bytes[..4], &5u32.to_le_bytes());
        assert_eq!(bytes[20], 25);
        assert_eq!(&bytes[25..29], &(-6i32).to_le_bytes());
        assert_eq!(bytes[29], 1);
    }

    #[test]
    fn round_trip() {
        let blob = sample();
        let bytes = blob.to_bytes().unwrap();
        let store = parse(&bytes).unwrap();
        assert_eq!(FontBlob::from_store(&store), blob);
        assert_eq!(store.kerning('a' as u32, 'b' as u32), -5);
        assert_eq!(store.ligature('a' as u32, 'b' as u32), Some(0xFB01));

        let empty = FontBlob::default();
        let bytes = empty.to_bytes().unwrap();
        assert_eq!(bytes.len(), BLOB_HEADER_SIZE);
        let store = parse(&bytes).unwrap();
        assert!(matches!(store.kerning_table(), Kerning::None));
        assert_eq!(FontBlob::from_store(&store), empty);
    }

    #[test]
    fn truncation_is_detected() {
        let bytes = sample().to_bytes().unwrap();
        for cut in [0, 10, BLOB_HEADER_SIZE + 3, bytes.len() - 1] {
            assert!(parse(&bytes[..cut]).is_err(), "cut at {cut}");
        }
        let err = parse(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, BlobError::Truncated { region: "ligature" }));
    }
}
