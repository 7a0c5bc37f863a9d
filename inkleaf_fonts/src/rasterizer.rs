//! On-device conversion of a TrueType or OpenType font into a 2 bit font blob.
use crate::blob::{BlobError, FontBlob};
use crate::fixed::from_f32_floor;
use crate::format::{Glyph, UnicodeInterval};
use crate::glyph_store::FontMetrics;
use crate::opentype::{self, merge_adjustment, GlyphMap};
use std::collections::BTreeMap;
use std::vec::Vec;
use tracing::{event, Level};
use ttf_parser::{Face, GlyphId, OutlineBuilder, Rect, Tag};

/// Codepoint ranges a blob is built from. Only codepoints the font maps are emitted.
pub const SUB_RANGES: [(u32, u32); 12] = [
    (0x0000, 0x007F),
    (0x0080, 0x00FF),
    (0x0100, 0x017F),
    (0x0300, 0x036F),
    (0x0400, 0x04FF),
    (0x2000, 0x206F),
    (0x2070, 0x209F),
    (0x20A0, 0x20CF),
    (0x2190, 0x21FF),
    (0x2200, 0x22FF),
    (0xFB00, 0xFB06),
    (0xFFFD, 0xFFFD),
];

const RENDER_DPI: f32 = 150.0;
const POINTS_PER_INCH: f32 = 72.0;
const PROGRESS_INTERVAL: usize = 64;

#[derive(Debug)]
pub enum RasterizeError {
    Parse(ttf_parser::FaceParsingError),
    /// hhea ascender and descender do not span a positive height
    NoVerticalMetrics,
    Blob(BlobError),
}

impl core::fmt::Display for RasterizeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RasterizeError::Parse(e) => write!(f, "font could not be parsed: {e}"),
            RasterizeError::NoVerticalMetrics => {
                write!(f, "font has no usable ascender and descender")
            }
            RasterizeError::Blob(e) => write!(f, "font blob could not be serialized: {e}"),
        }
    }
}

impl std::error::Error for RasterizeError {}

impl From<BlobError> for RasterizeError {
    fn from(e: BlobError) -> Self {
        RasterizeError::Blob(e)
    }
}

/// Rasterizes `font` at nominal `size` and serializes the blob. `progress` receives 0 to 100.
pub fn rasterize(
    font: &[u8],
    size: u16,
    mut progress: impl FnMut(u8),
) -> Result<Vec<u8>, RasterizeError> {
    let blob = rasterize_blob(font, size, &mut progress)?;
    let bytes = blob.to_bytes()?;
    progress(100);
    Ok(bytes)
}

pub fn rasterize_blob(
    font: &[u8],
    size: u16,
    mut progress: impl FnMut(u8),
) -> Result<FontBlob, RasterizeError> {
    let face = Face::parse(font, 0).map_err(RasterizeError::Parse)?;
    let ascender = face.ascender() as f32;
    let descender = face.descender() as f32;
    let height = ascender - descender;
    if height <= 0.0 {
        return Err(RasterizeError::NoVerticalMetrics);
    }
    let ppem = size as f32 * RENDER_DPI / POINTS_PER_INCH;
    let scale = ppem / height;
    let metrics = FontMetrics {
        advance_y: ((height + face.line_gap() as f32) * scale)
            .ceil()
            .clamp(0.0, u8::MAX as f32) as u8,
        ascender: (ascender * scale).ceil() as i32,
        descender: (descender * scale).floor() as i32,
        is_2bit: true,
    };

    let total: usize = SUB_RANGES
        .iter()
        .map(|(first, last)| (last - first + 1) as usize)
        .sum();
    let mut glyph_map = GlyphMap::new();
    let mut codepoints = Vec::new();
    let mut glyphs = Vec::new();
    let mut bitmap = Vec::new();
    let mut done = 0;
    for (first, last) in SUB_RANGES {
        for cp in first..=last {
            done += 1;
            if done % PROGRESS_INTERVAL == 0 {
                progress((done * 80 / total) as u8);
            }
            let Some(id) = char::from_u32(cp)
                .and_then(|c| face.glyph_index(c))
                .filter(|id| id.0 != 0)
            else {
                continue;
            };
            glyph_map.insert(cp, id.0);
            codepoints.push(cp);
            glyphs.push(render_glyph(&face, id, scale, &mut bitmap));
        }
    }
    progress(80);

    let intervals = build_intervals(&codepoints);

    let mut raw_kerning = face
        .raw_face()
        .table(Tag::from_bytes(b"GPOS"))
        .map(|gpos| opentype::kerning_design_units(gpos, &glyph_map))
        .unwrap_or_default();
    if raw_kerning.is_empty() {
        raw_kerning = legacy_kerning(&face, &glyph_map, &codepoints);
    }
    let kern_pairs = opentype::scale_kerning(&raw_kerning, scale);
    progress(90);

    let ligatures = face
        .raw_face()
        .table(Tag::from_bytes(b"GSUB"))
        .map(|gsub| opentype::ligatures(gsub, &glyph_map))
        .unwrap_or_default();
    progress(95);

    event!(
        Level::DEBUG,
        size,
        glyphs = glyphs.len(),
        intervals = intervals.len(),
        kern_pairs = kern_pairs.len(),
        ligatures = ligatures.len(),
        bitmap_bytes = bitmap.len(),
        "rasterized font"
    );

    Ok(FontBlob {
        metrics,
        bitmap,
        glyphs,
        intervals,
        kern_pairs,
        ligatures,
    })
}

/// Pixel box of a glyph outline, `(x0, y0, x1, y1)` with y growing downward from the baseline.
pub fn glyph_box(bbox: Rect, scale: f32) -> (i32, i32, i32, i32) {
    (
        (bbox.x_min as f32 * scale).floor() as i32,
        (-(bbox.y_max as f32) * scale).floor() as i32,
        (bbox.x_max as f32 * scale).ceil() as i32,
        (-(bbox.y_min as f32) * scale).ceil() as i32,
    )
}

fn render_glyph(face: &Face<'_>, id: GlyphId, scale: f32, bitmap: &mut Vec<u8>) -> Glyph {
    let advance = face
        .glyph_hor_advance(id)
        .map(|aw| from_f32_floor(aw as f32 * scale).clamp(0, u16::MAX as i32) as u16)
        .unwrap_or(0);
    let mut glyph = Glyph {
        advance,
        data_offset: bitmap.len() as u32,
        ..Glyph::default()
    };
    let Some(bbox) = face.glyph_bounding_box(id) else {
        return glyph;
    };
    let (x0, y0, x1, y1) = glyph_box(bbox, scale);
    let width = (x1 - x0).clamp(0, u8::MAX as i32) as u32;
    let height = (y1 - y0).clamp(0, u8::MAX as i32) as u32;
    glyph.left = x0 as i16;
    glyph.top = -y0 as i16;

    if let Some(alpha) = render_alpha(face, id, scale, x0, y0, width, height) {
        glyph.width = width as u8;
        glyph.height = height as u8;
        for row in alpha.chunks_exact(width as usize) {
            pack_2bit_row(row, bitmap);
        }
        glyph.data_length = (bitmap.len() as u32 - glyph.data_offset) as u16;
    }
    glyph
}

/// 8 bit coverage of a glyph's outline over its pixel box.
fn render_alpha(
    face: &Face<'_>,
    id: GlyphId,
    scale: f32,
    x0: i32,
    y0: i32,
    width: u32,
    height: u32,
) -> Option<Vec<u8>> {
    let mut pixmap = tiny_skia::Pixmap::new(width, height)?;
    let mut builder = PixelPath {
        builder: tiny_skia::PathBuilder::new(),
        scale,
        x0: x0 as f32,
        y0: y0 as f32,
    };
    face.outline_glyph(id, &mut builder)?;
    let path = builder.builder.finish()?;
    let mut paint = tiny_skia::Paint::default();
    paint.set_color(tiny_skia::Color::BLACK);
    paint.anti_alias = true;
    pixmap.fill_path(
        &path,
        &paint,
        tiny_skia::FillRule::Winding,
        tiny_skia::Transform::identity(),
        None,
    );
    Some(pixmap.pixels().iter().map(|p| p.alpha()).collect())
}

/// Maps font units into the glyph's pixel box.
struct PixelPath {
    builder: tiny_skia::PathBuilder,
    scale: f32,
    x0: f32,
    y0: f32,
}

impl PixelPath {
    fn x(&self, x: f32) -> f32 {
        x * self.scale - self.x0
    }

    fn y(&self, y: f32) -> f32 {
        -y * self.scale - self.y0
    }
}

impl OutlineBuilder for PixelPath {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(self.x(x), self.y(y));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(self.x(x), self.y(y));
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder
            .quad_to(self.x(x1), self.y(y1), self.x(x), self.y(y));
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            self.x(x1),
            self.y(y1),
            self.x(x2),
            self.y(y2),
            self.x(x),
            self.y(y),
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

/// Pairwise lookup through the legacy `kern` table for fonts without GPOS kerning.
fn legacy_kerning(
    face: &Face<'_>,
    glyph_map: &GlyphMap,
    codepoints: &[u32],
) -> BTreeMap<(u32, u32), i16> {
    let mut raw = BTreeMap::new();
    let Some(kern) = face.tables().kern else {
        return raw;
    };
    let subtables: Vec<_> = kern
        .subtables
        .into_iter()
        .filter(|s| s.horizontal && !s.variable && !s.has_cross_stream && !s.has_state_machine)
        .collect();
    if subtables.is_empty() {
        return raw;
    }
    let ids: Vec<(u32, GlyphId)> = codepoints
        .iter()
        .filter_map(|&cp| Some((cp, GlyphId(glyph_map.glyph(cp)?))))
        .collect();
    for &(left_cp, left) in &ids {
        for &(right_cp, right) in &ids {
            for subtable in &subtables {
                if let Some(du) = subtable.glyphs_kerning(left, right).filter(|du| *du != 0) {
                    merge_adjustment(&mut raw, (left_cp, right_cp), du);
                }
            }
        }
    }
    raw
}

/// Quantizes 8 bit coverage to four grey levels.
pub fn downsample(alpha: u8) -> u8 {
    match alpha {
        0..=63 => 0,
        64..=127 => 1,
        128..=191 => 2,
        _ => 3,
    }
}

/// Packs one row at 4 pixels per byte, most significant bits first, padding the last byte.
pub fn pack_2bit_row(alpha: &[u8], out: &mut Vec<u8>) {
    for chunk in alpha.chunks(4) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, a)| acc | (downsample(*a) << (6 - i * 2)));
        out.push(byte);
    }
}

/// Intervals over sorted `codepoints`, one per run of consecutive values.
pub fn build_intervals(codepoints: &[u32]) -> Vec<UnicodeInterval> {
    let mut intervals: Vec<UnicodeInterval> = Vec::new();
    for (index, &cp) in codepoints.iter().enumerate() {
        match intervals.last_mut() {
            Some(last) if last.last + 1 == cp => last.last = cp,
            _ => intervals.push(UnicodeInterval {
                first: cp,
                last: cp,
                offset: index as u32,
            }),
        }
    }
    intervals
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn thresholds() {
        let levels: Vec<u8> = [0, 63, 64, 127, 128, 191, 192, 255]
            .into_iter()
            .map(downsample)
            .collect();
        assert_eq!(levels, [0, 0, 1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn rows_pack_msb_first() {
        let mut out = Vec::new();
        pack_2bit_row(&[255, 0, 100, 150, 255], &mut out);
        assert_eq!(out, [0b11_00_01_10, 0b11_00_00_00]);
        pack_2bit_row(&[], &mut out);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn intervals_follow_runs() {
        let intervals = build_intervals(&[0x20, 0x21, 0x22, 0x41, 0xFB01, 0xFB02]);
        let got: Vec<(u32, u32, u32)> = intervals
            .iter()
            .map(|i| (i.first, i.last, i.offset))
            .collect();
        assert_eq!(
            got,
            [(0x20, 0x22, 0), (0x41, 0x41, 3), (0xFB01, 0xFB02, 4)]
        );
        assert!(build_intervals(&[]).is_empty());
    }

    #[test]
    fn box_rounds_outward() {
        let bbox = Rect {
            x_min: -10,
            y_min: -32,
            x_max: 100,
            y_max: 704,
        };
        assert_eq!(glyph_box(bbox, 1.0 / 64.0), (-1, -11, 2, 1));
    }

    #[test]
    fn sub_ranges_are_sorted_and_disjoint() {
        for pair in SUB_RANGES.windows(2) {
            assert!(pair[0].1 < pair[1].0);
        }
    }

    #[test]
    fn rejects_non_font_data() {
        let mut calls = 0;
        let result = rasterize(b"definitely not a font", 12, |_| calls += 1);
        assert!(matches!(result, Err(RasterizeError::Parse(_))));
        assert_eq!(calls, 0);
    }
}
