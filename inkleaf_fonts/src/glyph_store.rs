use crate::codepoint::{is_combining_mark, pack_pair, REPLACEMENT_CHAR};
use crate::fixed::to_pixel;
use crate::format::{Glyph, LigaturePair, Table, UnicodeInterval};
use crate::kerning::Kerning;
use core::str::Chars;

/// Combining marks keep at least this many pixels between themselves and their base glyph.
const MIN_COMBINING_GAP_PX: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FontMetrics {
    /// distance between baselines
    pub advance_y: u8,
    pub ascender: i32,
    pub descender: i32,
    pub is_2bit: bool,
}

/// Pixel box covered by a run of text. `y` grows upwards from the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Bounds {
    pub fn width(&self) -> u32 {
        self.max_x.abs_diff(self.min_x)
    }

    pub fn height(&self) -> u32 {
        self.max_y.abs_diff(self.min_y)
    }
}

/// Read only view of one font's tables. Borrowing the bytes means a store can never outlive
/// the mapping it was built from.
#[derive(Debug, Clone, Copy)]
pub struct GlyphStore<'a> {
    bitmap: &'a [u8],
    glyphs: Table<'a, Glyph>,
    intervals: Table<'a, UnicodeInterval>,
    kerning: Kerning<'a>,
    ligatures: Table<'a, LigaturePair>,
    metrics: FontMetrics,
}

impl<'a> GlyphStore<'a> {
    pub fn new(
        bitmap: &'a [u8],
        glyphs: Table<'a, Glyph>,
        intervals: Table<'a, UnicodeInterval>,
        metrics: FontMetrics,
    ) -> Self {
        Self {
            bitmap,
            glyphs,
            intervals,
            kerning: Kerning::None,
            ligatures: Table::empty(),
            metrics,
        }
    }

    pub fn with_kerning(mut self, kerning: Kerning<'a>) -> Self {
        self.kerning = kerning;
        self
    }

    pub fn with_ligatures(mut self, ligatures: Table<'a, LigaturePair>) -> Self {
        self.ligatures = ligatures;
        self
    }

    pub fn metrics(&self) -> FontMetrics {
        self.metrics
    }

    pub fn kerning_table(&self) -> Kerning<'a> {
        self.kerning
    }

    pub fn ligature_table(&self) -> Table<'a, LigaturePair> {
        self.ligatures
    }

    pub fn glyph_table(&self) -> Table<'a, Glyph> {
        self.glyphs
    }

    pub fn interval_table(&self) -> Table<'a, UnicodeInterval> {
        self.intervals
    }

    pub fn bitmap(&self) -> &'a [u8] {
        self.bitmap
    }

    fn find_glyph(&self, cp: u32) -> Option<Glyph> {
        let after = self.intervals.partition_point(|interval| interval.first <= cp);
        let interval = self.intervals.get(after.checked_sub(1)?)?;
        if cp > interval.last {
            return None;
        }
        let index = interval.offset.checked_add(cp - interval.first)?;
        self.glyphs.get(index as usize)
    }

    /// Glyph for `cp`, or the replacement glyph if the font has none.
    pub fn glyph(&self, cp: u32) -> Option<Glyph> {
        self.find_glyph(cp)
            .or_else(|| self.find_glyph(REPLACEMENT_CHAR))
    }

    pub fn has_char(&self, cp: u32) -> bool {
        self.find_glyph(cp).is_some()
    }

    /// 4.4 fixed point adjustment between two codepoints.
    pub fn kerning(&self, left: u32, right: u32) -> i8 {
        self.kerning.adjust(left, right)
    }

    pub fn ligature(&self, left: u32, right: u32) -> Option<u32> {
        let key = pack_pair(left, right)?;
        self.ligatures
            .find_by_key(key, |pair| pair.pair)
            .map(|pair| pair.ligature)
    }

    /// Folds as many following codepoints into `cp` as the ligature table allows. A lookahead that
    /// doesn't combine is left unconsumed in `rest`.
    pub fn apply_ligatures(&self, mut cp: u32, rest: &mut Chars<'_>) -> u32 {
        if self.ligatures.is_empty() {
            return cp;
        }
        loop {
            let saved = rest.clone();
            let Some(next) = rest.next() else { break };
            let next = next as u32;
            match self.ligature(cp, next) {
                Some(ligature) if !is_combining_mark(next) => cp = ligature,
                _ => {
                    *rest = saved;
                    break;
                }
            }
        }
        cp
    }

    /// Box covered by `text` drawn with its baseline origin at `(x, y)`.
    pub fn text_bounds(&self, text: &str, x: i32, y: i32) -> Bounds {
        let mut bounds = Bounds {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        };
        self.walk(text, x, |glyph, glyph_x, raise| {
            let base_y = y + raise;
            bounds.min_x = bounds.min_x.min(glyph_x + glyph.left as i32);
            bounds.max_x = bounds.max_x.max(glyph_x + glyph.left as i32 + glyph.width as i32);
            bounds.min_y = bounds.min_y.min(base_y + glyph.top as i32 - glyph.height as i32);
            bounds.max_y = bounds.max_y.max(base_y + glyph.top as i32);
        });
        bounds
    }

    pub fn text_dimensions(&self, text: &str) -> (u32, u32) {
        let bounds = self.text_bounds(text, 0, 0);
        (bounds.width(), bounds.height())
    }

    /// Distance the cursor moves over `text`, kerning and ligatures included.
    pub fn text_advance(&self, text: &str) -> i32 {
        to_pixel(self.walk(text, 0, |_, _, _| {}))
    }

    /// Visits each drawn glyph with its pixel x origin and how far it is raised above the
    /// baseline. Returns the final cursor in fixed point, relative to `x`.
    fn walk(&self, text: &str, x: i32, mut visit: impl FnMut(&Glyph, i32, i32)) -> i32 {
        let mut cursor = 0i32;
        let mut last_base_x = 0i32;
        let mut last_base_advance = 0i32;
        let mut last_base_top = 0i32;
        let mut prev_cp = None;
        let mut chars = text.chars();

        while let Some(c) = chars.next() {
            let mut cp = c as u32;
            let combining = is_combining_mark(cp);
            if !combining {
                cp = self.apply_ligatures(cp, &mut chars);
            }

            let Some(glyph) = self.glyph(cp) else {
                prev_cp = None;
                continue;
            };

            if combining {
                let gap = glyph.top as i32 - glyph.height as i32 - last_base_top;
                let raise = if gap < MIN_COMBINING_GAP_PX {
                    MIN_COMBINING_GAP_PX - gap
                } else {
                    0
                };
                let mark_x = last_base_x + last_base_advance / 2;
                visit(&glyph, x + to_pixel(mark_x), raise);
                continue;
            }

            if let Some(prev) = prev_cp {
                cursor += self.kerning(prev, cp) as i32;
            }
            visit(&glyph, x + to_pixel(cursor), 0);
            last_base_x = cursor;
            last_base_advance = glyph.advance_fp();
            last_base_top = glyph.top as i32;
            cursor += glyph.advance_fp();
            prev_cp = Some(cp);
        }

        cursor
    }

    /// Packed pixel data for `glyph`, if it lies within the bitmap region.
    pub fn glyph_bitmap(&self, glyph: &Glyph) -> Option<&'a [u8]> {
        let start = glyph.data_offset as usize;
        self.bitmap
            .get(start..start.checked_add(glyph.data_length as usize)?)
    }

    fn bits_per_pixel(&self) -> u32 {
        if self.metrics.is_2bit {
            2
        } else {
            1
        }
    }

    /// Coverage at `(x, y)` within the glyph, 0 for outside or undecodable.
    pub fn pixel(&self, glyph: &Glyph, x: u32, y: u32) -> u8 {
        if x >= glyph.width as u32 || y >= glyph.height as u32 {
            return 0;
        }
        let Some(data) = self.glyph_bitmap(glyph) else {
            return 0;
        };
        let bpp = self.bits_per_pixel();
        let row_bytes = (glyph.width as u32 * bpp).div_ceil(8);
        let bit = x * bpp;
        let Some(byte) = data.get((y * row_bytes + bit / 8) as usize) else {
            return 0;
        };
        let shift = 8 - bpp - (bit % 8);
        (byte >> shift) & ((1 << bpp) - 1) as u8
    }

    /// Iterates the non-blank pixels of a glyph as `(x, y, value)`.
    pub fn glyph_pixels<'s>(&'s self, glyph: &'s Glyph) -> impl Iterator<Item = (u32, u32, u8)> + 's {
        let width = glyph.width as u32;
        let height = glyph.height as u32;
        (0..height)
            .flat_map(move |y| (0..width).map(move |x| (x, y)))
            .filter_map(move |(x, y)| match self.pixel(glyph, x, y) {
                0 => None,
                value => Some((x, y, value)),
            })
    }
}
