//! Kerning and ligature extraction from OpenType layout tables.
//!
//! The extractors work on raw GPOS/GSUB bytes and a [`GlyphMap`] restricted to the codepoints a
//! font blob will contain, so anything outside that set is dropped while parsing.
mod gpos;
mod gsub;
pub mod layout;
pub mod reader;

pub use gpos::kerning_design_units;
pub use gsub::{ligatures, STANDARD_LIGATURES};

use alloc::collections::BTreeMap;
#[cfg(feature = "std")]
use {crate::codepoint::pack_pair, crate::format::KernPair, alloc::vec::Vec};

/// Codepoint to glyph id mapping for the glyph set being built.
#[derive(Debug, Clone, Default)]
pub struct GlyphMap {
    by_glyph: BTreeMap<u16, u32>,
    by_codepoint: BTreeMap<u32, u16>,
}

impl GlyphMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A glyph reached from several codepoints maps back to the first one inserted.
    pub fn insert(&mut self, codepoint: u32, glyph: u16) {
        self.by_codepoint.insert(codepoint, glyph);
        self.by_glyph.entry(glyph).or_insert(codepoint);
    }

    pub fn codepoint(&self, glyph: u16) -> Option<u32> {
        self.by_glyph.get(&glyph).copied()
    }

    pub fn glyph(&self, codepoint: u32) -> Option<u16> {
        self.by_codepoint.get(&codepoint).copied()
    }

    pub fn contains(&self, codepoint: u32) -> bool {
        self.by_codepoint.contains_key(&codepoint)
    }

    pub fn glyphs(&self) -> impl Iterator<Item = u16> + '_ {
        self.by_glyph.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.by_codepoint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_codepoint.is_empty()
    }
}

impl FromIterator<(u32, u16)> for GlyphMap {
    fn from_iter<T: IntoIterator<Item = (u32, u16)>>(iter: T) -> Self {
        let mut map = GlyphMap::new();
        for (cp, glyph) in iter {
            map.insert(cp, glyph);
        }
        map
    }
}

/// Keeps the adjustment with the larger magnitude when a pair is seen twice.
pub fn merge_adjustment<K: Ord>(map: &mut BTreeMap<K, i16>, key: K, design_units: i16) {
    map.entry(key)
        .and_modify(|current| {
            if design_units.unsigned_abs() > current.unsigned_abs() {
                *current = design_units;
            }
        })
        .or_insert(design_units);
}

/// Converts design unit kerning keyed by codepoint pair into sorted 4.4 fixed point pairs.
/// Adjustments are floored, clamped to `i8`, and dropped when they come out as zero.
#[cfg(feature = "std")]
pub fn scale_kerning(raw: &BTreeMap<(u32, u32), i16>, scale: f32) -> Vec<KernPair> {
    let mut pairs: Vec<KernPair> = raw
        .iter()
        .filter_map(|(&(left, right), &du)| {
            let pair = pack_pair(left, right)?;
            let adjust = crate::fixed::from_f32_floor(du as f32 * scale)
                .clamp(i8::MIN as i32, i8::MAX as i32);
            (adjust != 0).then_some(KernPair {
                pair,
                adjust: adjust as i8,
            })
        })
        .collect();
    pairs.sort_unstable_by_key(|p| p.pair);
    pairs
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_codepoint_wins_reverse_lookup() {
        let map: GlyphMap = [(0x41, 3), (0x391, 3), (0x42, 4)].into_iter().collect();
        assert_eq!(map.codepoint(3), Some(0x41));
        assert_eq!(map.glyph(0x391), Some(3));
        assert!(map.contains(0x42));
        assert!(!map.contains(0x43));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn larger_magnitude_wins() {
        let mut map = BTreeMap::new();
        merge_adjustment(&mut map, 1u32, -40);
        merge_adjustment(&mut map, 1, 30);
        assert_eq!(map[&1], -40);
        merge_adjustment(&mut map, 1, 60);
        assert_eq!(map[&1], 60);
    }

    #[cfg(feature = "std")]
    #[test]
    fn scaling_floors_and_clamps() {
        let raw: BTreeMap<(u32, u32), i16> = [
            (('A' as u32, 'V' as u32), -100),
            (('A' as u32, 'W' as u32), -60),
            (('T' as u32, 'o' as u32), 1),
            (('L' as u32, 'T' as u32), -10_000),
            (('a' as u32, 0x1_0000), -100),
        ]
        .into_iter()
        .collect();
        let pairs = scale_kerning(&raw, 1.0 / 32.0);
        let got: Vec<(u32, i8)> = pairs.iter().map(|p| (p.pair, p.adjust)).collect();
        assert_eq!(
            got,
            [
                (0x0041_0056, -50),
                (0x0041_0057, -30),
                (0x004c_0054, -128),
            ]
        );
    }
}
