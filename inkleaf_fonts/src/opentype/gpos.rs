use super::layout::{class_of, coverage_glyph, coverage_index, feature_lookups, lookup_subtables};
use super::reader::FontReader;
use super::{merge_adjustment, GlyphMap};
use alloc::{collections::BTreeMap, vec::Vec};

const PAIR_ADJUSTMENT: u16 = 2;
const EXTENSION: u16 = 9;

const X_PLACEMENT: u16 = 0x0001;
const Y_PLACEMENT: u16 = 0x0002;
const X_ADVANCE: u16 = 0x0004;

fn value_record_size(format: u16) -> usize {
    (format & 0xff).count_ones() as usize * 2
}

/// Horizontal advance adjustment of the value record at `at`, 0 when the record has none.
fn x_advance(table: FontReader<'_>, at: usize, format: u16) -> i16 {
    if format & X_ADVANCE == 0 {
        return 0;
    }
    let mut skip = 0;
    if format & X_PLACEMENT != 0 {
        skip += 2;
    }
    if format & Y_PLACEMENT != 0 {
        skip += 2;
    }
    table.i16_at(at + skip).unwrap_or(0)
}

/// Kerning from the GPOS `kern` feature in font design units, keyed by codepoint pair.
/// Only glyphs in `glyphs` take part.
pub fn kerning_design_units(gpos: &[u8], glyphs: &GlyphMap) -> BTreeMap<(u32, u32), i16> {
    let table = FontReader::new(gpos);
    let mut by_glyph = BTreeMap::new();
    for index in feature_lookups(table, &[*b"kern"]) {
        for (kind, subtable) in lookup_subtables(table, index, EXTENSION) {
            if kind != PAIR_ADJUSTMENT {
                continue;
            }
            match subtable.u16_at(0) {
                Some(1) => pair_pos_format1(subtable, glyphs, &mut by_glyph),
                Some(2) => pair_pos_format2(subtable, glyphs, &mut by_glyph),
                _ => None,
            };
        }
    }

    by_glyph
        .into_iter()
        .filter_map(|((left, right), du)| {
            Some(((glyphs.codepoint(left)?, glyphs.codepoint(right)?), du))
        })
        .collect()
}

fn pair_pos_format1(
    subtable: FontReader<'_>,
    glyphs: &GlyphMap,
    out: &mut BTreeMap<(u16, u16), i16>,
) -> Option<()> {
    let coverage = subtable.sub(subtable.u16_at(2)? as usize)?;
    let format1 = subtable.u16_at(4)?;
    let format2 = subtable.u16_at(6)?;
    let set_count = subtable.u16_at(8)?;
    let record_size = 2 + value_record_size(format1) + value_record_size(format2);

    for i in 0..set_count {
        let Some(first) = coverage_glyph(coverage, i) else {
            continue;
        };
        if glyphs.codepoint(first).is_none() {
            continue;
        }
        let Some(set) = subtable
            .u16_at(10 + i as usize * 2)
            .and_then(|off| subtable.sub(off as usize))
        else {
            continue;
        };
        let count = set.u16_at(0).unwrap_or(0) as usize;
        for j in 0..count {
            let at = 2 + j * record_size;
            let Some(second) = set.u16_at(at) else {
                break;
            };
            let du = x_advance(set, at + 2, format1);
            if du == 0 || glyphs.codepoint(second).is_none() {
                continue;
            }
            merge_adjustment(out, (first, second), du);
        }
    }
    Some(())
}

fn pair_pos_format2(
    subtable: FontReader<'_>,
    glyphs: &GlyphMap,
    out: &mut BTreeMap<(u16, u16), i16>,
) -> Option<()> {
    let coverage = subtable.sub(subtable.u16_at(2)? as usize)?;
    let format1 = subtable.u16_at(4)?;
    let format2 = subtable.u16_at(6)?;
    let class_def1 = subtable.sub(subtable.u16_at(8)? as usize)?;
    let class_def2 = subtable.sub(subtable.u16_at(10)? as usize)?;
    let class1_count = subtable.u16_at(12)?;
    let class2_count = subtable.u16_at(14)? as usize;
    let record_size = value_record_size(format1) + value_record_size(format2);

    let mut firsts: BTreeMap<u16, Vec<u16>> = BTreeMap::new();
    let mut seconds: BTreeMap<u16, Vec<u16>> = BTreeMap::new();
    for glyph in glyphs.glyphs() {
        if coverage_index(coverage, glyph).is_some() {
            firsts
                .entry(class_of(class_def1, glyph))
                .or_default()
                .push(glyph);
        }
        seconds
            .entry(class_of(class_def2, glyph))
            .or_default()
            .push(glyph);
    }

    for (&class1, lefts) in &firsts {
        if class1 >= class1_count {
            continue;
        }
        for (&class2, rights) in &seconds {
            if class2 as usize >= class2_count {
                continue;
            }
            let at = 16 + (class1 as usize * class2_count + class2 as usize) * record_size;
            let du = x_advance(subtable, at, format1);
            if du == 0 {
                continue;
            }
            for &left in lefts {
                for &right in rights {
                    merge_adjustment(out, (left, right), du);
                }
            }
        }
    }
    Some(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::opentype::layout::test_tables::*;

    const A: u16 = 1;
    const V: u16 = 2;
    const T: u16 = 3;
    const O: u16 = 4;
    const LOWER_A: u16 = 5;
    const W: u16 = 6;

    fn glyphs() -> GlyphMap {
        [
            ('A' as u32, A),
            ('V' as u32, V),
            ('T' as u32, T),
            ('o' as u32, O),
            ('a' as u32, LOWER_A),
            ('W' as u32, W),
        ]
        .into_iter()
        .collect()
    }

    /// Format 1 with an x advance only value format. `sets` pairs each first glyph with its
    /// `(second, x_advance)` records.
    fn pair_pos1(sets: &[(u16, &[(u16, i16)])]) -> Vec<u8> {
        let firsts: Vec<u16> = sets.iter().map(|(g, _)| *g).collect();
        let coverage = coverage1(&firsts);
        let header = 10 + 2 * sets.len();
        let mut b = Be::default()
            .u16(1)
            .u16(header as u16)
            .u16(X_ADVANCE)
            .u16(0)
            .u16(sets.len() as u16);
        let mut offset = header + coverage.len();
        let mut bodies = Be::default();
        for (_, records) in sets {
            b = b.u16(offset as u16);
            let mut set = Be::default().u16(records.len() as u16);
            for (second, adv) in records.iter() {
                set = set.u16(*second).i16(*adv);
            }
            offset += set.0.len();
            bodies = bodies.bytes(&set.0);
        }
        b.bytes(&coverage).bytes(&bodies.0).0
    }

    /// Format 2 with placement and advance in the first value record, covering T only.
    fn pair_pos2() -> Vec<u8> {
        let format = X_PLACEMENT | X_ADVANCE;
        let coverage = coverage2(&[(T, T, 0)]);
        let cd1 = class_def2(&[(T, T, 1)]);
        let cd2 = class_def1(O, &[1, 1]);
        // class1 x class2 records of (x placement, x advance)
        let records: [(i16, i16); 4] = [(0, 0), (7, -50), (3, 0), (9, -40)];
        let header = 16 + records.len() * 4;
        let mut b = Be::default()
            .u16(2)
            .u16(header as u16)
            .u16(format)
            .u16(0)
            .u16((header + coverage.len()) as u16)
            .u16((header + coverage.len() + cd1.len()) as u16)
            .u16(2)
            .u16(2);
        for (placement, advance) in records {
            b = b.i16(placement).i16(advance);
        }
        b.bytes(&coverage).bytes(&cd1).bytes(&cd2).0
    }

    #[test]
    fn extracts_both_formats() {
        let gpos = layout_table(
            &[(b"kern", &[0, 1]), (b"mark", &[2])],
            &[
                lookup(
                    PAIR_ADJUSTMENT,
                    &[
                        pair_pos1(&[(A, &[(V, -80), (W, -60), (99, -70)])]),
                        pair_pos1(&[(A, &[(V, -100)])]),
                        pair_pos1(&[(A, &[(V, 20)])]),
                    ],
                ),
                lookup(EXTENSION, &[extension(PAIR_ADJUSTMENT, &pair_pos2())]),
                lookup(PAIR_ADJUSTMENT, &[pair_pos1(&[(O, &[(O, -500)])])]),
            ],
        );
        let kerning = kerning_design_units(&gpos, &glyphs());
        let got: Vec<((u32, u32), i16)> = kerning.into_iter().collect();
        assert_eq!(
            got,
            [
                (('A' as u32, 'V' as u32), -100),
                (('A' as u32, 'W' as u32), -60),
                (('T' as u32, 'a' as u32), -40),
                (('T' as u32, 'o' as u32), -40),
            ]
        );
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(kerning_design_units(&[], &glyphs()).is_empty());
        assert!(kerning_design_units(&[0xff; 64], &glyphs()).is_empty());
    }
}
