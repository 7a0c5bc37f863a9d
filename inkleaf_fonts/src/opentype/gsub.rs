use super::layout::{coverage_glyph, feature_lookups, lookup_subtables};
use super::reader::FontReader;
use super::GlyphMap;
use crate::codepoint::pack_pair;
use crate::format::LigaturePair;
use alloc::{collections::BTreeMap, vec::Vec};

const LIGATURE_SUBSTITUTION: u16 = 4;
const EXTENSION: u16 = 7;

/// Presentation form codepoints for ligatures whose glyph has no cmap entry.
pub const STANDARD_LIGATURES: [(&[u32], u32); 7] = [
    (&[0x66, 0x66], 0xFB00),
    (&[0x66, 0x69], 0xFB01),
    (&[0x66, 0x6C], 0xFB02),
    (&[0x66, 0x66, 0x69], 0xFB03),
    (&[0x66, 0x66, 0x6C], 0xFB04),
    (&[0x17F, 0x74], 0xFB05),
    (&[0x73, 0x74], 0xFB06),
];

fn standard_ligature(sequence: &[u32]) -> Option<u32> {
    STANDARD_LIGATURES
        .iter()
        .find(|(input, _)| *input == sequence)
        .map(|(_, output)| *output)
}

/// Ligatures from the GSUB `liga` and `rlig` features as chained pairs. A sequence longer than
/// two is expressed as its prefix's ligature followed by the last codepoint, so it is only kept
/// when the prefix is itself a ligature. Every input and output must be in `glyphs`.
pub fn ligatures(gsub: &[u8], glyphs: &GlyphMap) -> Vec<LigaturePair> {
    let table = FontReader::new(gsub);
    let mut sequences: BTreeMap<Vec<u32>, u32> = BTreeMap::new();
    for index in feature_lookups(table, &[*b"liga", *b"rlig"]) {
        for (kind, subtable) in lookup_subtables(table, index, EXTENSION) {
            if kind == LIGATURE_SUBSTITUTION {
                ligature_subst(subtable, glyphs, &mut sequences);
            }
        }
    }
    sequences.retain(|input, output| {
        glyphs.contains(*output) && input.iter().all(|cp| glyphs.contains(*cp))
    });

    let mut pairs: Vec<LigaturePair> = Vec::new();
    for (input, &ligature) in &sequences {
        let (left, right) = match input.as_slice() {
            [left, right] => (*left, *right),
            [prefix @ .., last] if prefix.len() >= 2 => match sequences.get(prefix) {
                Some(intermediate) => (*intermediate, *last),
                None => continue,
            },
            _ => continue,
        };
        if let Some(pair) = pack_pair(left, right) {
            pairs.push(LigaturePair { pair, ligature });
        }
    }
    pairs.sort_by_key(|p| p.pair);
    pairs.dedup_by_key(|p| p.pair);
    pairs
}

fn ligature_subst(
    subtable: FontReader<'_>,
    glyphs: &GlyphMap,
    out: &mut BTreeMap<Vec<u32>, u32>,
) -> Option<()> {
    if subtable.u16_at(0)? != 1 {
        return None;
    }
    let coverage = subtable.sub(subtable.u16_at(2)? as usize)?;
    let set_count = subtable.u16_at(4)?;
    for i in 0..set_count {
        let Some(first) = coverage_glyph(coverage, i).and_then(|g| glyphs.codepoint(g)) else {
            continue;
        };
        let Some(set) = subtable
            .u16_at(6 + i as usize * 2)
            .and_then(|off| subtable.sub(off as usize))
        else {
            continue;
        };
        let count = set.u16_at(0).unwrap_or(0) as usize;
        for l in 0..count {
            let Some(ligature) = set
                .u16_at(2 + l * 2)
                .and_then(|off| set.sub(off as usize))
            else {
                continue;
            };
            let (Some(output), Some(components)) = (ligature.u16_at(0), ligature.u16_at(2))
            else {
                continue;
            };
            // the component count includes the first glyph
            let sequence: Option<Vec<u32>> = core::iter::once(Some(first))
                .chain((0..components.saturating_sub(1) as usize).map(|c| {
                    ligature
                        .u16_at(4 + c * 2)
                        .and_then(|g| glyphs.codepoint(g))
                }))
                .collect();
            let Some(sequence) = sequence else {
                continue;
            };
            let output = glyphs
                .codepoint(output)
                .or_else(|| standard_ligature(&sequence));
            if let Some(output) = output {
                out.insert(sequence, output);
            }
        }
    }
    Some(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::opentype::layout::test_tables::*;

    const F: u16 = 10;
    const I: u16 = 11;
    const L: u16 = 12;
    const FI: u16 = 20;
    const FFI: u16 = 21;
    const FF_UNMAPPED: u16 = 22;
    const FL_UNMAPPED: u16 = 25;
    const FF: u16 = 30;

    fn glyphs() -> GlyphMap {
        [
            ('f' as u32, F),
            ('i' as u32, I),
            ('l' as u32, L),
            (0xFB01, FI),
            (0xFB03, FFI),
            (0xFB00, FF),
        ]
        .into_iter()
        .collect()
    }

    /// Format 1 substitution for a single first glyph. `ligatures` are `(output, rest)`.
    fn ligature_subst1(first: u16, ligatures: &[(u16, &[u16])]) -> Vec<u8> {
        let coverage = coverage1(&[first]);
        let header = 8u16;
        let mut set = Be::default().u16(ligatures.len() as u16);
        let mut offset = 2 + 2 * ligatures.len();
        let mut bodies = Be::default();
        for (output, rest) in ligatures {
            set = set.u16(offset as u16);
            let mut body = Be::default().u16(*output).u16(rest.len() as u16 + 1);
            for g in rest.iter() {
                body = body.u16(*g);
            }
            offset += body.0.len();
            bodies = bodies.bytes(&body.0);
        }
        let set = set.bytes(&bodies.0);
        Be::default()
            .u16(1)
            .u16(header)
            .u16(1)
            .u16(header + coverage.len() as u16)
            .bytes(&coverage)
            .bytes(&set.0)
            .0
    }

    #[test]
    fn chains_longer_sequences() {
        let subst = ligature_subst1(
            F,
            &[
                (FFI, &[F, I]),
                (FF_UNMAPPED, &[F]),
                (FI, &[I]),
                (FL_UNMAPPED, &[L]),
                (FI, &[99]),
            ],
        );
        let gsub = layout_table(
            &[(b"rlig", &[0]), (b"dlig", &[1])],
            &[
                lookup(EXTENSION, &[extension(LIGATURE_SUBSTITUTION, &subst)]),
                lookup(
                    LIGATURE_SUBSTITUTION,
                    &[ligature_subst1(I, &[(FI, &[I])])],
                ),
            ],
        );
        let pairs = ligatures(&gsub, &glyphs());
        let got: Vec<(u32, u32)> = pairs.iter().map(|p| (p.pair, p.ligature)).collect();
        assert_eq!(
            got,
            [
                (0x0066_0066, 0xFB00),
                (0x0066_0069, 0xFB01),
                (0xFB00_0069, 0xFB03),
            ]
        );
    }

    #[test]
    fn orphaned_long_sequence_is_dropped() {
        let subst = ligature_subst1(F, &[(FFI, &[F, I])]);
        let gsub = layout_table(&[(b"liga", &[0])], &[lookup(4, &[subst])]);
        assert!(ligatures(&gsub, &glyphs()).is_empty());
    }

    #[test]
    fn standard_fallback() {
        assert_eq!(standard_ligature(&[0x73, 0x74]), Some(0xFB06));
        assert_eq!(standard_ligature(&[0x66]), None);
    }
}
