//! Structures shared by GPOS and GSUB: feature and lookup lists, coverage and class tables.
use super::reader::FontReader;
use alloc::{collections::BTreeSet, vec::Vec};

/// Lookup indices referenced by any feature with one of `tags`.
pub fn feature_lookups(table: FontReader<'_>, tags: &[[u8; 4]]) -> BTreeSet<u16> {
    let mut indices = BTreeSet::new();
    let Some(list) = table.u16_at(6).and_then(|off| table.sub(off as usize)) else {
        return indices;
    };
    let count = list.u16_at(0).unwrap_or(0) as usize;
    for i in 0..count {
        let mut record = list;
        record.set_pos(2 + i * 6);
        let (Some(tag), Some(offset)) = (record.read_tag(), record.read_u16()) else {
            break;
        };
        if !tags.contains(&tag) {
            continue;
        }
        let Some(feature) = list.sub(offset as usize) else {
            continue;
        };
        let lookup_count = feature.u16_at(2).unwrap_or(0) as usize;
        for j in 0..lookup_count {
            match feature.u16_at(4 + j * 2) {
                Some(index) => {
                    indices.insert(index);
                }
                None => break,
            }
        }
    }
    indices
}

/// Subtables of lookup `index` with their effective lookup type. Extension subtables of
/// `extension_type` are resolved to the subtable they wrap.
pub fn lookup_subtables<'a>(
    table: FontReader<'a>,
    index: u16,
    extension_type: u16,
) -> Vec<(u16, FontReader<'a>)> {
    let mut out = Vec::new();
    let Some(list) = table.u16_at(8).and_then(|off| table.sub(off as usize)) else {
        return out;
    };
    if index >= list.u16_at(0).unwrap_or(0) {
        return out;
    }
    let Some(lookup) = list
        .u16_at(2 + index as usize * 2)
        .and_then(|off| list.sub(off as usize))
    else {
        return out;
    };
    let (Some(kind), Some(count)) = (lookup.u16_at(0), lookup.u16_at(4)) else {
        return out;
    };
    for i in 0..count as usize {
        let Some(subtable) = lookup
            .u16_at(6 + i * 2)
            .and_then(|off| lookup.sub(off as usize))
        else {
            continue;
        };
        if kind == extension_type {
            let wrapped = subtable.u16_at(2).zip(
                subtable
                    .u32_at(4)
                    .and_then(|off| subtable.sub(off as usize)),
            );
            if let Some((inner_kind, inner)) = wrapped {
                out.push((inner_kind, inner));
            }
        } else {
            out.push((kind, subtable));
        }
    }
    out
}

/// Coverage index of `glyph`.
pub fn coverage_index(coverage: FontReader<'_>, glyph: u16) -> Option<u16> {
    match coverage.u16_at(0)? {
        1 => {
            let count = coverage.u16_at(2)? as usize;
            let (mut lo, mut hi) = (0, count);
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                let g = coverage.u16_at(4 + mid * 2)?;
                match g.cmp(&glyph) {
                    core::cmp::Ordering::Equal => return u16::try_from(mid).ok(),
                    core::cmp::Ordering::Less => lo = mid + 1,
                    core::cmp::Ordering::Greater => hi = mid,
                }
            }
            None
        }
        2 => {
            let (start, _end, start_index) = find_range(coverage, glyph)?;
            start_index.checked_add(glyph - start)
        }
        _ => None,
    }
}

/// The glyph at coverage `index`, the inverse of [`coverage_index`].
pub fn coverage_glyph(coverage: FontReader<'_>, index: u16) -> Option<u16> {
    match coverage.u16_at(0)? {
        1 => {
            if index >= coverage.u16_at(2)? {
                return None;
            }
            coverage.u16_at(4 + index as usize * 2)
        }
        2 => {
            let count = coverage.u16_at(2)? as usize;
            for r in 0..count {
                let at = 4 + r * 6;
                let start = coverage.u16_at(at)?;
                let end = coverage.u16_at(at + 2)?;
                let start_index = coverage.u16_at(at + 4)?;
                let span = end.checked_sub(start)?;
                if index >= start_index && index - start_index <= span {
                    return Some(start + (index - start_index));
                }
            }
            None
        }
        _ => None,
    }
}

/// Class of `glyph`, 0 when it is not listed.
pub fn class_of(class_def: FontReader<'_>, glyph: u16) -> u16 {
    let class = match class_def.u16_at(0) {
        Some(1) => class_def.u16_at(2).zip(class_def.u16_at(4)).and_then(
            |(start, count)| {
                let i = glyph.checked_sub(start)?;
                if i >= count {
                    return None;
                }
                class_def.u16_at(6 + i as usize * 2)
            },
        ),
        Some(2) => find_range(class_def, glyph).map(|(_, _, class)| class),
        _ => None,
    };
    class.unwrap_or(0)
}

/// Binary search over `{start, end, value}` range records starting at byte 4.
fn find_range(table: FontReader<'_>, glyph: u16) -> Option<(u16, u16, u16)> {
    let count = table.u16_at(2)? as usize;
    let (mut lo, mut hi) = (0, count);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let at = 4 + mid * 6;
        let start = table.u16_at(at)?;
        let end = table.u16_at(at + 2)?;
        if glyph < start {
            hi = mid;
        } else if glyph > end {
            lo = mid + 1;
        } else {
            return Some((start, end, table.u16_at(at + 4)?));
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod test_tables {
    //! Builders for hand made layout tables.
    use alloc::vec::Vec;

    #[derive(Default)]
    pub struct Be(pub Vec<u8>);

    impl Be {
        pub fn u16(mut self, v: u16) -> Self {
            self.0.extend_from_slice(&v.to_be_bytes());
            self
        }
        pub fn i16(self, v: i16) -> Self {
            self.u16(v as u16)
        }
        pub fn u32(mut self, v: u32) -> Self {
            self.0.extend_from_slice(&v.to_be_bytes());
            self
        }
        pub fn tag(mut self, t: &[u8; 4]) -> Self {
            self.0.extend_from_slice(t);
            self
        }
        pub fn bytes(mut self, b: &[u8]) -> Self {
            self.0.extend_from_slice(b);
            self
        }
        pub fn len(&self) -> u16 {
            self.0.len() as u16
        }
    }

    pub fn coverage1(glyphs: &[u16]) -> Vec<u8> {
        let mut b = Be::default().u16(1).u16(glyphs.len() as u16);
        for g in glyphs {
            b = b.u16(*g);
        }
        b.0
    }

    /// `(start, end, start_index)` ranges.
    pub fn coverage2(ranges: &[(u16, u16, u16)]) -> Vec<u8> {
        let mut b = Be::default().u16(2).u16(ranges.len() as u16);
        for (s, e, v) in ranges {
            b = b.u16(*s).u16(*e).u16(*v);
        }
        b.0
    }

    pub fn class_def1(start: u16, classes: &[u16]) -> Vec<u8> {
        let mut b = Be::default().u16(1).u16(start).u16(classes.len() as u16);
        for c in classes {
            b = b.u16(*c);
        }
        b.0
    }

    /// Class format 2 shares its layout with coverage format 2.
    pub fn class_def2(ranges: &[(u16, u16, u16)]) -> Vec<u8> {
        coverage2(ranges)
    }

    /// Packs subtables behind a lookup header.
    pub fn lookup(kind: u16, subtables: &[Vec<u8>]) -> Vec<u8> {
        let header = 6 + 2 * subtables.len();
        let mut b = Be::default().u16(kind).u16(0).u16(subtables.len() as u16);
        let mut offset = header;
        for s in subtables {
            b = b.u16(offset as u16);
            offset += s.len();
        }
        for s in subtables {
            b = b.bytes(s);
        }
        b.0
    }

    pub fn extension(kind: u16, inner: &[u8]) -> Vec<u8> {
        Be::default().u16(1).u16(kind).u32(8).bytes(inner).0
    }

    /// A GPOS or GSUB table with the given features and lookups and an empty script list.
    pub fn layout_table(features: &[(&[u8; 4], &[u16])], lookups: &[Vec<u8>]) -> Vec<u8> {
        let mut feature_list = Be::default().u16(features.len() as u16);
        let mut offset = 2 + 6 * features.len();
        let mut bodies = Be::default();
        for (tag, indices) in features {
            feature_list = feature_list.tag(tag).u16(offset as u16);
            let mut body = Be::default().u16(0).u16(indices.len() as u16);
            for i in indices.iter() {
                body = body.u16(*i);
            }
            offset += body.0.len();
            bodies = bodies.bytes(&body.0);
        }
        let feature_list = feature_list.bytes(&bodies.0);

        let mut lookup_list = Be::default().u16(lookups.len() as u16);
        let mut offset = 2 + 2 * lookups.len();
        for l in lookups {
            lookup_list = lookup_list.u16(offset as u16);
            offset += l.len();
        }
        for l in lookups {
            lookup_list = lookup_list.bytes(l);
        }

        let header = 10u16;
        Be::default()
            .u32(0x0001_0000)
            .u16(0)
            .u16(header)
            .u16(header + feature_list.len())
            .bytes(&feature_list.0)
            .bytes(&lookup_list.0)
            .0
    }
}
