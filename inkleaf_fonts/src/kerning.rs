use crate::codepoint::pack_pair;
use crate::format::{write_records, KernClassEntry, KernPair, Record, Table};
use alloc::{collections::BTreeMap, vec::Vec};

/// How a font stores its kerning. A font carries one representation or none.
#[derive(Debug, Clone, Copy)]
pub enum Kerning<'a> {
    None,
    /// Codepoints map to left and right classes which index an adjustment matrix.
    Classes(KernClasses<'a>),
    /// Sorted explicit pairs.
    Pairs(Table<'a, KernPair>),
}

impl Kerning<'_> {
    /// 4.4 fixed point adjustment to apply between `left` and `right`.
    pub fn adjust(&self, left: u32, right: u32) -> i8 {
        match self {
            Kerning::None => 0,
            Kerning::Classes(classes) => classes.adjust(left, right),
            Kerning::Pairs(pairs) => match pack_pair(left, right) {
                Some(key) => pairs
                    .find_by_key(key, |p| p.pair)
                    .map(|p| p.adjust)
                    .unwrap_or(0),
                None => 0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KernClasses<'a> {
    left: Table<'a, KernClassEntry>,
    right: Table<'a, KernClassEntry>,
    right_class_count: usize,
    matrix: &'a [u8],
}

impl<'a> KernClasses<'a> {
    /// `matrix` holds `left_class_count * right_class_count` signed adjustments, row per left
    /// class.
    pub fn new(
        left: Table<'a, KernClassEntry>,
        right: Table<'a, KernClassEntry>,
        left_class_count: usize,
        right_class_count: usize,
        matrix: &'a [u8],
    ) -> Option<Self> {
        let matrix = matrix.get(..left_class_count.checked_mul(right_class_count)?)?;
        Some(KernClasses {
            left,
            right,
            right_class_count,
            matrix,
        })
    }

    fn class_of(table: &Table<'_, KernClassEntry>, cp: u32) -> u8 {
        let Ok(cp) = u16::try_from(cp) else {
            return 0;
        };
        table
            .find_by_key(cp, |entry| entry.codepoint)
            .map(|entry| entry.class)
            .unwrap_or(0)
    }

    pub fn adjust(&self, left: u32, right: u32) -> i8 {
        let lc = Self::class_of(&self.left, left);
        if lc == 0 {
            return 0;
        }
        let rc = Self::class_of(&self.right, right);
        if rc == 0 {
            return 0;
        }
        let index = (lc as usize - 1) * self.right_class_count + (rc as usize - 1);
        self.matrix.get(index).map(|b| *b as i8).unwrap_or(0)
    }
}

/// Class tables built from explicit pairs. Codepoints whose adjustment rows (or columns) are
/// identical share a class, which is usually far smaller than the pair list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedKernClasses {
    left: Vec<u8>,
    right: Vec<u8>,
    left_class_count: usize,
    right_class_count: usize,
    matrix: Vec<u8>,
}

impl OwnedKernClasses {
    /// Returns `None` when more than 255 classes would be needed on either side.
    pub fn from_pairs(pairs: impl IntoIterator<Item = KernPair>) -> Option<Self> {
        let mut map = BTreeMap::new();
        for pair in pairs {
            let (l, r) = crate::codepoint::unpack_pair(pair.pair);
            map.insert((l as u16, r as u16), pair.adjust);
        }
        let lefts: Vec<u16> = {
            let mut v: Vec<u16> = map.keys().map(|(l, _)| *l).collect();
            v.dedup();
            v
        };
        let rights: Vec<u16> = {
            let mut v: Vec<u16> = map.keys().map(|(_, r)| *r).collect();
            v.sort_unstable();
            v.dedup();
            v
        };

        let (left_entries, left_profiles) = assign_classes(&lefts, |l| {
            rights
                .iter()
                .map(|r| map.get(&(l, *r)).copied().unwrap_or(0))
                .collect()
        })?;
        let (right_entries, right_profiles) = assign_classes(&rights, |r| {
            lefts
                .iter()
                .map(|l| map.get(&(*l, r)).copied().unwrap_or(0))
                .collect()
        })?;

        let left_class_count = left_profiles;
        let right_class_count = right_profiles;
        let mut matrix = vec![0u8; left_class_count * right_class_count];
        let class_of = |entries: &[KernClassEntry], cp: u16| {
            entries
                .binary_search_by_key(&cp, |e| e.codepoint)
                .map(|i| entries[i].class as usize)
                .unwrap_or(0)
        };
        for (&(l, r), &adjust) in &map {
            let lc = class_of(&left_entries, l);
            let rc = class_of(&right_entries, r);
            matrix[(lc - 1) * right_class_count + (rc - 1)] = adjust as u8;
        }

        Some(OwnedKernClasses {
            left: write_records(&left_entries),
            right: write_records(&right_entries),
            left_class_count,
            right_class_count,
            matrix,
        })
    }

    pub fn as_kerning(&self) -> Kerning<'_> {
        let left = Table::new(&self.left, self.left.len() / KernClassEntry::SIZE);
        let right = Table::new(&self.right, self.right.len() / KernClassEntry::SIZE);
        match (left, right) {
            (Some(left), Some(right)) => KernClasses::new(
                left,
                right,
                self.left_class_count,
                self.right_class_count,
                &self.matrix,
            )
            .map(Kerning::Classes)
            .unwrap_or(Kerning::None),
            _ => Kerning::None,
        }
    }

    pub fn class_counts(&self) -> (usize, usize) {
        (self.left_class_count, self.right_class_count)
    }
}

/// Gives each codepoint the class of the first codepoint with an identical profile.
fn assign_classes(
    cps: &[u16],
    profile: impl Fn(u16) -> Vec<i8>,
) -> Option<(Vec<KernClassEntry>, usize)> {
    let mut profiles: BTreeMap<Vec<i8>, u8> = BTreeMap::new();
    let mut entries = Vec::with_capacity(cps.len());
    for &cp in cps {
        let next = u8::try_from(profiles.len() + 1).ok()?;
        let class = *profiles.entry(profile(cp)).or_insert(next);
        entries.push(KernClassEntry {
            codepoint: cp,
            class,
        });
    }
    Some((entries, profiles.len()))
}
