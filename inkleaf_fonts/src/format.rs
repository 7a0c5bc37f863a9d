//! Fixed size little endian records that make up a font's tables, and a bounds checked view
//! over a packed array of them.
//!
//! Records are decoded on access rather than transmuted, so a table can sit at any alignment
//! in mapped flash.
use alloc::vec::Vec;
use core::marker::PhantomData;

pub trait Record: Copy {
    const SIZE: usize;
    /// `bytes` is exactly `SIZE` long.
    fn parse(bytes: &[u8]) -> Self;
    fn write(&self, out: &mut Vec<u8>);
}

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le_i16(b: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([b[at], b[at + 1]])
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// One rendered character shape and its placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Glyph {
    pub width: u8,
    pub height: u8,
    /// 12.4 fixed point
    pub advance: u16,
    /// x distance from the cursor to the left edge of the bitmap
    pub left: i16,
    /// y distance from the baseline up to the top edge of the bitmap
    pub top: i16,
    pub data_length: u16,
    /// offset into the font's bitmap region
    pub data_offset: u32,
}

impl Glyph {
    pub fn advance_fp(&self) -> i32 {
        self.advance as i32
    }
}

impl Record for Glyph {
    const SIZE: usize = 16;

    fn parse(b: &[u8]) -> Self {
        Glyph {
            width: b[0],
            height: b[1],
            advance: le_u16(b, 2),
            left: le_i16(b, 4),
            top: le_i16(b, 6),
            data_length: le_u16(b, 8),
            // 10..12 is padding
            data_offset: le_u32(b, 12),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.width);
        out.push(self.height);
        out.extend_from_slice(&self.advance.to_le_bytes());
        out.extend_from_slice(&self.left.to_le_bytes());
        out.extend_from_slice(&self.top.to_le_bytes());
        out.extend_from_slice(&self.data_length.to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.data_offset.to_le_bytes());
    }
}

/// Glyphs for `first..=last` live contiguously in the glyph array from `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnicodeInterval {
    pub first: u32,
    pub last: u32,
    pub offset: u32,
}

impl Record for UnicodeInterval {
    const SIZE: usize = 12;

    fn parse(b: &[u8]) -> Self {
        UnicodeInterval {
            first: le_u32(b, 0),
            last: le_u32(b, 4),
            offset: le_u32(b, 8),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.first.to_le_bytes());
        out.extend_from_slice(&self.last.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernPair {
    /// `left << 16 | right`
    pub pair: u32,
    /// 4.4 fixed point
    pub adjust: i8,
}

impl Record for KernPair {
    const SIZE: usize = 5;

    fn parse(b: &[u8]) -> Self {
        KernPair {
            pair: le_u32(b, 0),
            adjust: b[4] as i8,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.pair.to_le_bytes());
        out.push(self.adjust as u8);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernClassEntry {
    pub codepoint: u16,
    /// 1 based, 0 is never stored
    pub class: u8,
}

impl Record for KernClassEntry {
    const SIZE: usize = 3;

    fn parse(b: &[u8]) -> Self {
        KernClassEntry {
            codepoint: le_u16(b, 0),
            class: b[2],
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.codepoint.to_le_bytes());
        out.push(self.class);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LigaturePair {
    /// `left << 16 | right`
    pub pair: u32,
    pub ligature: u32,
}

impl Record for LigaturePair {
    const SIZE: usize = 8;

    fn parse(b: &[u8]) -> Self {
        LigaturePair {
            pair: le_u32(b, 0),
            ligature: le_u32(b, 4),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.pair.to_le_bytes());
        out.extend_from_slice(&self.ligature.to_le_bytes());
    }
}

/// A packed array of `R` borrowed from a font's bytes.
pub struct Table<'a, R> {
    bytes: &'a [u8],
    _record: PhantomData<R>,
}

impl<R> Clone for Table<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Table<'_, R> {}

impl<R> core::fmt::Debug for Table<'_, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Table").field("bytes", &self.bytes.len()).finish()
    }
}

impl<'a, R: Record> Table<'a, R> {
    /// Views the first `count` records of `bytes`, or `None` if `bytes` is too short.
    pub fn new(bytes: &'a [u8], count: usize) -> Option<Self> {
        let len = count.checked_mul(R::SIZE)?;
        Some(Table {
            bytes: bytes.get(..len)?,
            _record: PhantomData,
        })
    }

    pub fn empty() -> Self {
        Table {
            bytes: &[],
            _record: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / R::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn get(&self, index: usize) -> Option<R> {
        let start = index.checked_mul(R::SIZE)?;
        let bytes = self.bytes.get(start..start.checked_add(R::SIZE)?)?;
        Some(R::parse(bytes))
    }

    pub fn iter(&self) -> impl Iterator<Item = R> + 'a
    where
        R: 'a,
    {
        self.bytes.chunks_exact(R::SIZE).map(R::parse)
    }

    /// Index of the first record for which `pred` is false, assuming the table is partitioned
    /// on `pred`.
    pub fn partition_point(&self, mut pred: impl FnMut(&R) -> bool) -> usize {
        let mut lo = 0;
        let mut hi = self.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.get(mid) {
                Some(record) if pred(&record) => lo = mid + 1,
                _ => hi = mid,
            }
        }
        lo
    }

    /// Exact match search over a table sorted by `key`.
    pub fn find_by_key<K: Ord>(&self, key: K, f: impl Fn(&R) -> K) -> Option<R> {
        let index = self.partition_point(|record| f(record) < key);
        self.get(index).filter(|record| f(record) == key)
    }
}

pub fn write_records<R: Record>(records: &[R]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * R::SIZE);
    for record in records {
        record.write(&mut out);
    }
    out
}
