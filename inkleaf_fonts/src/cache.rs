//! Flash cache of rasterized font blobs, up to four styles for each of a handful of font ids.
//!
//! ```text
//! [0, header_size)                 directory, rewritten last on every commit
//! [header_size, data_limit)        style blobs, each starting on a sector boundary
//! [data_limit, size)               staging area for uploaded source fonts
//! ```
//!
//! Style blobs are always written past everything the committed directory refers to, so a
//! failure part way through caching a font leaves the previous directory authoritative.
use crate::blob::{self, BlobError};
use crate::family::{FontFamily, FontStyle};
use crate::glyph_store::GlyphStore;
use embedded_storage::nor_flash::{NorFlash, NorFlashErrorKind};
use inkleaf_embedded::{
    sector_align, FlashPartition, MapNorFlash, Mapping, FLASH_BINCODE_CONFIG, SECTOR_SIZE,
};
use tracing::{event, Level};

pub const MAGIC: u32 = 0x464F_4E54;
pub const VERSION: u8 = 1;
pub const MAX_FONTS: usize = 16;
pub const NUM_STYLES: usize = 4;
/// Bytes buffered per flash write.
pub const WRITE_BUFFER: usize = 512;

/// How a cache partition is divided up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLayout {
    pub header_size: u32,
    /// Tail of the partition kept free for [`FontCache::stage_to_flash`].
    pub staging_reserve: u32,
    /// Expected size of one rasterized style, used to decide when the cache is full.
    pub style_estimate: u32,
}

impl Default for CacheLayout {
    fn default() -> Self {
        Self {
            header_size: SECTOR_SIZE as u32,
            staging_reserve: 1024 * 1024,
            style_estimate: 200 * 1024,
        }
    }
}

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheEntry {
    pub font_id: i32,
    /// Partition relative, indexed by [`FontStyle::index`]. Zero size means not cached.
    pub offsets: [u32; NUM_STYLES],
    pub sizes: [u32; NUM_STYLES],
}

impl CacheEntry {
    pub fn style(&self, style: FontStyle) -> Option<(u32, u32)> {
        let i = style.index();
        (self.sizes[i] > 0 && self.offsets[i] > 0).then_some((self.offsets[i], self.sizes[i]))
    }

    fn end(&self) -> u32 {
        self.offsets
            .iter()
            .zip(&self.sizes)
            .map(|(offset, size)| offset.saturating_add(*size))
            .max()
            .unwrap_or(0)
    }
}

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
struct CacheHeader {
    magic: u32,
    version: u8,
    font_count: u8,
    reserved: [u8; 2],
    entries: [CacheEntry; MAX_FONTS],
}

impl CacheHeader {
    fn empty() -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            font_count: 0,
            reserved: [0; 2],
            entries: [CacheEntry::default(); MAX_FONTS],
        }
    }

    fn entries(&self) -> &[CacheEntry] {
        &self.entries[..(self.font_count as usize).min(MAX_FONTS)]
    }
}

#[derive(Debug)]
pub enum CacheError {
    Flash(NorFlashErrorKind),
    PartitionTooSmall { size: u32, needed: u32 },
    BadLayout,
    TooManyFonts,
    NoSpace { needed: u32, available: u32 },
    StagingTooLarge { len: usize, reserve: u32 },
    InvalidBlob(BlobError),
}

impl core::fmt::Display for CacheError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CacheError::Flash(e) => write!(f, "font cache flash error: {e:?}"),
            CacheError::PartitionTooSmall { size, needed } => write!(
                f,
                "font cache partition is {size} bytes but at least {needed} are needed"
            ),
            CacheError::BadLayout => write!(f, "font cache layout is not sector aligned"),
            CacheError::TooManyFonts => {
                write!(f, "font cache already holds {MAX_FONTS} fonts")
            }
            CacheError::NoSpace { needed, available } => write!(
                f,
                "font cache needs {needed} bytes for a style but only {available} are free"
            ),
            CacheError::StagingTooLarge { len, reserve } => write!(
                f,
                "{len} bytes do not fit in the {reserve} byte staging area"
            ),
            CacheError::InvalidBlob(e) => write!(f, "refusing to cache invalid blob: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CacheError {}

impl From<NorFlashErrorKind> for CacheError {
    fn from(e: NorFlashErrorKind) -> Self {
        CacheError::Flash(e)
    }
}

impl From<BlobError> for CacheError {
    fn from(e: BlobError) -> Self {
        CacheError::InvalidBlob(e)
    }
}

/// A directory entry being filled in before it is committed.
struct PendingEntry {
    slot: usize,
    entry: CacheEntry,
    write_offset: u32,
}

pub struct FontCache<'a, S> {
    partition: FlashPartition<'a, S>,
    header_partition: FlashPartition<'a, S>,
    layout: CacheLayout,
    header: CacheHeader,
    /// `[header_size, data_limit)` as of the last commit
    data: Mapping,
}

fn read_header<S: NorFlash>(partition: &FlashPartition<'_, S>) -> CacheHeader {
    match bincode::decode_from_reader::<CacheHeader, _, _>(
        partition.bincode_reader(),
        FLASH_BINCODE_CONFIG,
    ) {
        Ok(mut header) if header.magic == MAGIC && header.version == VERSION => {
            header.font_count = header.font_count.min(MAX_FONTS as u8);
            header
        }
        Ok(_) => {
            event!(Level::DEBUG, "no font cache directory, starting empty");
            CacheHeader::empty()
        }
        Err(e) => {
            event!(Level::ERROR, error = %e, "font cache directory unreadable, starting empty");
            CacheHeader::empty()
        }
    }
}

impl<'a, S: MapNorFlash> FontCache<'a, S> {
    /// Reads the directory and maps the data region. A missing or corrupt directory is treated as
    /// an empty cache which the next write rebuilds.
    pub fn open(partition: FlashPartition<'a, S>, layout: CacheLayout) -> Result<Self, CacheError> {
        let sector = SECTOR_SIZE as u32;
        if layout.header_size == 0
            || layout.header_size % sector != 0
            || layout.staging_reserve % sector != 0
        {
            return Err(CacheError::BadLayout);
        }
        let needed = layout.header_size + layout.staging_reserve + sector;
        if partition.size() < needed {
            return Err(CacheError::PartitionTooSmall {
                size: partition.size(),
                needed,
            });
        }
        let mut rest = partition;
        let header_partition = rest.split_off_front(layout.header_size / sector);
        let header = read_header(&header_partition);
        let mut cache = FontCache {
            partition,
            header_partition,
            layout,
            header,
            data: Mapping::empty(),
        };
        cache.remap()?;
        event!(
            Level::DEBUG,
            fonts = cache.header.font_count,
            size = partition.size(),
            "opened font cache"
        );
        Ok(cache)
    }

    pub fn layout(&self) -> CacheLayout {
        self.layout
    }

    fn data_limit(&self) -> u32 {
        self.partition.size() - self.layout.staging_reserve
    }

    fn remap(&mut self) -> Result<(), CacheError> {
        let start = self.layout.header_size;
        self.data = self.partition.map(start, self.data_limit() - start)?;
        Ok(())
    }

    fn entry(&self, font_id: i32) -> Option<&CacheEntry> {
        self.header.entries().iter().find(|e| e.font_id == font_id)
    }

    pub fn entries(&self) -> &[CacheEntry] {
        self.header.entries()
    }

    pub fn has_font(&self, font_id: i32) -> bool {
        self.entry(font_id).is_some()
    }

    /// First free sector after every blob the directory refers to.
    fn next_blob_offset(&self) -> u32 {
        let end = self
            .header
            .entries()
            .iter()
            .map(CacheEntry::end)
            .fold(self.layout.header_size, u32::max);
        sector_align(end)
    }

    pub fn get_font(&self, font_id: i32, style: FontStyle) -> Option<GlyphStore<'_>> {
        let (offset, size) = self.entry(font_id)?.style(style)?;
        let start = offset.checked_sub(self.layout.header_size)? as usize;
        let bytes = self.data.get(start..start.checked_add(size as usize)?)?;
        match blob::parse(bytes) {
            Ok(store) => Some(store),
            Err(e) => {
                event!(Level::ERROR, font_id, ?style, error = %e, "cached font blob is corrupt");
                None
            }
        }
    }

    /// Every cached style of `font_id`. `None` unless the regular style is cached.
    pub fn build_font_family(&self, font_id: i32) -> Option<FontFamily<'_>> {
        let regular = self.get_font(font_id, FontStyle::Regular)?;
        let family = FontStyle::ALL[1..]
            .iter()
            .fold(FontFamily::new(regular), |family, &style| {
                match self.get_font(font_id, style) {
                    Some(store) => family.with_style(style, store),
                    None => family,
                }
            });
        Some(family)
    }

    /// Caches already rasterized blobs, indexed by [`FontStyle::index`]. Re-caching a font id
    /// replaces its directory entry.
    pub fn store_blobs(
        &mut self,
        font_id: i32,
        blobs: [Option<&[u8]>; NUM_STYLES],
        mut progress: impl FnMut(u8),
    ) -> Result<(), CacheError> {
        let mut pending = self.begin(font_id)?;
        for (style, blob) in FontStyle::ALL.into_iter().zip(blobs) {
            progress(style.index() as u8 * 25);
            if let Some(blob) = blob {
                self.write_style(&mut pending, style, blob)?;
            }
        }
        self.commit(pending)?;
        progress(100);
        Ok(())
    }

    /// Rasterizes each provided style at `size` and caches the result. A style that fails to
    /// rasterize is logged and left out.
    #[cfg(feature = "rasterizer")]
    pub fn cache_font(
        &mut self,
        font_id: i32,
        fonts: [Option<&[u8]>; NUM_STYLES],
        size: u16,
        mut progress: impl FnMut(u8),
    ) -> Result<(), CacheError> {
        let mut pending = self.begin(font_id)?;
        for (style, font) in FontStyle::ALL.into_iter().zip(fonts) {
            let Some(font) = font else {
                continue;
            };
            let base = style.index() as u8 * 25;
            match crate::rasterizer::rasterize(font, size, |p| progress(base + p / 4)) {
                Ok(blob) => self.write_style(&mut pending, style, &blob)?,
                Err(e) => {
                    event!(Level::ERROR, font_id, ?style, error = %e, "style not rasterized")
                }
            }
        }
        self.commit(pending)?;
        progress(100);
        Ok(())
    }

    fn begin(&mut self, font_id: i32) -> Result<PendingEntry, CacheError> {
        let mut write_offset = self.next_blob_offset();
        let reserve = self.layout.style_estimate.saturating_mul(NUM_STYLES as u32);
        if write_offset.saturating_add(reserve) > self.data_limit() && self.header.font_count > 0
        {
            event!(Level::DEBUG, write_offset, "font cache full, erasing every cached font");
            self.erase_cache()?;
            write_offset = self.layout.header_size;
        }
        let count = self.header.entries().len();
        let slot = match self.header.entries().iter().position(|e| e.font_id == font_id) {
            Some(slot) => slot,
            None if count < MAX_FONTS => count,
            None => return Err(CacheError::TooManyFonts),
        };
        Ok(PendingEntry {
            slot,
            entry: CacheEntry {
                font_id,
                ..CacheEntry::default()
            },
            write_offset,
        })
    }

    fn write_style(
        &self,
        pending: &mut PendingEntry,
        style: FontStyle,
        bytes: &[u8],
    ) -> Result<(), CacheError> {
        blob::parse(bytes)?;
        let offset = sector_align(pending.write_offset);
        let limit = self.data_limit();
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= limit)
            .ok_or(CacheError::NoSpace {
                needed: len,
                available: limit.saturating_sub(offset),
            })?;
        self.partition.erase_range(offset, len)?;
        self.partition
            .write_padded::<WRITE_BUFFER>(offset, bytes)
            .inspect_err(|e| {
                event!(Level::ERROR, ?style, error = ?e, "writing cached style failed")
            })?;
        pending.entry.offsets[style.index()] = offset;
        pending.entry.sizes[style.index()] = len;
        pending.write_offset = end;
        event!(Level::DEBUG, ?style, offset, len, "wrote cached style");
        Ok(())
    }

    fn commit(&mut self, pending: PendingEntry) -> Result<(), CacheError> {
        let mut header = self.header.clone();
        header.entries[pending.slot] = pending.entry;
        header.font_count = header.font_count.max(pending.slot as u8 + 1);
        self.header_partition
            .erase_and_write_this::<WRITE_BUFFER>(&header)?;
        self.header = header;
        self.remap()?;
        event!(
            Level::DEBUG,
            font_id = pending.entry.font_id,
            fonts = self.header.font_count,
            "font cache committed"
        );
        Ok(())
    }

    fn erase_cache(&mut self) -> Result<(), CacheError> {
        self.header = CacheHeader::empty();
        self.partition.erase_range(0, self.data_limit())?;
        self.remap()
    }

    /// Forgets every cached font. The staging area is left alone.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        self.erase_cache()?;
        event!(Level::DEBUG, "font cache cleared");
        Ok(())
    }

    /// Partition relative offset and size of the staging area.
    pub fn staging_region(&self) -> (u32, u32) {
        (self.data_limit(), self.layout.staging_reserve)
    }

    /// Copies `bytes` into the staging area and maps them, so a source font can be rasterized
    /// straight from flash.
    pub fn stage_to_flash(&mut self, bytes: &[u8]) -> Result<Mapping, CacheError> {
        let reserve = self.layout.staging_reserve;
        let len = u32::try_from(bytes.len())
            .ok()
            .filter(|len| *len <= reserve)
            .ok_or(CacheError::StagingTooLarge {
                len: bytes.len(),
                reserve,
            })?;
        let offset = self.data_limit();
        self.partition.erase_range(offset, len)?;
        self.partition.write_padded::<WRITE_BUFFER>(offset, bytes)?;
        event!(Level::DEBUG, len, "staged font data");
        self.map_staging(len)
    }

    pub fn map_staging(&self, len: u32) -> Result<Mapping, CacheError> {
        if len > self.layout.staging_reserve {
            return Err(CacheError::StagingTooLarge {
                len: len as usize,
                reserve: self.layout.staging_reserve,
            });
        }
        Ok(self.partition.map(self.data_limit(), len)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::glyph_store::test_font;
    use alloc::vec::Vec;
    use core::cell::RefCell;
    use inkleaf_embedded::RamNorFlash;

    const SECTORS: u32 = 16;

    fn layout() -> CacheLayout {
        CacheLayout {
            header_size: 4096,
            staging_reserve: 8192,
            style_estimate: 4096,
        }
    }

    fn partition(flash: &RefCell<RamNorFlash>) -> FlashPartition<'_, RamNorFlash> {
        FlashPartition::new(flash, 0, SECTORS, "font-cache")
    }

    fn with_bold(blob: &[u8]) -> [Option<&[u8]>; NUM_STYLES] {
        [Some(blob), Some(blob), None, None]
    }

    #[test]
    fn blobs_survive_reopen() {
        let flash = RefCell::new(RamNorFlash::new(SECTORS as usize));
        let blob = test_font::blob();
        let mut cache = FontCache::open(partition(&flash), layout()).unwrap();
        assert!(!cache.has_font(7));

        let mut seen = Vec::new();
        cache.store_blobs(7, with_bold(&blob), |p| seen.push(p)).unwrap();
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            cache.get_font(7, FontStyle::Regular).map(|s| s.text_advance("AV")),
            Some(22)
        );

        let cache = FontCache::open(partition(&flash), layout()).unwrap();
        assert!(cache.has_font(7));
        assert!(cache.get_font(7, FontStyle::Bold).is_some());
        assert!(cache.get_font(7, FontStyle::Italic).is_none());
        let entry = cache.entries()[0];
        assert_eq!(entry.offsets[0] % 4096, 0);
        assert_eq!(entry.offsets[1], 8192);
        assert_eq!(entry.sizes[0] as usize, blob.len());

        let family = cache.build_font_family(7).unwrap();
        assert_eq!(family.text_advance("fi", FontStyle::Italic), 15);
        assert!(cache.build_font_family(8).is_none());
    }

    #[test]
    fn erased_or_corrupt_directory_is_empty() {
        let flash = RefCell::new(RamNorFlash::new(SECTORS as usize));
        let cache = FontCache::open(partition(&flash), layout()).unwrap();
        assert!(cache.entries().is_empty());

        let p = partition(&flash);
        p.nor_write(0, &[0x54, 0x4e, 0x4f, 0x46, 9, 0, 0, 0]).unwrap();
        let cache = FontCache::open(p, layout()).unwrap();
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn failed_write_keeps_previous_directory() {
        let flash = RefCell::new(RamNorFlash::new(SECTORS as usize));
        let blob = test_font::blob();
        let mut cache = FontCache::open(partition(&flash), layout()).unwrap();
        cache.store_blobs(1, with_bold(&blob), |_| {}).unwrap();

        // style writes only, the directory write comes after these
        let style_writes = 2 * blob.len().div_ceil(WRITE_BUFFER);
        for n in 0..style_writes {
            flash.borrow_mut().fail_after_writes(n);
            let result = cache.store_blobs(2, with_bold(&blob), |_| {});
            assert!(matches!(result, Err(CacheError::Flash(_))), "{n}");
            flash.borrow_mut().stop_failing();

            let reopened = FontCache::open(partition(&flash), layout()).unwrap();
            assert!(reopened.has_font(1));
            assert!(!reopened.has_font(2));
            assert!(reopened.get_font(1, FontStyle::Bold).is_some());
            assert!(!cache.has_font(2));
        }

        cache.store_blobs(2, with_bold(&blob), |_| {}).unwrap();
        let reopened = FontCache::open(partition(&flash), layout()).unwrap();
        assert!(reopened.has_font(1) && reopened.has_font(2));
    }

    #[test]
    fn full_cache_is_erased_before_writing() {
        let flash = RefCell::new(RamNorFlash::new(SECTORS as usize));
        let blob = test_font::blob();
        // three single style fonts don't fit alongside the reserve for a fourth
        let layout = CacheLayout {
            style_estimate: 11264,
            ..layout()
        };
        let mut cache = FontCache::open(partition(&flash), layout).unwrap();
        let regular = [Some(blob.as_slice()), None, None, None];
        cache.store_blobs(1, regular, |_| {}).unwrap();
        cache.store_blobs(2, regular, |_| {}).unwrap();
        assert!(cache.has_font(1) && cache.has_font(2));

        cache.store_blobs(3, regular, |_| {}).unwrap();
        assert!(!cache.has_font(1));
        assert!(!cache.has_font(2));
        assert_eq!(cache.entries()[0].offsets[0], 4096);
        assert!(cache.get_font(3, FontStyle::Regular).is_some());
    }

    #[test]
    fn recaching_replaces_entry() {
        let flash = RefCell::new(RamNorFlash::new(SECTORS as usize));
        let blob = test_font::blob();
        let mut cache = FontCache::open(partition(&flash), layout()).unwrap();
        cache.store_blobs(4, with_bold(&blob), |_| {}).unwrap();
        cache
            .store_blobs(4, [Some(blob.as_slice()), None, None, None], |_| {})
            .unwrap();
        assert_eq!(cache.entries().len(), 1);
        assert!(cache.get_font(4, FontStyle::Bold).is_none());
    }

    #[test]
    fn invalid_blobs_are_refused() {
        let flash = RefCell::new(RamNorFlash::new(SECTORS as usize));
        let mut cache = FontCache::open(partition(&flash), layout()).unwrap();
        let result = cache.store_blobs(1, [Some(&[1, 2, 3][..]), None, None, None], |_| {});
        assert!(matches!(result, Err(CacheError::InvalidBlob(_))));
        assert!(!cache.has_font(1));
    }

    #[test]
    fn staging_round_trip() {
        let flash = RefCell::new(RamNorFlash::new(SECTORS as usize));
        let mut cache = FontCache::open(partition(&flash), layout()).unwrap();
        assert_eq!(cache.staging_region(), (53248, 8192));

        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let staged = cache.stage_to_flash(&data).unwrap();
        assert_eq!(&staged[..], &data[..]);
        assert_eq!(&cache.map_staging(10).unwrap()[..], &data[..10]);

        assert!(matches!(
            cache.stage_to_flash(&[0; 8193]),
            Err(CacheError::StagingTooLarge { .. })
        ));

        // clearing the cache leaves staged data in place
        cache.clear().unwrap();
        assert_eq!(&cache.map_staging(5000).unwrap()[..], &data[..]);
    }

    #[test]
    fn undersized_partition_is_rejected() {
        let flash = RefCell::new(RamNorFlash::new(3));
        let p = FlashPartition::new(&flash, 0, 3, "font-cache");
        assert!(matches!(
            FontCache::open(p, layout()),
            Err(CacheError::PartitionTooSmall { .. })
        ));
    }
}
