//! Prebuilt font partition. Fonts are grouped so that only the always mapped `ui` group and one
//! reader group occupy the data address space at a time.
//!
//! ```text
//! PartitionHeader | GroupEntry * group_count | FontEntry * font_count | group data ...
//! ```
//!
//! Every offset is relative to the start of the partition. A font belongs to the group whose
//! data range contains its bitmap.
use crate::format::{Glyph, Record, Table, UnicodeInterval};
use crate::glyph_store::{FontMetrics, GlyphStore};
use alloc::vec::Vec;
use embedded_storage::nor_flash::{NorFlash, NorFlashErrorKind};
use inkleaf_embedded::{
    BincodeFlashReader, FlashPartition, MapNorFlash, Mapping, FLASH_BINCODE_CONFIG,
};
use tracing::{event, Level};

pub const MAGIC: u32 = 0x4350_4654;
pub const VERSION: u32 = 2;
pub const UI_GROUP: &str = "ui";
pub const GROUP_NAME_LEN: usize = 16;
pub const FONT_NAME_LEN: usize = 32;
pub const HEADER_SIZE: usize = 20;
pub const GROUP_ENTRY_SIZE: usize = 24;
pub const FONT_ENTRY_SIZE: usize = 68;

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionHeader {
    pub magic: u32,
    pub version: u32,
    pub font_count: u32,
    pub data_size: u32,
    pub group_count: u32,
}

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: [u8; GROUP_NAME_LEN],
    pub data_offset: u32,
    pub data_size: u32,
}

impl GroupEntry {
    pub fn name(&self) -> &str {
        name_str(&self.name)
    }

    fn end(&self) -> u64 {
        self.data_offset as u64 + self.data_size as u64
    }

    fn contains(&self, offset: u32) -> bool {
        offset >= self.data_offset && (offset as u64) < self.end()
    }
}

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontEntry {
    pub name: [u8; FONT_NAME_LEN],
    pub bitmap_offset: u32,
    pub bitmap_size: u32,
    pub glyph_offset: u32,
    pub glyph_count: u32,
    pub interval_offset: u32,
    pub interval_count: u32,
    pub advance_y: u8,
    pub is_2bit: u8,
    pub pad: [u8; 2],
    pub ascender: i32,
    pub descender: i32,
}

impl FontEntry {
    pub fn name(&self) -> &str {
        name_str(&self.name)
    }

    fn metrics(&self) -> FontMetrics {
        FontMetrics {
            advance_y: self.advance_y,
            ascender: self.ascender,
            descender: self.descender,
            is_2bit: self.is_2bit != 0,
        }
    }
}

/// The name up to the first NUL. Names that are not UTF-8 never match anything.
fn name_str(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    core::str::from_utf8(&bytes[..end]).unwrap_or("")
}

#[cfg(feature = "std")]
fn fixed_name<const N: usize>(name: &str) -> Result<[u8; N], BankError> {
    if name.is_empty() || name.len() > N || name.as_bytes().contains(&0) {
        return Err(BankError::BadName);
    }
    let mut out = [0u8; N];
    out[..name.len()].copy_from_slice(name.as_bytes());
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    Flash(NorFlashErrorKind),
    BadMagic(u32),
    UnsupportedVersion(u32),
    Truncated,
    GroupOutOfBounds { group: usize },
    OverlappingGroups { first: usize, second: usize },
    MissingUiGroup,
    UnknownGroup,
    BadName,
    TooLarge,
}

impl core::fmt::Display for BankError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BankError::Flash(e) => write!(f, "font partition flash error: {e:?}"),
            BankError::BadMagic(magic) => {
                write!(f, "font partition magic was {magic:#010x}, expected {MAGIC:#010x}")
            }
            BankError::UnsupportedVersion(version) => {
                write!(f, "font partition version {version} is not supported")
            }
            BankError::Truncated => write!(f, "font partition directory is truncated"),
            BankError::GroupOutOfBounds { group } => {
                write!(f, "font group {group} extends past the partition")
            }
            BankError::OverlappingGroups { first, second } => {
                write!(f, "font groups {first} and {second} overlap")
            }
            BankError::MissingUiGroup => write!(f, "font partition has no '{UI_GROUP}' group"),
            BankError::UnknownGroup => write!(f, "no such font group"),
            BankError::BadName => write!(f, "font or group name does not fit its field"),
            BankError::TooLarge => write!(f, "font partition image exceeds 4 GiB"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BankError {}

impl From<NorFlashErrorKind> for BankError {
    fn from(e: NorFlashErrorKind) -> Self {
        BankError::Flash(e)
    }
}

/// Refers to a font by position in the directory. Resolving it yields a store only while the
/// font's group is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontHandle {
    index: usize,
}

struct MappedGroup {
    index: usize,
    data: Mapping,
}

pub struct FontBank<'a, S> {
    partition: FlashPartition<'a, S>,
    groups: Vec<GroupEntry>,
    fonts: Vec<FontEntry>,
    font_groups: Vec<Option<usize>>,
    ui: MappedGroup,
    reader: Option<MappedGroup>,
    generation: u32,
}

fn decode<T: bincode::Decode<()>, S: NorFlash>(
    reader: &mut BincodeFlashReader<'_, S>,
) -> Result<T, BankError> {
    bincode::decode_from_reader(reader, FLASH_BINCODE_CONFIG).map_err(|e| {
        event!(Level::ERROR, error = %e, "font partition directory read failed");
        BankError::Truncated
    })
}

fn check_groups(groups: &[GroupEntry], directory_end: u64, size: u64) -> Result<(), BankError> {
    for (i, group) in groups.iter().enumerate() {
        if (group.data_offset as u64) < directory_end || group.end() > size {
            return Err(BankError::GroupOutOfBounds { group: i });
        }
    }
    for (i, a) in groups.iter().enumerate() {
        for (j, b) in groups.iter().enumerate().skip(i + 1) {
            if (a.data_offset as u64) < b.end() && (b.data_offset as u64) < a.end() {
                return Err(BankError::OverlappingGroups { first: i, second: j });
            }
        }
    }
    Ok(())
}

fn region(data: &[u8], base: u32, offset: u32, len: usize) -> Option<&[u8]> {
    let start = offset.checked_sub(base)? as usize;
    data.get(start..start.checked_add(len)?)
}

impl<'a, S: MapNorFlash> FontBank<'a, S> {
    /// Reads the directories into RAM and maps the `ui` group.
    pub fn open(partition: FlashPartition<'a, S>) -> Result<Self, BankError> {
        let mut reader = partition.bincode_reader();
        let header: PartitionHeader = decode(&mut reader)?;
        if header.magic != MAGIC {
            return Err(BankError::BadMagic(header.magic));
        }
        if header.version != VERSION {
            return Err(BankError::UnsupportedVersion(header.version));
        }
        let directory_end = HEADER_SIZE as u64
            + header.group_count as u64 * GROUP_ENTRY_SIZE as u64
            + header.font_count as u64 * FONT_ENTRY_SIZE as u64;
        if directory_end > partition.size() as u64 {
            return Err(BankError::Truncated);
        }

        let groups = (0..header.group_count)
            .map(|_| decode::<GroupEntry, _>(&mut reader))
            .collect::<Result<Vec<_>, _>>()?;
        let fonts = (0..header.font_count)
            .map(|_| decode::<FontEntry, _>(&mut reader))
            .collect::<Result<Vec<_>, _>>()?;
        check_groups(&groups, directory_end, partition.size() as u64)?;

        let font_groups = fonts
            .iter()
            .map(|font| groups.iter().position(|g| g.contains(font.bitmap_offset)))
            .collect();

        let ui_index = groups
            .iter()
            .position(|g| g.name() == UI_GROUP)
            .ok_or(BankError::MissingUiGroup)?;
        let ui = Self::map_group(&partition, &groups, ui_index)?;

        event!(
            Level::DEBUG,
            fonts = fonts.len(),
            groups = groups.len(),
            ui_size = groups[ui_index].data_size,
            "opened font partition"
        );
        Ok(FontBank {
            partition,
            groups,
            fonts,
            font_groups,
            ui,
            reader: None,
            generation: 0,
        })
    }

    fn map_group(
        partition: &FlashPartition<'a, S>,
        groups: &[GroupEntry],
        index: usize,
    ) -> Result<MappedGroup, BankError> {
        let group = &groups[index];
        let data = partition
            .map(group.data_offset, group.data_size)
            .inspect_err(|e| {
                event!(Level::ERROR, group = group.name(), error = ?e, "mapping font group failed")
            })?;
        Ok(MappedGroup { index, data })
    }

    /// Makes `name` the reader group. Fonts of the previous reader group stop resolving.
    pub fn load_group(&mut self, name: &str) -> Result<(), BankError> {
        let index = self
            .groups
            .iter()
            .position(|g| g.name() == name)
            .ok_or(BankError::UnknownGroup)?;
        if self.reader.as_ref().map(|r| r.index) == Some(index) {
            return Ok(());
        }
        if self.reader.take().is_some() {
            self.generation = self.generation.wrapping_add(1);
        }
        let mapped = Self::map_group(&self.partition, &self.groups, index)?;
        self.reader = Some(mapped);
        self.generation = self.generation.wrapping_add(1);
        event!(
            Level::DEBUG,
            group = name,
            size = self.groups[index].data_size,
            generation = self.generation,
            "reader font group mapped"
        );
        Ok(())
    }

    pub fn current_reader_group(&self) -> Option<&str> {
        self.reader.as_ref().map(|r| self.groups[r.index].name())
    }

    /// Changes whenever a reader group is unmapped or mapped.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn font_count(&self) -> usize {
        self.fonts.len()
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.groups.iter().map(GroupEntry::name)
    }

    pub fn font_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fonts.iter().map(FontEntry::name)
    }

    pub fn handle(&self, name: &str) -> Option<FontHandle> {
        let index = self.fonts.iter().position(|f| f.name() == name);
        if index.is_none() {
            event!(Level::ERROR, font = name, "font not found");
        }
        index.map(|index| FontHandle { index })
    }

    pub fn font(&self, name: &str) -> Option<GlyphStore<'_>> {
        self.resolve(self.handle(name)?)
    }

    fn mapped(&self, group: usize) -> Option<&MappedGroup> {
        if self.ui.index == group {
            return Some(&self.ui);
        }
        self.reader.as_ref().filter(|r| r.index == group)
    }

    /// The font's store, or `None` while its group is not mapped.
    pub fn resolve(&self, handle: FontHandle) -> Option<GlyphStore<'_>> {
        let entry = self.fonts.get(handle.index)?;
        let group = (*self.font_groups.get(handle.index)?)?;
        let data = &self.mapped(group)?.data;
        let base = self.groups[group].data_offset;

        let glyph_count = entry.glyph_count as usize;
        let interval_count = entry.interval_count as usize;
        let bitmap = region(data, base, entry.bitmap_offset, entry.bitmap_size as usize)?;
        let glyphs = region(data, base, entry.glyph_offset, glyph_count.checked_mul(Glyph::SIZE)?)
            .and_then(|bytes| Table::new(bytes, glyph_count));
        let intervals = region(
            data,
            base,
            entry.interval_offset,
            interval_count.checked_mul(UnicodeInterval::SIZE)?,
        )
        .and_then(|bytes| Table::new(bytes, interval_count));
        match (glyphs, intervals) {
            (Some(glyphs), Some(intervals)) => {
                Some(GlyphStore::new(bitmap, glyphs, intervals, entry.metrics()))
            }
            _ => {
                event!(Level::ERROR, font = entry.name(), "font tables fall outside their group");
                None
            }
        }
    }
}

#[cfg(feature = "std")]
fn encode_into(out: &mut Vec<u8>, value: impl bincode::Encode) -> Result<(), BankError> {
    let bytes =
        bincode::encode_to_vec(value, FLASH_BINCODE_CONFIG).map_err(|_| BankError::TooLarge)?;
    out.extend_from_slice(&bytes);
    Ok(())
}

/// Packs font blobs into a partition image. Partition fonts carry no kerning or ligatures.
#[cfg(feature = "std")]
#[derive(Debug, Default)]
pub struct PartitionBuilder {
    groups: Vec<(std::string::String, Vec<(std::string::String, crate::blob::FontBlob)>)>,
}

#[cfg(feature = "std")]
impl PartitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a font to `group`, creating the group after the existing ones if it is new.
    pub fn add_font(&mut self, group: &str, name: &str, blob: &[u8]) -> Result<(), BankError> {
        fixed_name::<GROUP_NAME_LEN>(group)?;
        fixed_name::<FONT_NAME_LEN>(name)?;
        let store = crate::blob::parse(blob).map_err(|e| {
            event!(Level::ERROR, font = name, error = %e, "font blob rejected");
            BankError::Truncated
        })?;
        let blob = crate::blob::FontBlob::from_store(&store);
        match self.groups.iter_mut().find(|(g, _)| g == group) {
            Some((_, fonts)) => fonts.push((name.into(), blob)),
            None => self.groups.push((group.into(), vec![(name.into(), blob)])),
        }
        Ok(())
    }

    /// The image with every group starting on a sector boundary.
    pub fn build(&self) -> Result<Vec<u8>, BankError> {
        use crate::format::write_records;
        use inkleaf_embedded::sector_align;

        let font_count: usize = self.groups.iter().map(|(_, fonts)| fonts.len()).sum();
        let directory_len =
            HEADER_SIZE + self.groups.len() * GROUP_ENTRY_SIZE + font_count * FONT_ENTRY_SIZE;
        let to_u32 = |n: usize| u32::try_from(n).map_err(|_| BankError::TooLarge);

        let mut data = vec![0xff; sector_align(to_u32(directory_len)?) as usize];
        let data_start = data.len();
        let mut group_entries = Vec::with_capacity(self.groups.len());
        let mut font_entries = Vec::with_capacity(font_count);
        for (group, fonts) in &self.groups {
            data.resize(sector_align(to_u32(data.len())?) as usize, 0xff);
            let group_start = data.len();
            for (name, font) in fonts {
                let bitmap_offset = to_u32(data.len())?;
                data.extend_from_slice(&font.bitmap);
                data.resize(data.len().next_multiple_of(4), 0xff);
                let glyph_offset = to_u32(data.len())?;
                data.extend_from_slice(&write_records(&font.glyphs));
                let interval_offset = to_u32(data.len())?;
                data.extend_from_slice(&write_records(&font.intervals));
                font_entries.push(FontEntry {
                    name: fixed_name(name)?,
                    bitmap_offset,
                    bitmap_size: to_u32(font.bitmap.len())?,
                    glyph_offset,
                    glyph_count: to_u32(font.glyphs.len())?,
                    interval_offset,
                    interval_count: to_u32(font.intervals.len())?,
                    advance_y: font.metrics.advance_y,
                    is_2bit: font.metrics.is_2bit as u8,
                    pad: [0; 2],
                    ascender: font.metrics.ascender,
                    descender: font.metrics.descender,
                });
            }
            // an empty group still needs a byte so fonts can't be attributed to it
            if data.len() == group_start {
                data.push(0xff);
            }
            group_entries.push(GroupEntry {
                name: fixed_name(group)?,
                data_offset: to_u32(group_start)?,
                data_size: to_u32(data.len() - group_start)?,
            });
        }

        let header = PartitionHeader {
            magic: MAGIC,
            version: VERSION,
            font_count: to_u32(font_count)?,
            data_size: to_u32(data.len() - data_start)?,
            group_count: to_u32(self.groups.len())?,
        };
        let mut directory = Vec::with_capacity(directory_len);
        encode_into(&mut directory, header)?;
        for entry in &group_entries {
            encode_into(&mut directory, entry)?;
        }
        for entry in &font_entries {
            encode_into(&mut directory, entry)?;
        }
        debug_assert_eq!(directory.len(), directory_len);
        data[..directory.len()].copy_from_slice(&directory);
        event!(
            Level::DEBUG,
            fonts = font_count,
            groups = self.groups.len(),
            len = data.len(),
            "built font partition image"
        );
        Ok(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::glyph_store::test_font;
    use core::cell::RefCell;
    use inkleaf_embedded::{RamNorFlash, SECTOR_SIZE};
    use proptest::{collection, prelude::*};

    fn image() -> Vec<u8> {
        let blob = test_font::blob();
        let mut builder = PartitionBuilder::new();
        builder.add_font("ui", "ui-12", &blob).unwrap();
        builder.add_font("bookerly", "bookerly-14", &blob).unwrap();
        builder.add_font("notosans", "noto-14", &blob).unwrap();
        builder.add_font("bookerly", "bookerly-14-bold", &blob).unwrap();
        builder.build().unwrap()
    }

    fn flash(image: &[u8]) -> RefCell<RamNorFlash> {
        RefCell::new(RamNorFlash::from_image(image))
    }

    fn partition(flash: &RefCell<RamNorFlash>) -> FlashPartition<'_, RamNorFlash> {
        let n_sectors = flash.borrow().as_bytes().len() / SECTOR_SIZE;
        FlashPartition::new(flash, 0, n_sectors as u32, "fontdata")
    }

    #[test]
    fn entry_sizes_match_layout() {
        let group = GroupEntry {
            name: [0; GROUP_NAME_LEN],
            data_offset: 0,
            data_size: 0,
        };
        let encoded = bincode::encode_to_vec(group, FLASH_BINCODE_CONFIG).unwrap();
        assert_eq!(encoded.len(), GROUP_ENTRY_SIZE);
        let font = FontEntry {
            name: [0; FONT_NAME_LEN],
            bitmap_offset: 0,
            bitmap_size: 0,
            glyph_offset: 0,
            glyph_count: 0,
            interval_offset: 0,
            interval_count: 0,
            advance_y: 0,
            is_2bit: 0,
            pad: [0; 2],
            ascender: 0,
            descender: 0,
        };
        let encoded = bincode::encode_to_vec(font, FLASH_BINCODE_CONFIG).unwrap();
        assert_eq!(encoded.len(), FONT_ENTRY_SIZE);
    }

    #[test]
    fn ui_group_is_always_mapped() {
        let flash = flash(&image());
        let bank = FontBank::open(partition(&flash)).unwrap();
        assert_eq!(bank.font_count(), 4);
        assert_eq!(
            bank.group_names().collect::<Vec<_>>(),
            ["ui", "bookerly", "notosans"]
        );
        let ui = bank.font("ui-12").unwrap();
        assert_eq!(ui.text_advance("ab"), 20);
        // kerning is not carried by the partition
        assert_eq!(ui.text_advance("AV"), 24);
        assert_eq!(ui.metrics().advance_y, 14);
        assert!(bank.font("bookerly-14").is_none());
        assert!(bank.font("missing").is_none());
        assert_eq!(bank.current_reader_group(), None);
    }

    #[test]
    fn swapping_reader_groups_invalidates_handles() {
        let flash = flash(&image());
        let mut bank = FontBank::open(partition(&flash)).unwrap();
        let regular = bank.handle("bookerly-14").unwrap();
        let bold = bank.handle("bookerly-14-bold").unwrap();
        let noto = bank.handle("noto-14").unwrap();
        assert!(bank.resolve(regular).is_none());

        bank.load_group("bookerly").unwrap();
        assert_eq!(bank.current_reader_group(), Some("bookerly"));
        assert_eq!(bank.generation(), 1);
        assert!(bank.resolve(regular).is_some());
        assert!(bank.resolve(bold).is_some());
        assert!(bank.resolve(noto).is_none());

        bank.load_group("bookerly").unwrap();
        assert_eq!(bank.generation(), 1);

        bank.load_group("notosans").unwrap();
        assert!(bank.generation() > 1);
        assert!(bank.resolve(regular).is_none());
        assert_eq!(bank.resolve(noto).map(|s| s.text_advance("z")), Some(10));
        assert!(bank.font("ui-12").is_some());

        assert_eq!(bank.load_group("comic"), Err(BankError::UnknownGroup));
        assert_eq!(bank.current_reader_group(), Some("notosans"));
    }

    #[test]
    fn groups_start_on_sectors() {
        let flash = flash(&image());
        let bank = FontBank::open(partition(&flash)).unwrap();
        for group in &bank.groups {
            assert_eq!(group.data_offset as usize % SECTOR_SIZE, 0);
        }
        assert_eq!(bank.font_groups, [Some(0), Some(1), Some(1), Some(2)]);
    }

    #[test]
    fn bad_headers_are_rejected() {
        let mut image = image();
        image[0] ^= 1;
        assert!(matches!(
            FontBank::open(partition(&flash(&image))),
            Err(BankError::BadMagic(_))
        ));

        let mut image = self::image();
        image[4] = 3;
        assert_eq!(
            FontBank::open(partition(&flash(&image))).err(),
            Some(BankError::UnsupportedVersion(3))
        );

        let mut image = self::image();
        image[8..12].copy_from_slice(&100_000u32.to_le_bytes());
        assert_eq!(
            FontBank::open(partition(&flash(&image))).err(),
            Some(BankError::Truncated)
        );
    }

    #[test]
    fn missing_ui_group_is_an_error() {
        let mut builder = PartitionBuilder::new();
        builder
            .add_font("bookerly", "bookerly-14", &test_font::blob())
            .unwrap();
        let flash = flash(&builder.build().unwrap());
        assert_eq!(
            FontBank::open(partition(&flash)).err(),
            Some(BankError::MissingUiGroup)
        );
    }

    #[test]
    fn overlapping_groups_are_rejected() {
        let mut image = image();
        // second group's offset moved onto the first group
        let second = HEADER_SIZE + GROUP_ENTRY_SIZE + GROUP_NAME_LEN;
        image[second..second + 4].copy_from_slice(&(SECTOR_SIZE as u32).to_le_bytes());
        assert_eq!(
            FontBank::open(partition(&flash(&image))).err(),
            Some(BankError::OverlappingGroups { first: 0, second: 1 })
        );
    }

    #[test]
    fn names_must_fit() {
        let mut builder = PartitionBuilder::new();
        let blob = test_font::blob();
        assert_eq!(
            builder.add_font("a-very-long-group-name", "f", &blob),
            Err(BankError::BadName)
        );
        assert_eq!(builder.add_font("ui", "", &blob), Err(BankError::BadName));
        assert_eq!(builder.add_font("ui", "f", &[0; 4]), Err(BankError::Truncated));
    }

    proptest! {
        #[test]
        fn arbitrary_images_never_panic(bytes in collection::vec(any::<u8>(), 0..256)) {
            let mut image = bytes;
            image.splice(0..0, MAGIC.to_le_bytes().into_iter().chain(VERSION.to_le_bytes()));
            let flash = flash(&image);
            if let Ok(bank) = FontBank::open(partition(&flash)) {
                for name in bank.font_names() {
                    let _ = bank.font(name);
                }
            }
        }
    }
}
