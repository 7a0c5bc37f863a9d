//! The per chapter page cache.
//!
//! ```text
//! header (27 bytes) | page 0 | page 1 | ... | LUT: u32 x page_count | anchor map
//! ```
//!
//! The header repeats every layout parameter that affects pagination so a stale file is
//! detected on load. Page count and the two trailing offsets are patched in once everything
//! else has been written, so a half written file has a zero LUT offset and never loads.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use bincode::error::{DecodeError, EncodeError};
use tracing::{event, Level};

use crate::hyphenation::Hyphenator;
use crate::layout::{Alignment, LayoutConfig, TextMeasure};
use crate::page::{ContentEvent, Page, PageBuilder};
use crate::storage::SectionStorage;

pub const SECTION_FILE_VERSION: u8 = 14;
pub const HEADER_SIZE: u64 = 27;
/// Where `page_count`, `lut_offset` and `anchor_map_offset` start.
const TRAILER_OFFSET: u64 = HEADER_SIZE - 10;

const BINCODE_CONFIG: bincode::config::Configuration<
    bincode::config::LittleEndian,
    bincode::config::Fixint,
    bincode::config::NoLimit,
> = bincode::config::standard().with_fixed_int_encoding();

/// Everything that changes how a chapter paginates. A cached file is only valid for the
/// parameters it was built with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionParams {
    pub font_id: i32,
    pub line_compression: f32,
    pub extra_paragraph_spacing: bool,
    pub alignment: Alignment,
    pub viewport_width: u16,
    pub viewport_height: u16,
    pub hyphenation: bool,
    pub embedded_style: bool,
}

impl SectionParams {
    pub fn layout_config(&self) -> LayoutConfig {
        LayoutConfig {
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            alignment: self.alignment,
            hyphenation: self.hyphenation,
            line_compression: self.line_compression,
            extra_paragraph_spacing: self.extra_paragraph_spacing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, bincode::Encode, bincode::Decode)]
struct SectionHeader {
    version: u8,
    font_id: i32,
    line_compression: f32,
    extra_paragraph_spacing: bool,
    alignment: u8,
    viewport_width: u16,
    viewport_height: u16,
    hyphenation: bool,
    embedded_style: bool,
    trailer: SectionTrailer,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, bincode::Encode, bincode::Decode)]
struct SectionTrailer {
    page_count: u16,
    lut_offset: u32,
    anchor_map_offset: u32,
}

impl SectionHeader {
    fn new(params: &SectionParams) -> Self {
        Self {
            version: SECTION_FILE_VERSION,
            font_id: params.font_id,
            line_compression: params.line_compression,
            extra_paragraph_spacing: params.extra_paragraph_spacing,
            alignment: params.alignment.into(),
            viewport_width: params.viewport_width,
            viewport_height: params.viewport_height,
            hyphenation: params.hyphenation,
            embedded_style: params.embedded_style,
            trailer: SectionTrailer::default(),
        }
    }

    fn params(&self) -> Option<SectionParams> {
        Some(SectionParams {
            font_id: self.font_id,
            line_compression: self.line_compression,
            extra_paragraph_spacing: self.extra_paragraph_spacing,
            alignment: Alignment::try_from(self.alignment).ok()?,
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            hyphenation: self.hyphenation,
            embedded_style: self.embedded_style,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionState {
    Unbuilt,
    Building,
    Built,
}

#[derive(Debug)]
pub enum SectionError {
    Io(io::Error),
    Encode(EncodeError),
    Decode(DecodeError),
    NotBuilt,
    PageOutOfRange { page: u16, page_count: u16 },
    InvalidPageOffset { page: u16 },
    TooManyPages,
    TooManyAnchors,
}

impl fmt::Display for SectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionError::Io(e) => write!(f, "section file i/o failed: {e}"),
            SectionError::Encode(e) => write!(f, "could not encode page: {e}"),
            SectionError::Decode(e) => write!(f, "could not decode section data: {e}"),
            SectionError::NotBuilt => write!(f, "section has not been built"),
            SectionError::PageOutOfRange { page, page_count } => {
                write!(f, "page {page} is out of range, section has {page_count} pages")
            }
            SectionError::InvalidPageOffset { page } => {
                write!(f, "page {page} has an invalid offset")
            }
            SectionError::TooManyPages => write!(f, "section has more pages than fit in a u16"),
            SectionError::TooManyAnchors => {
                write!(f, "section has more anchors than fit in a u16")
            }
        }
    }
}

impl std::error::Error for SectionError {}

impl From<io::Error> for SectionError {
    fn from(e: io::Error) -> Self {
        SectionError::Io(e)
    }
}

impl From<EncodeError> for SectionError {
    fn from(e: EncodeError) -> Self {
        SectionError::Encode(e)
    }
}

impl From<DecodeError> for SectionError {
    fn from(e: DecodeError) -> Self {
        SectionError::Decode(e)
    }
}

/// A table of contents entry that points into this section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub toc_index: usize,
    /// Fragment id the entry links to, empty for the start of the section.
    pub anchor: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TocBoundary {
    toc_index: usize,
    start_page: u16,
}

/// One spine item's paginated cache.
pub struct Section<S: SectionStorage> {
    storage: S,
    spine_index: usize,
    key: String,
    state: SectionState,
    file: Option<S::File>,
    trailer: SectionTrailer,
    spine_toc_index: Option<usize>,
    toc_boundaries: Vec<TocBoundary>,
}

impl<S: SectionStorage> Section<S> {
    pub fn new(storage: S, spine_index: usize) -> Self {
        Self {
            storage,
            spine_index,
            key: format!("section_{spine_index}"),
            state: SectionState::Unbuilt,
            file: None,
            trailer: SectionTrailer::default(),
            spine_toc_index: None,
            toc_boundaries: vec![],
        }
    }

    pub fn spine_index(&self) -> usize {
        self.spine_index
    }

    pub fn state(&self) -> SectionState {
        self.state
    }

    pub fn page_count(&self) -> u16 {
        self.trailer.page_count
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Opens the cached file if it was built with `params`. A stale or damaged file is deleted
    /// and `false` returned so the caller rebuilds.
    pub fn load_section_file(&mut self, params: &SectionParams) -> Result<bool, SectionError> {
        self.close();
        let Some(mut file) = self.storage.open(&self.key)? else {
            return Ok(false);
        };
        file.seek(SeekFrom::Start(0))?;
        let header: Result<SectionHeader, _> =
            bincode::decode_from_std_read(&mut BufReader::new(&mut file), BINCODE_CONFIG);

        let stale = match &header {
            Err(e) => Some(format!("unreadable header: {e}")),
            Ok(header) if header.version != SECTION_FILE_VERSION => {
                Some(format!("version {}", header.version))
            }
            Ok(header) if header.params().as_ref() != Some(params) => {
                Some("layout parameters changed".into())
            }
            Ok(header) if header.trailer.lut_offset == 0 => Some("incomplete build".into()),
            Ok(_) => None,
        };
        if let Some(reason) = stale {
            event!(
                Level::DEBUG,
                spine = self.spine_index,
                reason = reason.as_str(),
                "discarding section cache"
            );
            drop(file);
            self.clear_cache()?;
            return Ok(false);
        }

        if let Ok(header) = header {
            self.trailer = header.trailer;
        }
        self.file = Some(file);
        self.state = SectionState::Built;
        Ok(true)
    }

    /// Paginates `content` and writes the section file. On any failure the partial file is
    /// removed and the section is left unbuilt.
    pub fn create_section_file(
        &mut self,
        params: &SectionParams,
        measure: &dyn TextMeasure,
        hyphenator: Option<&dyn Hyphenator>,
        toc_anchors: &BTreeSet<String>,
        content: impl IntoIterator<Item = io::Result<ContentEvent>>,
    ) -> Result<(), SectionError> {
        self.close();
        self.state = SectionState::Building;
        let builder = PageBuilder::new(measure, hyphenator, params.layout_config(), toc_anchors);

        match self.write_section(params, builder, content) {
            Ok((file, trailer)) => {
                event!(
                    Level::DEBUG,
                    spine = self.spine_index,
                    pages = trailer.page_count,
                    "section built"
                );
                self.file = Some(file);
                self.trailer = trailer;
                self.state = SectionState::Built;
                Ok(())
            }
            Err(e) => {
                event!(
                    Level::ERROR,
                    spine = self.spine_index,
                    error = %e,
                    "section build failed"
                );
                if let Err(remove) = self.storage.remove(&self.key) {
                    event!(Level::ERROR, error = %remove, "could not remove partial section file");
                }
                self.state = SectionState::Unbuilt;
                Err(e)
            }
        }
    }

    fn write_section(
        &self,
        params: &SectionParams,
        mut builder: PageBuilder<'_>,
        content: impl IntoIterator<Item = io::Result<ContentEvent>>,
    ) -> Result<(S::File, SectionTrailer), SectionError> {
        let mut writer = BufWriter::new(self.storage.create(&self.key)?);
        let mut header = SectionHeader::new(params);
        bincode::encode_into_std_write(header, &mut writer, BINCODE_CONFIG)?;

        let mut position = HEADER_SIZE;
        let mut offsets: Vec<u32> = vec![];
        let mut write_pages = |builder: &mut PageBuilder<'_>,
                               writer: &mut BufWriter<S::File>|
         -> Result<(), SectionError> {
            while let Some(page) = builder.next_page() {
                let page_index =
                    u16::try_from(offsets.len()).map_err(|_| SectionError::TooManyPages)?;
                let offset = u32::try_from(position).unwrap_or(0);
                if offset == 0 {
                    return Err(SectionError::InvalidPageOffset { page: page_index });
                }
                position += bincode::encode_into_std_write(page, writer, BINCODE_CONFIG)? as u64;
                offsets.push(offset);
            }
            Ok(())
        };

        for event in content {
            builder.push(event?);
            write_pages(&mut builder, &mut writer)?;
        }
        builder.finish();
        write_pages(&mut builder, &mut writer)?;

        let page_count = u16::try_from(offsets.len()).map_err(|_| SectionError::TooManyPages)?;
        let lut_offset = u32::try_from(position).map_err(|_| SectionError::TooManyPages)?;
        for offset in &offsets {
            writer.write_all(&offset.to_le_bytes())?;
        }
        position += 4 * offsets.len() as u64;

        let anchor_map_offset = u32::try_from(position).map_err(|_| SectionError::TooManyPages)?;
        let anchors = builder.into_anchors();
        let anchor_count = u16::try_from(anchors.len()).map_err(|_| SectionError::TooManyAnchors)?;
        writer.write_all(&anchor_count.to_le_bytes())?;
        for (anchor, page) in &anchors {
            let len = u32::try_from(anchor.len()).map_err(|_| SectionError::TooManyAnchors)?;
            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(anchor.as_bytes())?;
            writer.write_all(&page.to_le_bytes())?;
        }

        header.trailer = SectionTrailer {
            page_count,
            lut_offset,
            anchor_map_offset,
        };
        writer.seek(SeekFrom::Start(TRAILER_OFFSET))?;
        bincode::encode_into_std_write(header.trailer, &mut writer, BINCODE_CONFIG)?;
        let mut file = writer.into_inner().map_err(|e| e.into_error())?;
        file.flush()?;
        Ok((file, header.trailer))
    }

    fn file(&mut self) -> Result<&mut S::File, SectionError> {
        match (self.state, self.file.as_mut()) {
            (SectionState::Built, Some(file)) => Ok(file),
            _ => Err(SectionError::NotBuilt),
        }
    }

    fn read_u32_at(&mut self, offset: u64) -> Result<u32, SectionError> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = [0u8; 4];
        file.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn load_page(&mut self, page: u16) -> Result<Page, SectionError> {
        let page_count = self.trailer.page_count;
        if self.state != SectionState::Built {
            return Err(SectionError::NotBuilt);
        }
        if page >= page_count {
            return Err(SectionError::PageOutOfRange { page, page_count });
        }
        let lut_entry = self.trailer.lut_offset as u64 + 4 * page as u64;
        let offset = self.read_u32_at(lut_entry)?;
        if offset == 0 {
            return Err(SectionError::InvalidPageOffset { page });
        }
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset as u64))?;
        Ok(bincode::decode_from_std_read(
            &mut BufReader::new(file),
            BINCODE_CONFIG,
        )?)
    }

    pub fn read_anchor_map(&mut self) -> Result<BTreeMap<String, u16>, SectionError> {
        let offset = self.trailer.anchor_map_offset as u64;
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);

        let mut count = [0u8; 2];
        reader.read_exact(&mut count)?;
        let mut anchors = BTreeMap::new();
        for _ in 0..u16::from_le_bytes(count) {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            // lengths come from disk, so only what is actually there gets buffered
            let len = u32::from_le_bytes(len) as u64;
            let mut anchor = vec![];
            if reader.by_ref().take(len).read_to_end(&mut anchor)? as u64 != len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "anchor runs past the end of the section file",
                )
                .into());
            }
            let mut page = [0u8; 2];
            reader.read_exact(&mut page)?;
            let anchor = String::from_utf8(anchor)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            anchors.insert(anchor, u16::from_le_bytes(page));
        }
        Ok(anchors)
    }

    pub fn page_for_anchor(&mut self, anchor: &str) -> Result<Option<u16>, SectionError> {
        if anchor.is_empty() {
            return Ok(None);
        }
        Ok(self.read_anchor_map()?.get(anchor).copied())
    }

    /// Resolves where each TOC entry of this section starts. Entries with an empty anchor, or
    /// one that never appeared in the chapter, start at the first page.
    pub fn load_toc_boundaries(
        &mut self,
        spine_toc_index: Option<usize>,
        entries: &[TocEntry],
    ) -> Result<(), SectionError> {
        let anchors = self.read_anchor_map()?;
        let mut boundaries: Vec<TocBoundary> = entries
            .iter()
            .map(|entry| TocBoundary {
                toc_index: entry.toc_index,
                start_page: match entry.anchor.as_str() {
                    "" => 0,
                    anchor => anchors.get(anchor).copied().unwrap_or(0),
                },
            })
            .collect();
        boundaries.sort_by_key(|b| (b.start_page, b.toc_index));
        self.spine_toc_index = spine_toc_index;
        self.toc_boundaries = boundaries;
        Ok(())
    }

    /// The TOC entry a page belongs to: the last boundary at or before it.
    pub fn toc_index_for_page(&self, page: u16) -> Option<usize> {
        let Some(first) = self.toc_boundaries.first() else {
            return self.spine_toc_index;
        };
        let after = self
            .toc_boundaries
            .partition_point(|b| b.start_page <= page);
        match after {
            0 => Some(first.toc_index),
            n => Some(self.toc_boundaries[n - 1].toc_index),
        }
    }

    pub fn page_for_toc_index(&self, toc_index: usize) -> Option<u16> {
        self.toc_boundaries
            .iter()
            .find(|b| b.toc_index == toc_index)
            .map(|b| b.start_page)
    }

    fn close(&mut self) {
        self.file = None;
        self.trailer = SectionTrailer::default();
        self.toc_boundaries.clear();
        self.state = SectionState::Unbuilt;
    }

    /// Deletes the cached file. Returns whether one existed.
    pub fn clear_cache(&mut self) -> Result<bool, SectionError> {
        self.close();
        Ok(self.storage.remove(&self.key)?)
    }
}
