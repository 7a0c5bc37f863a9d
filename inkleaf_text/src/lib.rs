//! Hyphenation, line breaking, pagination and the on-disk section cache.
pub mod hyphenation;
pub mod layout;
pub mod page;
pub mod section;
pub mod storage;

pub use hyphenation::{Hyphenator, LanguageHyphenator};
pub use layout::{Alignment, LayoutConfig, Paragraph, TextMeasure};
pub use page::{ContentEvent, Page, PageBuilder, PageLine, TextBlock};
pub use section::{Section, SectionError, SectionParams, SectionState, TocEntry};
pub use storage::{FsStorage, MemStorage, SectionStorage};
