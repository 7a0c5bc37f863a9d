//! Pages of positioned text lines and the builder that stacks laid out lines onto them.
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use inkleaf_fonts::FontStyle;
use tracing::{event, Level};

use crate::hyphenation::Hyphenator;
use crate::layout::{Alignment, LayoutConfig, Paragraph, TextMeasure};

/// Paragraphs longer than this are laid out in chunks so buffered words stay bounded.
const FLUSH_WORD_COUNT: usize = 750;

/// One line of words with their x positions and styles.
#[derive(Debug, Clone, PartialEq, Eq, Default, bincode::Encode, bincode::Decode)]
pub struct TextBlock {
    pub words: Vec<String>,
    pub word_x: Vec<u16>,
    pub styles: Vec<FontStyle>,
    pub alignment: Alignment,
}

impl TextBlock {
    pub fn new(alignment: Alignment) -> Self {
        Self {
            alignment,
            ..Default::default()
        }
    }

    pub fn push(&mut self, word: String, x: u16, style: FontStyle) {
        self.words.push(word);
        self.word_x.push(x);
        self.styles.push(style);
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16, FontStyle)> + '_ {
        self.words
            .iter()
            .zip(&self.word_x)
            .zip(&self.styles)
            .map(|((word, x), style)| (word.as_str(), *x, *style))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PageLine {
    /// Top of the line in page pixels.
    pub y: u16,
    pub block: TextBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, bincode::Encode, bincode::Decode)]
pub struct Page {
    pub lines: Vec<PageLine>,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// The word stream produced by the chapter parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentEvent {
    Word {
        text: String,
        style: FontStyle,
        attach_to_previous: bool,
    },
    ParagraphStart {
        alignment: Option<Alignment>,
    },
    ParagraphEnd,
    Anchor {
        id: String,
    },
    PageBreak,
}

impl ContentEvent {
    pub fn word(text: impl Into<String>) -> Self {
        ContentEvent::Word {
            text: text.into(),
            style: FontStyle::Regular,
            attach_to_previous: false,
        }
    }
}

pub struct PageBuilder<'a> {
    measure: &'a dyn TextMeasure,
    hyphenator: Option<&'a dyn Hyphenator>,
    config: LayoutConfig,
    toc_anchors: &'a BTreeSet<String>,
    line_height: u16,
    paragraph: Paragraph,
    current: Page,
    y: u16,
    finished: VecDeque<Page>,
    pages_done: u16,
    anchors: BTreeMap<String, u16>,
}

impl<'a> PageBuilder<'a> {
    /// Anchors in `toc_anchors` start a new page.
    pub fn new(
        measure: &'a dyn TextMeasure,
        hyphenator: Option<&'a dyn Hyphenator>,
        config: LayoutConfig,
        toc_anchors: &'a BTreeSet<String>,
    ) -> Self {
        let line_height = (measure.line_height() as f32 * config.line_compression) as u16;
        Self {
            measure,
            hyphenator: hyphenator.filter(|_| config.hyphenation),
            config,
            toc_anchors,
            line_height: line_height.max(1),
            paragraph: Paragraph::new(config.alignment),
            current: Page::default(),
            y: 0,
            finished: VecDeque::new(),
            pages_done: 0,
            anchors: BTreeMap::new(),
        }
    }

    pub fn line_height(&self) -> u16 {
        self.line_height
    }

    pub fn push(&mut self, content: ContentEvent) {
        match content {
            ContentEvent::Word {
                text,
                style,
                attach_to_previous,
            } => {
                self.paragraph.add_word(text, style, attach_to_previous);
                if self.paragraph.word_count() >= FLUSH_WORD_COUNT {
                    self.layout_paragraph(false);
                }
            }
            ContentEvent::ParagraphStart { alignment } => {
                self.layout_paragraph(true);
                self.paragraph = Paragraph::new(alignment.unwrap_or(self.config.alignment));
            }
            ContentEvent::ParagraphEnd => {
                self.layout_paragraph(true);
                if self.config.extra_paragraph_spacing && !self.current.is_empty() {
                    self.y = self.y.saturating_add(self.line_height / 2);
                }
            }
            ContentEvent::Anchor { id } => {
                if self.toc_anchors.contains(&id) {
                    self.layout_paragraph(true);
                    self.break_page();
                } else {
                    self.layout_paragraph(false);
                }
                let page = self.next_line_page();
                self.anchors.entry(id).or_insert(page);
            }
            ContentEvent::PageBreak => {
                self.layout_paragraph(true);
                self.break_page();
            }
        }
    }

    /// Finished pages in order.
    pub fn next_page(&mut self) -> Option<Page> {
        self.finished.pop_front()
    }

    /// Lays out whatever is buffered and closes the last page.
    pub fn finish(&mut self) {
        self.layout_paragraph(true);
        self.break_page();
    }

    pub fn page_count(&self) -> u16 {
        self.pages_done
    }

    pub fn anchors(&self) -> &BTreeMap<String, u16> {
        &self.anchors
    }

    pub fn into_anchors(self) -> BTreeMap<String, u16> {
        self.anchors
    }

    fn layout_paragraph(&mut self, include_last_line: bool) {
        let mut lines = vec![];
        self.paragraph.layout_and_extract_lines(
            self.measure,
            self.hyphenator,
            self.config.viewport_width,
            include_last_line,
            |line| lines.push(line),
        );
        for line in lines {
            self.add_line(line);
        }
    }

    fn page_is_full(&self) -> bool {
        let bottom = self.y as u32 + self.line_height as u32;
        bottom > self.config.viewport_height as u32 && !self.current.is_empty()
    }

    /// Index of the page the next line will land on.
    fn next_line_page(&self) -> u16 {
        if self.page_is_full() {
            self.pages_done.saturating_add(1)
        } else {
            self.pages_done
        }
    }

    fn add_line(&mut self, block: TextBlock) {
        if self.page_is_full() {
            self.break_page();
        }
        self.current.lines.push(PageLine { y: self.y, block });
        self.y = self.y.saturating_add(self.line_height);
    }

    fn break_page(&mut self) {
        self.y = 0;
        if self.current.is_empty() {
            return;
        }
        let page = core::mem::take(&mut self.current);
        event!(
            Level::TRACE,
            page = self.pages_done,
            lines = page.lines.len(),
            "page complete"
        );
        self.finished.push_back(page);
        self.pages_done = self.pages_done.saturating_add(1);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// 10 px per char, 5 px spaces, 20 px lines.
    struct Monospace;

    impl TextMeasure for Monospace {
        fn text_width(&self, text: &str, _style: FontStyle) -> u32 {
            if text == " " {
                5
            } else {
                10 * text.chars().count() as u32
            }
        }

        fn line_height(&self) -> u32 {
            20
        }
    }

    fn config() -> LayoutConfig {
        LayoutConfig {
            viewport_width: 100,
            viewport_height: 100,
            alignment: Alignment::Left,
            hyphenation: false,
            line_compression: 1.0,
            extra_paragraph_spacing: false,
        }
    }

    fn build(config: LayoutConfig, toc: &BTreeSet<String>, content: Vec<ContentEvent>) -> (Vec<Page>, BTreeMap<String, u16>) {
        let mut builder = PageBuilder::new(&Monospace, None, config, toc);
        let mut pages = vec![];
        for event in content {
            builder.push(event);
            while let Some(page) = builder.next_page() {
                pages.push(page);
            }
        }
        builder.finish();
        while let Some(page) = builder.next_page() {
            pages.push(page);
        }
        assert_eq!(builder.page_count() as usize, pages.len());
        (pages, builder.into_anchors())
    }

    /// One line per word: each word is 90 px wide.
    fn paragraph(words: usize) -> Vec<ContentEvent> {
        let mut content = vec![ContentEvent::ParagraphStart { alignment: None }];
        content.extend((0..words).map(|_| ContentEvent::word("abcdefghi")));
        content.push(ContentEvent::ParagraphEnd);
        content
    }

    #[test]
    fn lines_stack_until_the_page_is_full() {
        let (pages, _) = build(config(), &BTreeSet::new(), paragraph(12));
        let lines: Vec<_> = pages.iter().map(|p| p.lines.len()).collect();
        assert_eq!(lines, [5, 5, 2]);
        let ys: Vec<_> = pages[0].lines.iter().map(|l| l.y).collect();
        assert_eq!(ys, [0, 20, 40, 60, 80]);
        assert_eq!(pages[1].lines[0].y, 0);
    }

    #[test]
    fn line_compression_scales_the_pitch() {
        let config = LayoutConfig {
            line_compression: 1.25,
            ..config()
        };
        let (pages, _) = build(config, &BTreeSet::new(), paragraph(5));
        // 25 px lines: four fit in 100 px
        assert_eq!(pages[0].lines.len(), 4);
        assert_eq!(pages[0].lines[3].y, 75);
    }

    #[test]
    fn paragraphs_get_half_a_line_between_them() {
        let config = LayoutConfig {
            extra_paragraph_spacing: true,
            ..config()
        };
        let mut content = paragraph(2);
        content.extend(paragraph(2));
        let (pages, _) = build(config, &BTreeSet::new(), content);
        let ys: Vec<_> = pages[0].lines.iter().map(|l| l.y).collect();
        assert_eq!(ys, [0, 20, 50, 70]);
    }

    #[test]
    fn toc_anchors_start_a_page() {
        let toc: BTreeSet<String> = ["chapter-2".to_string()].into();
        let mut content = paragraph(2);
        content.push(ContentEvent::Anchor {
            id: "note".into(),
        });
        content.extend(paragraph(1));
        content.push(ContentEvent::Anchor {
            id: "chapter-2".into(),
        });
        content.extend(paragraph(2));
        let (pages, anchors) = build(config(), &toc, content);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].lines.len(), 3);
        assert_eq!(anchors.get("note"), Some(&0));
        assert_eq!(anchors.get("chapter-2"), Some(&1));
    }

    #[test]
    fn anchors_after_a_full_page_point_at_the_next_one() {
        let mut content = paragraph(5);
        content.push(ContentEvent::Anchor { id: "next".into() });
        content.extend(paragraph(1));
        let (pages, anchors) = build(config(), &BTreeSet::new(), content);
        assert_eq!(pages.len(), 2);
        assert_eq!(anchors.get("next"), Some(&1));
    }

    #[test]
    fn explicit_page_breaks_skip_empty_pages() {
        let mut content = vec![ContentEvent::PageBreak];
        content.extend(paragraph(1));
        content.push(ContentEvent::PageBreak);
        content.push(ContentEvent::PageBreak);
        content.extend(paragraph(1));
        let (pages, _) = build(config(), &BTreeSet::new(), content);
        assert_eq!(pages.len(), 2);
    }

    #[test]
    fn paragraph_alignment_overrides_the_default() {
        let content = vec![
            ContentEvent::ParagraphStart {
                alignment: Some(Alignment::Right),
            },
            ContentEvent::word("ab"),
            ContentEvent::ParagraphEnd,
        ];
        let (pages, _) = build(config(), &BTreeSet::new(), content);
        let block = &pages[0].lines[0].block;
        assert_eq!(block.alignment, Alignment::Right);
        assert_eq!(block.iter().collect::<Vec<_>>(), [("ab", 80, FontStyle::Regular)]);
    }
}
