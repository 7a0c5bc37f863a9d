//! Greedy line breaking with hyphenation fallback and word spacing justification.
use std::collections::VecDeque;

use inkleaf_fonts::{FontFamily, FontStyle};
use tracing::{event, Level};

use crate::hyphenation::Hyphenator;
use crate::page::TextBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bincode::Encode, bincode::Decode)]
pub enum Alignment {
    #[default]
    Justify,
    Left,
    Center,
    Right,
}

impl From<Alignment> for u8 {
    fn from(alignment: Alignment) -> u8 {
        alignment as u8
    }
}

impl TryFrom<u8> for Alignment {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => Alignment::Justify,
            1 => Alignment::Left,
            2 => Alignment::Center,
            3 => Alignment::Right,
            other => return Err(other),
        })
    }
}

/// Pixel measurements the line breaker needs.
pub trait TextMeasure {
    fn text_width(&self, text: &str, style: FontStyle) -> u32;

    fn space_width(&self, style: FontStyle) -> u32 {
        self.text_width(" ", style)
    }

    /// Distance between baselines.
    fn line_height(&self) -> u32;
}

impl TextMeasure for FontFamily<'_> {
    fn text_width(&self, text: &str, style: FontStyle) -> u32 {
        self.text_advance(text, style).max(0) as u32
    }

    fn line_height(&self) -> u32 {
        self.metrics().advance_y as u32
    }
}

impl<M: TextMeasure + ?Sized> TextMeasure for &M {
    fn text_width(&self, text: &str, style: FontStyle) -> u32 {
        (**self).text_width(text, style)
    }

    fn space_width(&self, style: FontStyle) -> u32 {
        (**self).space_width(style)
    }

    fn line_height(&self) -> u32 {
        (**self).line_height()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConfig {
    pub viewport_width: u16,
    pub viewport_height: u16,
    pub alignment: Alignment,
    pub hyphenation: bool,
    /// Multiplier applied to the font's line height.
    pub line_compression: f32,
    /// Half a line between paragraphs.
    pub extra_paragraph_spacing: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            viewport_width: 480,
            viewport_height: 800,
            alignment: Alignment::Justify,
            hyphenation: true,
            line_compression: 1.0,
            extra_paragraph_spacing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Word {
    text: String,
    style: FontStyle,
    attach_to_previous: bool,
}

/// Words of one paragraph waiting to be broken into lines.
#[derive(Debug, Clone, Default)]
pub struct Paragraph {
    words: VecDeque<Word>,
    alignment: Alignment,
}

/// A line chosen by the breaker before positions are assigned.
struct LineBreak {
    len: usize,
    natural_width: u32,
    is_last: bool,
}

impl Paragraph {
    pub fn new(alignment: Alignment) -> Self {
        Self {
            words: VecDeque::new(),
            alignment,
        }
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn add_word(&mut self, text: impl Into<String>, style: FontStyle, attach_to_previous: bool) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.words.push_back(Word {
            text,
            style,
            attach_to_previous,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Breaks buffered words into lines and hands each one to `process_line`. Without
    /// `include_last_line` the trailing partial line stays buffered so more words can join it.
    pub fn layout_and_extract_lines(
        &mut self,
        measure: &dyn TextMeasure,
        hyphenator: Option<&dyn Hyphenator>,
        viewport_width: u16,
        include_last_line: bool,
        mut process_line: impl FnMut(TextBlock),
    ) {
        let viewport = viewport_width as u32;
        while !self.words.is_empty() {
            let line = self.next_line(measure, hyphenator, viewport);
            if line.is_last && !include_last_line {
                break;
            }
            let block = self.position_line(measure, &line, viewport);
            process_line(block);
        }
    }

    fn gap_before(&self, measure: &dyn TextMeasure, index: usize) -> u32 {
        let word = &self.words[index];
        if index == 0 || word.attach_to_previous {
            0
        } else {
            measure.space_width(word.style)
        }
    }

    fn next_line(
        &mut self,
        measure: &dyn TextMeasure,
        hyphenator: Option<&dyn Hyphenator>,
        viewport: u32,
    ) -> LineBreak {
        let mut width = 0u32;
        let mut index = 0;
        while index < self.words.len() {
            let gap = self.gap_before(measure, index);
            let word = &self.words[index];
            let word_width = measure.text_width(&word.text, word.style);
            if width + gap + word_width <= viewport {
                width += gap + word_width;
                index += 1;
                continue;
            }

            if let Some(hyphenator) = hyphenator {
                let available = viewport.saturating_sub(width + gap);
                if let Some(prefix_width) = self.split_word(measure, hyphenator, index, available) {
                    width += gap + prefix_width;
                    return LineBreak {
                        len: index + 1,
                        natural_width: width,
                        is_last: false,
                    };
                }
            }

            if index == 0 {
                event!(
                    Level::TRACE,
                    word = self.words[0].text.as_str(),
                    width = word_width,
                    "word wider than the viewport"
                );
                return LineBreak {
                    len: 1,
                    natural_width: word_width,
                    is_last: self.words.len() == 1,
                };
            }
            return LineBreak {
                len: index,
                natural_width: width,
                is_last: false,
            };
        }
        LineBreak {
            len: index,
            natural_width: width,
            is_last: true,
        }
    }

    /// Splits the word at `index` at its largest break whose prefix plus a hyphen fits in
    /// `available`. The remainder becomes the next word.
    fn split_word(
        &mut self,
        measure: &dyn TextMeasure,
        hyphenator: &dyn Hyphenator,
        index: usize,
        available: u32,
    ) -> Option<u32> {
        let word = &self.words[index];
        let breaks = hyphenator.break_indexes(&word.text);
        let (prefix, rest, prefix_width) = breaks.iter().rev().find_map(|&at| {
            let (split, _) = word.text.char_indices().nth(at)?;
            let mut prefix = String::with_capacity(split + 1);
            prefix.push_str(&word.text[..split]);
            prefix.push('-');
            let prefix_width = measure.text_width(&prefix, word.style);
            (prefix_width <= available).then(|| (prefix, word.text[split..].to_string(), prefix_width))
        })?;

        let style = word.style;
        self.words[index].text = prefix;
        self.words.insert(
            index + 1,
            Word {
                text: rest,
                style,
                attach_to_previous: false,
            },
        );
        Some(prefix_width)
    }

    fn position_line(&mut self, measure: &dyn TextMeasure, line: &LineBreak, viewport: u32) -> TextBlock {
        let gap_count = (1..line.len)
            .filter(|&i| !self.words[i].attach_to_previous)
            .count() as u32;
        let slack = viewport.saturating_sub(line.natural_width);

        let (mut x, extra, mut remainder) = match self.alignment {
            Alignment::Justify if !line.is_last && gap_count > 0 => {
                (0, slack / gap_count, slack % gap_count)
            }
            Alignment::Center => (slack / 2, 0, 0),
            Alignment::Right => (slack, 0, 0),
            _ => (0, 0, 0),
        };

        let mut block = TextBlock::new(self.alignment);
        for index in 0..line.len {
            let word = &self.words[index];
            if index > 0 && !word.attach_to_previous {
                x += measure.space_width(word.style) + extra;
                if remainder > 0 {
                    x += 1;
                    remainder -= 1;
                }
            }
            let width = measure.text_width(&word.text, word.style);
            block.push(word.text.clone(), x.min(u16::MAX as u32) as u16, word.style);
            x += width;
        }
        self.words.drain(..line.len);
        block
    }
}
