use crate::glyph_store::{Bounds, FontMetrics, GlyphStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, bincode::Encode, bincode::Decode)]
pub enum FontStyle {
    #[default]
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl FontStyle {
    pub const ALL: [FontStyle; 4] = [
        FontStyle::Regular,
        FontStyle::Bold,
        FontStyle::Italic,
        FontStyle::BoldItalic,
    ];

    /// Slot of this style in the font cache directory.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_flags(bold: bool, italic: bool) -> Self {
        match (bold, italic) {
            (false, false) => FontStyle::Regular,
            (true, false) => FontStyle::Bold,
            (false, true) => FontStyle::Italic,
            (true, true) => FontStyle::BoldItalic,
        }
    }

    pub fn is_bold(self) -> bool {
        matches!(self, FontStyle::Bold | FontStyle::BoldItalic)
    }

    pub fn is_italic(self) -> bool {
        matches!(self, FontStyle::Italic | FontStyle::BoldItalic)
    }
}

/// Up to four styles of one typeface. Only the regular style is required.
#[derive(Debug, Clone, Copy)]
pub struct FontFamily<'a> {
    regular: GlyphStore<'a>,
    bold: Option<GlyphStore<'a>>,
    italic: Option<GlyphStore<'a>>,
    bold_italic: Option<GlyphStore<'a>>,
}

impl<'a> FontFamily<'a> {
    pub fn new(regular: GlyphStore<'a>) -> Self {
        Self {
            regular,
            bold: None,
            italic: None,
            bold_italic: None,
        }
    }

    pub fn with_style(mut self, style: FontStyle, store: GlyphStore<'a>) -> Self {
        match style {
            FontStyle::Regular => self.regular = store,
            FontStyle::Bold => self.bold = Some(store),
            FontStyle::Italic => self.italic = Some(store),
            FontStyle::BoldItalic => self.bold_italic = Some(store),
        }
        self
    }

    /// The closest available style. Bold italic falls back to bold, then italic, then regular.
    pub fn font(&self, style: FontStyle) -> &GlyphStore<'a> {
        let bold = style.is_bold();
        let italic = style.is_italic();
        if bold && italic {
            if let Some(store) = &self.bold_italic {
                return store;
            }
        }
        if bold {
            if let Some(store) = &self.bold {
                return store;
            }
        }
        if italic {
            if let Some(store) = &self.italic {
                return store;
            }
        }
        &self.regular
    }

    pub fn metrics(&self) -> FontMetrics {
        self.regular.metrics()
    }

    pub fn text_bounds(&self, text: &str, x: i32, y: i32, style: FontStyle) -> Bounds {
        self.font(style).text_bounds(text, x, y)
    }

    pub fn text_dimensions(&self, text: &str, style: FontStyle) -> (u32, u32) {
        self.font(style).text_dimensions(text)
    }

    pub fn text_advance(&self, text: &str, style: FontStyle) -> i32 {
        self.font(style).text_advance(text)
    }

    pub fn has_char(&self, cp: u32, style: FontStyle) -> bool {
        self.font(style).has_char(cp)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::glyph_store::test_font;

    #[test]
    fn style_fallback() {
        let regular_font = test_font::build();
        let mut bold_font = test_font::build();
        bold_font.bitmap = vec![1];
        let mut italic_font = test_font::build();
        italic_font.bitmap = vec![2];

        let regular = regular_font.store();
        let bold = bold_font.store();
        let italic = italic_font.store();

        let family = FontFamily::new(regular);
        assert!(family.font(FontStyle::BoldItalic).bitmap().is_empty());

        let family = family.with_style(FontStyle::Italic, italic);
        assert_eq!(family.font(FontStyle::BoldItalic).bitmap(), &[2]);
        assert_eq!(family.font(FontStyle::Bold).bitmap(), &[] as &[u8]);

        let family = family.with_style(FontStyle::Bold, bold);
        assert_eq!(family.font(FontStyle::BoldItalic).bitmap(), &[1]);
        assert_eq!(family.font(FontStyle::Italic).bitmap(), &[2]);
        assert_eq!(family.font(FontStyle::Regular).bitmap(), &[] as &[u8]);
    }

    #[test]
    fn style_flags() {
        for style in FontStyle::ALL {
            assert_eq!(FontStyle::from_flags(style.is_bold(), style.is_italic()), style);
        }
        assert_eq!(FontStyle::BoldItalic.index(), 3);
    }
}
