use super::LanguageRules;

/// Latin letters only, with `righthyphenmin` 3 as in the TeX English patterns.
#[derive(Debug, Clone, Copy, Default)]
pub struct English;

impl LanguageRules for English {
    fn is_letter(&self, c: char) -> bool {
        c.is_ascii_alphabetic()
    }

    fn to_lower(&self, c: char) -> char {
        c.to_ascii_lowercase()
    }

    fn min_suffix(&self) -> usize {
        3
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Russian;

impl LanguageRules for Russian {
    fn is_letter(&self, c: char) -> bool {
        matches!(c, 'А'..='я' | 'Ё' | 'ё')
    }

    fn to_lower(&self, c: char) -> char {
        match c {
            'А'..='Я' => char::from_u32(c as u32 + 0x20).unwrap_or(c),
            'Ё' => 'ё',
            _ => c,
        }
    }
}
