//! Liang hyphenation over a compact serialized pattern trie.
mod builder;
mod language;
mod liang;
mod trie;

pub use builder::{PatternError, TrieBuilder};
pub use language::{English, Russian};
pub use liang::break_indexes;
pub use trie::{Node, Trie};

/// Longest augmented word in UTF-8 bytes, sentinels included.
pub const MAX_WORD_BYTES: usize = 160;
/// Longest augmented word in codepoints, sentinels included.
pub const MAX_WORD_CHARS: usize = 70;

/// Break indexes of one word. Never allocates.
pub type Breaks = heapless::Vec<usize, MAX_WORD_CHARS>;

/// Per language letter classification, case folding and TeX style `lefthyphenmin` and
/// `righthyphenmin`.
pub trait LanguageRules {
    fn is_letter(&self, c: char) -> bool;
    fn to_lower(&self, c: char) -> char;

    fn min_prefix(&self) -> usize {
        2
    }

    fn min_suffix(&self) -> usize {
        2
    }
}

pub trait Hyphenator {
    /// Codepoint indexes where `word` may take a hyphen.
    fn break_indexes(&self, word: &str) -> Breaks;
}

/// A pattern trie paired with the rules of the language it was compiled for.
#[derive(Debug, Clone, Copy)]
pub struct LanguageHyphenator<'a, L> {
    trie: Trie<'a>,
    rules: L,
}

impl<'a, L: LanguageRules> LanguageHyphenator<'a, L> {
    pub fn new(trie: Trie<'a>, rules: L) -> Self {
        Self { trie, rules }
    }

    pub fn rules(&self) -> &L {
        &self.rules
    }
}

impl<L: LanguageRules> Hyphenator for LanguageHyphenator<'_, L> {
    fn break_indexes(&self, word: &str) -> Breaks {
        let classified = word.chars().map(|c| (c, self.rules.is_letter(c)));
        break_indexes(classified, &self.trie, &self.rules)
    }
}
