use super::trie::Trie;
use super::{Breaks, LanguageRules, MAX_WORD_BYTES, MAX_WORD_CHARS};
use heapless::Vec;

/// `.` + lowercased letters + `.` as UTF-8, with the byte offset of every codepoint.
struct AugmentedWord {
    bytes: Vec<u8, MAX_WORD_BYTES>,
    char_offsets: Vec<usize, MAX_WORD_CHARS>,
}

/// Why a word is left unhyphenated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Empty,
    NotALetter,
    TooLong,
}

impl AugmentedWord {
    fn push(&mut self, c: char) -> Result<(), Skip> {
        self.char_offsets
            .push(self.bytes.len())
            .map_err(|_| Skip::TooLong)?;
        let mut buf = [0u8; 4];
        self.bytes
            .extend_from_slice(c.encode_utf8(&mut buf).as_bytes())
            .map_err(|_| Skip::TooLong)
    }

    fn new<R: LanguageRules + ?Sized>(
        word: impl IntoIterator<Item = (char, bool)>,
        rules: &R,
    ) -> Result<Self, Skip> {
        let mut augmented = AugmentedWord {
            bytes: Vec::new(),
            char_offsets: Vec::new(),
        };
        augmented.push('.')?;
        for (c, is_letter) in word {
            if !is_letter {
                return Err(Skip::NotALetter);
            }
            augmented.push(rules.to_lower(c))?;
        }
        if augmented.char_count() == 1 {
            return Err(Skip::Empty);
        }
        augmented.push('.')?;
        Ok(augmented)
    }

    fn char_count(&self) -> usize {
        self.char_offsets.len()
    }

    /// Codepoint index starting at `byte`, `None` for a continuation byte.
    fn char_at_byte(&self, byte: usize) -> Option<usize> {
        self.char_offsets.binary_search(&byte).ok()
    }
}

/// Liang break points of a word given as `(codepoint, is_letter)` pairs. Break `i` falls between
/// codepoints `i - 1` and `i`. A word with a non-letter or one too long for the fixed buffers gets
/// no breaks.
pub fn break_indexes<R: LanguageRules + ?Sized>(
    word: impl IntoIterator<Item = (char, bool)>,
    trie: &Trie<'_>,
    rules: &R,
) -> Breaks {
    let mut breaks = Breaks::new();
    let Ok(augmented) = AugmentedWord::new(word, rules) else {
        return breaks;
    };
    let Some(root) = trie.root() else {
        return breaks;
    };
    let char_count = augmented.char_count();
    let mut scores = [0u8; MAX_WORD_CHARS];

    for &start in &augmented.char_offsets {
        let mut node = root;
        for &byte in &augmented.bytes[start..] {
            let Some(next) = trie.transition(&node, byte) else {
                break;
            };
            node = next;
            let mut offset = 0;
            for &packed in node.levels() {
                offset += (packed / 10) as usize;
                let level = packed % 10;
                let Some(boundary) = augmented.char_at_byte(start + offset) else {
                    continue;
                };
                // sentinel boundaries can never be broken at
                if boundary < 2 || boundary + 2 > char_count {
                    continue;
                }
                scores[boundary] = scores[boundary].max(level);
            }
        }
    }

    // the sentinels are not part of the word
    let letters = char_count - 2;
    for i in 1..letters {
        if i < rules.min_prefix() || letters - i < rules.min_suffix() {
            continue;
        }
        if scores[i + 1] % 2 == 1 {
            // capacity matches the word buffer so this can't overflow
            let _ = breaks.push(i);
        }
    }
    breaks
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hyphenation::{English, Russian, TrieBuilder};

    fn trie_blob(patterns: &str) -> std::vec::Vec<u8> {
        TrieBuilder::from_patterns(patterns).unwrap().build().unwrap()
    }

    fn english(word: &str, blob: &[u8]) -> std::vec::Vec<usize> {
        let trie = Trie::new(blob).unwrap();
        break_indexes(word.chars().map(|c| (c, English.is_letter(c))), &trie, &English)
            .into_iter()
            .collect()
    }

    const LIANG: &str = "hy3ph he2n hena4 hen5at 1na n2at 1tio 2io o2n";

    #[test]
    fn hyphenation_reference() {
        let blob = trie_blob(LIANG);
        assert_eq!(english("hyphenation", &blob), [2, 6]);
        assert_eq!(english("Hyphenation", &blob), [2, 6]);
    }

    #[test]
    fn short_words_have_no_breaks() {
        let blob = trie_blob("1a a1 1b b1 a1b");
        assert!(english("a", &blob).is_empty());
        assert!(english("ab", &blob).is_empty());
        assert!(english("", &blob).is_empty());
    }

    #[test]
    fn non_letters_reject_the_word() {
        let blob = trie_blob(LIANG);
        assert!(english("hyphen-ation", &blob).is_empty());
        assert!(english("hyphenation2", &blob).is_empty());
    }

    #[test]
    fn oversized_words_are_skipped() {
        let blob = trie_blob("a1b");
        let long: std::string::String = "ab".repeat(40);
        assert!(english(&long, &blob).is_empty());
        let fits: std::string::String = "ab".repeat(34);
        assert!(!english(&fits, &blob).is_empty());
    }

    #[test]
    fn multibyte_letters_map_to_codepoints() {
        let blob = trie_blob("а1б");
        let trie = Trie::new(&blob).unwrap();
        let breaks = |word: &str| -> std::vec::Vec<usize> {
            break_indexes(word.chars().map(|c| (c, Russian.is_letter(c))), &trie, &Russian)
                .into_iter()
                .collect()
        };
        assert_eq!(breaks("бабаб"), [2]);
        assert_eq!(breaks("БАБАББ"), [2, 4]);
    }

    #[test]
    fn word_edges_match_dot_patterns() {
        let blob = trie_blob(".ab1c a1b");
        assert_eq!(english("abcabc", &blob), [2]);
        // the anchored pattern would break at 3 if it matched mid word
        assert_eq!(english("cabcabc", &blob), [2]);
    }
}
