//! Compiles TeX style patterns (`hy3ph`, `.ab1c`) into the blob read by [`Trie`].
//!
//! [`Trie`]: super::Trie
use std::collections::BTreeMap;
use std::fmt;

use super::trie::decode_delta;

const HEADER_SIZE: usize = 4;
const MAX_LEVEL_OFFSET: usize = 0x0fff;
const MAX_LEVELS: usize = 15;
const MAX_CHILDREN: usize = 255;
const EXTENDED_COUNT: u8 = 31;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    Empty,
    Duplicate(String),
    TooManyLevels(String),
    DistanceTooLarge(String),
    TooManyChildren,
    LevelTableFull,
    TooLarge,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::Empty => write!(f, "pattern has no letters"),
            PatternError::Duplicate(p) => write!(f, "pattern {p} appears twice"),
            PatternError::TooManyLevels(p) => {
                write!(f, "pattern {p} has more than {MAX_LEVELS} levels")
            }
            PatternError::DistanceTooLarge(p) => {
                write!(f, "pattern {p} has levels too far apart to pack")
            }
            PatternError::TooManyChildren => {
                write!(f, "a node has more than {MAX_CHILDREN} transitions")
            }
            PatternError::LevelTableFull => write!(f, "level lists overflow the 12 bit offset"),
            PatternError::TooLarge => write!(f, "trie is too large for 24 bit deltas"),
        }
    }
}

impl std::error::Error for PatternError {}

#[derive(Debug, Default)]
struct BuildNode {
    children: BTreeMap<u8, usize>,
    levels: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct TrieBuilder {
    nodes: Vec<BuildNode>,
}

impl Default for TrieBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![BuildNode::default()],
        }
    }

    /// Whitespace separated patterns. `%` starts a comment and TeX control words are skipped.
    pub fn from_patterns(text: &str) -> Result<Self, PatternError> {
        let mut builder = Self::new();
        for line in text.lines() {
            let line = line.split('%').next().unwrap_or("");
            for token in line.split_whitespace() {
                if token.starts_with('\\') || token == "}" {
                    continue;
                }
                builder.insert(token)?;
            }
        }
        Ok(builder)
    }

    pub fn insert(&mut self, pattern: &str) -> Result<(), PatternError> {
        let mut letters = Vec::new();
        let mut digits = Vec::new();
        for c in pattern.chars() {
            match c.to_digit(10) {
                Some(0) => {}
                Some(level) => digits.push((letters.len(), level as u8)),
                None => {
                    let mut buf = [0u8; 4];
                    letters.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        if letters.is_empty() {
            return Err(PatternError::Empty);
        }
        if digits.len() > MAX_LEVELS {
            return Err(PatternError::TooManyLevels(pattern.into()));
        }

        let mut packed = Vec::with_capacity(digits.len());
        let mut previous = 0;
        for (position, level) in digits {
            let entry = (position - previous) * 10 + level as usize;
            packed.push(
                u8::try_from(entry).map_err(|_| PatternError::DistanceTooLarge(pattern.into()))?,
            );
            previous = position;
        }

        let mut node = 0;
        for byte in letters {
            node = match self.nodes[node].children.get(&byte) {
                Some(&child) => child,
                None => {
                    self.nodes.push(BuildNode::default());
                    let child = self.nodes.len() - 1;
                    self.nodes[node].children.insert(byte, child);
                    child
                }
            };
        }
        if self.nodes[node].levels.replace(packed).is_some() {
            return Err(PatternError::Duplicate(pattern.into()));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Vec<u8>, PatternError> {
        let mut out = vec![0u8; HEADER_SIZE];

        let mut level_refs: BTreeMap<&[u8], u16> = BTreeMap::new();
        for levels in self.nodes.iter().filter_map(|n| n.levels.as_deref()) {
            if levels.is_empty() || level_refs.contains_key(levels) {
                continue;
            }
            if out.len() > MAX_LEVEL_OFFSET {
                return Err(PatternError::LevelTableFull);
            }
            let reference = ((out.len() as u16) << 4) | levels.len() as u16;
            level_refs.insert(levels, reference);
            out.extend_from_slice(levels);
        }

        let mut addrs = vec![0usize; self.nodes.len()];
        // children before parents, so every delta is already known when a node is written
        let mut stack = vec![(0usize, false)];
        while let Some((index, expanded)) = stack.pop() {
            let node = &self.nodes[index];
            if !expanded {
                stack.push((index, true));
                stack.extend(node.children.values().rev().map(|&c| (c, false)));
                continue;
            }
            addrs[index] = out.len();
            let level_ref = node
                .levels
                .as_deref()
                .and_then(|levels| level_refs.get(levels).copied());
            write_node(&mut out, node, level_ref, &addrs)?;
        }

        let root = u32::try_from(addrs[0]).map_err(|_| PatternError::TooLarge)?;
        out[..HEADER_SIZE].copy_from_slice(&root.to_be_bytes());
        Ok(out)
    }
}

fn encode_delta(delta: i64, stride: usize) -> Option<[u8; 3]> {
    match stride {
        1 => i8::try_from(delta).ok().map(|d| [d as u8, 0, 0]),
        2 => i16::try_from(delta).ok().map(|d| {
            let [hi, lo] = d.to_be_bytes();
            [hi, lo, 0]
        }),
        _ => {
            let biased = u32::try_from(delta + (1 << 23)).ok().filter(|b| *b < 1 << 24)?;
            let [_, a, b, c] = biased.to_be_bytes();
            Some([a, b, c])
        }
    }
}

fn write_node(
    out: &mut Vec<u8>,
    node: &BuildNode,
    level_ref: Option<u16>,
    addrs: &[usize],
) -> Result<(), PatternError> {
    let addr = out.len() as i64;
    let count = node.children.len();
    if count > MAX_CHILDREN {
        return Err(PatternError::TooManyChildren);
    }
    let deltas: Vec<i64> = node
        .children
        .values()
        .map(|&child| addrs[child] as i64 - addr)
        .collect();
    let stride = (1..=3)
        .find(|&stride| deltas.iter().all(|d| encode_delta(*d, stride).is_some()))
        .ok_or(PatternError::TooLarge)?;

    let mut header = (stride as u8) << 5;
    if level_ref.is_some() {
        header |= 0x80;
    }
    if count >= EXTENDED_COUNT as usize {
        out.push(header | EXTENDED_COUNT);
        out.push(count as u8);
    } else {
        out.push(header | count as u8);
    }
    if let Some(reference) = level_ref {
        out.extend_from_slice(&reference.to_be_bytes());
    }
    out.extend(node.children.keys());
    for delta in deltas {
        let encoded = encode_delta(delta, stride).ok_or(PatternError::TooLarge)?;
        debug_assert_eq!(decode_delta(&encoded[..stride]), Some(delta as i32));
        out.extend_from_slice(&encoded[..stride]);
    }
    Ok(())
}
