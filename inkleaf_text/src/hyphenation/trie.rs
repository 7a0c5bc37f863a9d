//! Read side of the serialized pattern trie.
//!
//! ```text
//! root: u32 BE | level lists ... | nodes ...
//! ```
//!
//! A node is a header byte (bit 7 has levels, bits 6-5 stride, bits 4-0 child count with 31
//! meaning the count follows in the next byte), an optional two byte level reference, the sorted
//! transition bytes, then one signed stride sized delta per transition. Deltas are relative to
//! the node's own address. The level reference packs a 12 bit offset and a 4 bit length.

/// Bytes per child delta for a node's header stride bits.
fn stride_of(header: u8) -> usize {
    match (header >> 5) & 0x03 {
        0 => 1,
        stride => stride as usize,
    }
}

pub(crate) fn decode_delta(bytes: &[u8]) -> Option<i32> {
    match *bytes {
        [b] => Some(b as i8 as i32),
        [hi, lo] => Some(i16::from_be_bytes([hi, lo]) as i32),
        [a, b, c] => Some(i32::from_be_bytes([0, a, b, c]) - (1 << 23)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Trie<'a> {
    data: &'a [u8],
    root: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
    addr: usize,
    stride: usize,
    transitions: &'a [u8],
    targets: &'a [u8],
    levels: &'a [u8],
}

impl<'a> Node<'a> {
    /// Packed `distance * 10 + level` entries. Distances accumulate from the match start.
    pub fn levels(&self) -> &'a [u8] {
        self.levels
    }
}

impl<'a> Trie<'a> {
    /// `None` if the blob is too short or its root node does not decode.
    pub fn new(data: &'a [u8]) -> Option<Self> {
        let root = u32::from_be_bytes(data.get(..4)?.try_into().ok()?) as usize;
        let trie = Trie { data, root };
        trie.node(root)?;
        Some(trie)
    }

    pub fn root(&self) -> Option<Node<'a>> {
        self.node(self.root)
    }

    pub fn node(&self, addr: usize) -> Option<Node<'a>> {
        let bytes = self.data.get(addr..)?;
        let header = *bytes.first()?;
        let mut pos = 1;
        let mut count = (header & 0x1f) as usize;
        if count == 31 {
            count = *bytes.get(pos)? as usize;
            pos += 1;
        }

        let mut levels: &[u8] = &[];
        if header & 0x80 != 0 {
            let hi = *bytes.get(pos)? as usize;
            let lo = *bytes.get(pos + 1)? as usize;
            pos += 2;
            let offset = (hi << 4) | (lo >> 4);
            levels = self.data.get(offset..offset + (lo & 0x0f))?;
        }

        let stride = stride_of(header);
        let transitions = bytes.get(pos..pos + count)?;
        pos += count;
        let targets = bytes.get(pos..pos + count * stride)?;
        Some(Node {
            addr,
            stride,
            transitions,
            targets,
            levels,
        })
    }

    /// The child reached by `byte`, if there is one and it decodes.
    pub fn transition(&self, node: &Node<'a>, byte: u8) -> Option<Node<'a>> {
        let index = node.transitions.iter().position(|b| *b == byte)?;
        let at = index * node.stride;
        let delta = decode_delta(node.targets.get(at..at + node.stride)?)?;
        let next = usize::try_from(node.addr as i64 + delta as i64).ok()?;
        self.node(next)
    }
}
