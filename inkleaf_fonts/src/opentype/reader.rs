/// Bounds checked big endian reader over an OpenType table. Every read fails closed with `None`.
#[derive(Debug, Clone, Copy)]
pub struct FontReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FontReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.read_bytes(n).map(|_| ())
    }

    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos.checked_add(n)?)?;
        self.pos += n;
        Some(bytes)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_bytes(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Option<i16> {
        self.read_u16().map(|v| v as i16)
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_tag(&mut self) -> Option<[u8; 4]> {
        self.read_bytes(4).map(|b| [b[0], b[1], b[2], b[3]])
    }

    /// Reads at `offset` from the start of the table without moving the cursor.
    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        let mut r = *self;
        r.set_pos(offset);
        r.read_u16()
    }

    pub fn i16_at(&self, offset: usize) -> Option<i16> {
        self.u16_at(offset).map(|v| v as i16)
    }

    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        let mut r = *self;
        r.set_pos(offset);
        r.read_u32()
    }

    /// A reader over the sub-table starting `offset` bytes into this one.
    pub fn sub(&self, offset: usize) -> Option<FontReader<'a>> {
        Some(FontReader::new(self.data.get(offset..)?))
    }
}
