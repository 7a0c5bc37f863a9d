use core::cell::RefCell;
use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

use crate::{MapNorFlash, Mapping, FLASH_BINCODE_CONFIG};

pub struct FlashPartition<'a, S> {
    pub tag: &'static str,
    offset_sector: u32,
    n_sectors: u32,
    flash: &'a RefCell<S>,
}

impl<S> core::fmt::Debug for FlashPartition<'_, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlashPartition")
            .field("tag", &self.tag)
            .field("offset_sector", &self.offset_sector)
            .field("n_sectors", &self.n_sectors)
            .finish()
    }
}

// Clone won't derive for some reason
impl<S> Clone for FlashPartition<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for FlashPartition<'_, S> {}
pub const SECTOR_SIZE: usize = 4096;

/// Rounds `n` up to the next sector boundary.
pub const fn sector_align(n: u32) -> u32 {
    n.div_ceil(SECTOR_SIZE as u32) * SECTOR_SIZE as u32
}

impl<'a, S: NorFlash> FlashPartition<'a, S> {
    pub fn new(
        flash: &'a RefCell<S>,
        offset_sector: u32,
        n_sectors: u32,
        tag: &'static str,
    ) -> Self {
        Self {
            tag,
            offset_sector,
            n_sectors,
            flash,
        }
    }

    fn check_bounds(&self, offset: u32, len: usize) -> Result<u32, NorFlashErrorKind> {
        let len = u32::try_from(len).map_err(|_| NorFlashErrorKind::OutOfBounds)?;
        if offset.saturating_add(len) > self.size() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        Ok(offset + self.offset_sector * SECTOR_SIZE as u32)
    }

    pub fn nor_write(&self, offset: u32, bytes: &[u8]) -> Result<(), NorFlashErrorKind> {
        let abs_offset = self.check_bounds(offset, bytes.len())?;
        NorFlash::write(&mut *self.flash.borrow_mut(), abs_offset, bytes).map_err(|e| e.kind())?;
        Ok(())
    }

    pub fn read(&self, offset: u32, bytes: &mut [u8]) -> Result<(), NorFlashErrorKind> {
        let abs_offset = self.check_bounds(offset, bytes.len())?;
        ReadNorFlash::read(&mut *self.flash.borrow_mut(), abs_offset, bytes)
            .map_err(|e| e.kind())?;
        Ok(())
    }

    /// splits n_sectors off the end of the parition into a new parition
    pub fn split_off_end(&mut self, n_sectors: u32) -> FlashPartition<'a, S> {
        assert!(n_sectors <= self.n_sectors);
        self.n_sectors -= n_sectors;
        let new_offset_sector = self.offset_sector + self.n_sectors;

        FlashPartition {
            tag: self.tag,
            offset_sector: new_offset_sector,
            n_sectors,
            flash: self.flash,
        }
    }

    /// splits n_sectors off the front of the parition into a new partition
    pub fn split_off_front(&mut self, n_sectors: u32) -> FlashPartition<'a, S> {
        assert!(n_sectors <= self.n_sectors);
        let mut end = self.split_off_end(self.n_sectors - n_sectors);
        // make the end the front
        core::mem::swap(self, &mut end);
        end
    }

    pub fn erase_sector(&self, sector: u32) -> Result<(), NorFlashErrorKind> {
        if sector >= self.n_sectors {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        let sector = self.offset_sector + sector;

        NorFlash::erase(
            &mut *self.flash.borrow_mut(),
            sector * SECTOR_SIZE as u32,
            (sector + 1) * SECTOR_SIZE as u32,
        )
        .map_err(|e| e.kind())
    }

    /// Erases every sector touched by `offset..offset + len`.
    pub fn erase_range(&self, offset: u32, len: u32) -> Result<(), NorFlashErrorKind> {
        if len == 0 {
            return Ok(());
        }
        let first = offset / SECTOR_SIZE as u32;
        let end = sector_align(offset.saturating_add(len)) / SECTOR_SIZE as u32;
        if end > self.n_sectors {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        NorFlash::erase(
            &mut *self.flash.borrow_mut(),
            (self.offset_sector + first) * SECTOR_SIZE as u32,
            (self.offset_sector + end) * SECTOR_SIZE as u32,
        )
        .map_err(|e| e.kind())
    }

    pub fn erase_all(&self) -> Result<(), NorFlashErrorKind> {
        let start = self.offset_sector * SECTOR_SIZE as u32;
        NorFlash::erase(
            &mut *self.flash.borrow_mut(),
            start,
            start + self.n_sectors * SECTOR_SIZE as u32,
        )
        .map_err(|e| e.kind())
    }

    pub fn n_sectors(&self) -> u32 {
        self.n_sectors
    }

    /// size in bytes
    pub fn size(&self) -> u32 {
        self.n_sectors * SECTOR_SIZE as u32
    }

    pub fn bincode_reader(&self) -> BincodeFlashReader<'a, S> {
        BincodeFlashReader {
            flash: *self,
            pos: 0,
        }
    }

    pub fn bincode_writer_remember_to_flush<const BUFFER_SIZE: usize>(
        &self,
    ) -> BincodeFlashWriter<'a, S, BUFFER_SIZE> {
        assert_eq!(BUFFER_SIZE % S::WRITE_SIZE, 0);
        assert_eq!(S::ERASE_SIZE % BUFFER_SIZE, 0);
        BincodeFlashWriter {
            flash: *self,
            buf: [0xff; BUFFER_SIZE],
            buf_index: 0,
            word_pos: 0,
        }
    }

    pub fn erase_and_write_this<const BUFFER_SIZE: usize>(
        &self,
        blob: impl bincode::Encode,
    ) -> Result<u32, NorFlashErrorKind> {
        self.erase_all()?;
        let mut writer = self.bincode_writer_remember_to_flush::<BUFFER_SIZE>();
        // FIXME: it's a bit annoying no error message can be passed into this error kind
        let encoded = bincode::encode_into_writer(blob, &mut writer, FLASH_BINCODE_CONFIG);
        if encoded.is_err() {
            writer.discard();
            return Err(NorFlashErrorKind::Other);
        }
        let bytes_written = writer.flush()?;
        Ok(bytes_written)
    }

    /// Writes raw bytes starting at a word aligned `offset`. The final word is padded with `0xff`
    /// so whatever follows stays erased. Returns the offset one past the last written word.
    pub fn write_padded<const BUFFER_SIZE: usize>(
        &self,
        offset: u32,
        bytes: &[u8],
    ) -> Result<u32, NorFlashErrorKind> {
        if offset % S::WRITE_SIZE as u32 != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        self.check_bounds(offset, bytes.len())?;
        let mut writer = self.bincode_writer_remember_to_flush::<BUFFER_SIZE>();
        writer.seek_word(offset / S::WRITE_SIZE as u32);
        if bincode::enc::write::Writer::write(&mut writer, bytes).is_err() {
            writer.discard();
            return Err(NorFlashErrorKind::Other);
        }
        let end_word = writer.flush()?;
        Ok(end_word * S::WRITE_SIZE as u32)
    }
}

impl<'a, S: MapNorFlash> FlashPartition<'a, S> {
    /// Maps `len` bytes starting at `offset` within this partition.
    pub fn map(&self, offset: u32, len: u32) -> Result<Mapping, NorFlashErrorKind> {
        let abs_offset = self.check_bounds(offset, len as usize)?;
        MapNorFlash::map(&mut *self.flash.borrow_mut(), abs_offset, len).map_err(|e| e.kind())
    }
}

pub struct BincodeFlashReader<'a, S> {
    flash: FlashPartition<'a, S>,
    pos: u32,
}

impl<S> BincodeFlashReader<'_, S> {
    pub fn seek_byte(&mut self, pos: u32) {
        self.pos = pos;
    }

    pub fn byte_pos(&self) -> u32 {
        self.pos
    }
}

impl<S: NorFlash> bincode::de::read::Reader for BincodeFlashReader<'_, S> {
    fn read(&mut self, bytes: &mut [u8]) -> Result<(), bincode::error::DecodeError> {
        self.flash.read(self.pos, bytes).map_err(|e| {
            bincode::error::DecodeError::OtherString(format!("Flash read error {e:?}"))
        })?;
        self.pos += bytes.len() as u32;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct BincodeFlashWriter<'a, S, const BUFFER_SIZE: usize> {
    flash: FlashPartition<'a, S>,
    buf: [u8; BUFFER_SIZE],
    buf_index: usize,
    word_pos: u32,
}

impl<S: NorFlash, const BUFFER_SIZE: usize> BincodeFlashWriter<'_, S, BUFFER_SIZE> {
    pub fn seek_word(&mut self, word: u32) {
        self.word_pos = word;
    }

    pub fn curr_word(&self) -> u32 {
        self.word_pos
    }

    /// Drops whatever is buffered without writing it.
    pub fn discard(mut self) {
        self.buf_index = 0;
    }

    pub fn flush(mut self) -> Result<u32, NorFlashErrorKind> {
        if self.buf_index != 0 {
            let aligned_index = self.buf_index
                + ((S::WRITE_SIZE - (self.buf_index % S::WRITE_SIZE)) % S::WRITE_SIZE);
            self.buf[self.buf_index..aligned_index].fill(0xff);
            // set to zero so we don't get the drop panic even if we fail
            self.buf_index = 0;
            self.flash
                .nor_write(
                    self.word_pos * S::WRITE_SIZE as u32,
                    &self.buf[..aligned_index],
                )
                .map_err(|e| e.kind())?;
            self.word_pos += aligned_index as u32 / S::WRITE_SIZE as u32;
        }

        Ok(self.word_pos)
    }
}

impl<S: NorFlash, const BUFFER_SIZE: usize> bincode::enc::write::Writer
    for BincodeFlashWriter<'_, S, BUFFER_SIZE>
{
    fn write(&mut self, bytes: &[u8]) -> Result<(), bincode::error::EncodeError> {
        let mut rest = bytes;
        while !rest.is_empty() {
            let take = (BUFFER_SIZE - self.buf_index).min(rest.len());
            self.buf[self.buf_index..self.buf_index + take].copy_from_slice(&rest[..take]);
            self.buf_index += take;
            rest = &rest[take..];

            if self.buf_index == BUFFER_SIZE {
                // reset before writing so a failed write doesn't trip the drop check
                self.buf_index = 0;
                self.flash
                    .nor_write(self.word_pos * S::WRITE_SIZE as u32, &self.buf[..])
                    .map_err(|e| bincode::error::EncodeError::OtherString(format!("{e:?}")))?;
                self.word_pos += (BUFFER_SIZE / S::WRITE_SIZE) as u32;
            }
        }

        Ok(())
    }
}

impl<S, const BUFFER_SIZE: usize> Drop for BincodeFlashWriter<'_, S, BUFFER_SIZE> {
    fn drop(&mut self) {
        assert_eq!(
            self.buf_index, 0,
            "BincodeFlashWriter must be empty when dropped"
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::RamNorFlash;
    use core::cell::RefCell;
    use proptest::{collection, prelude::*};

    #[test]
    fn split_off_front() {
        let test = RefCell::new(RamNorFlash::new(4));
        let mut partition = FlashPartition::new(&test, 1, 3, "test");

        let new_from_front = partition.split_off_front(1);
        new_from_front.nor_write(8, [42; 4].as_slice()).unwrap();
        partition.nor_write(8, [84; 4].as_slice()).unwrap();
        assert_eq!(&test.borrow().as_bytes()[4096 + 8..4096 + 8 + 4], [42; 4].as_slice());
        assert_eq!(
            &test.borrow().as_bytes()[4096 * 2 + 8..4096 * 2 + 8 + 4],
            [84; 4].as_slice()
        );
    }

    #[test]
    fn split_off_end() {
        let test = RefCell::new(RamNorFlash::new(4));
        let mut partition = FlashPartition::new(&test, 1, 3, "test");

        let new_from_back = partition.split_off_end(1);
        new_from_back.nor_write(8, [42; 4].as_slice()).unwrap();
        partition.nor_write(8, [84; 4].as_slice()).unwrap();
        assert_eq!(
            &test.borrow().as_bytes()[4096 * 3 + 8..4096 * 3 + 8 + 4],
            [42; 4].as_slice()
        );
        assert_eq!(&test.borrow().as_bytes()[4096 + 8..4096 + 8 + 4], [84; 4].as_slice());
    }

    #[test]
    fn out_of_bounds_is_rejected() {
        let test = RefCell::new(RamNorFlash::new(4));
        let partition = FlashPartition::new(&test, 1, 1, "test");
        assert_eq!(
            partition.nor_write(4096 - 4, &[0; 8]),
            Err(NorFlashErrorKind::OutOfBounds)
        );
        let mut buf = [0u8; 2];
        assert_eq!(
            partition.read(4095, &mut buf),
            Err(NorFlashErrorKind::OutOfBounds)
        );
        assert_eq!(
            partition.erase_range(4000, 200),
            Err(NorFlashErrorKind::OutOfBounds)
        );
    }

    #[test]
    fn erase_range_covers_touched_sectors_only() {
        let test = RefCell::new(RamNorFlash::new(4));
        let partition = FlashPartition::new(&test, 0, 4, "test");
        for sector in 0..4 {
            partition.nor_write(sector * 4096, &[0; 4]).unwrap();
        }
        partition.erase_range(4096 + 100, 4096).unwrap();
        let bytes = test.borrow().as_bytes().to_vec();
        assert_eq!(&bytes[0..4], &[0; 4]);
        assert_eq!(&bytes[4096..4100], &[0xff; 4]);
        assert_eq!(&bytes[8192..8196], &[0xff; 4]);
        assert_eq!(&bytes[12288..12292], &[0; 4]);
    }

    #[test]
    fn write_padded_leaves_tail_erased() {
        let test = RefCell::new(RamNorFlash::new(2));
        let partition = FlashPartition::new(&test, 0, 2, "test");
        let end = partition.write_padded::<64>(8, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(end, 16);
        assert_eq!(&test.borrow().as_bytes()[8..16], &[1, 2, 3, 4, 5, 0xff, 0xff, 0xff]);
        assert_eq!(
            partition.write_padded::<64>(2, &[1]),
            Err(NorFlashErrorKind::NotAligned)
        );
    }

    #[test]
    fn failed_write_does_not_panic_on_drop() {
        let test = RefCell::new(RamNorFlash::new(2));
        test.borrow_mut().fail_after_writes(0);
        let partition = FlashPartition::new(&test, 0, 2, "test");
        assert!(partition.write_padded::<32>(0, &[7u8; 100]).is_err());
        assert!(partition.erase_and_write_this::<32>([7u8; 100]).is_err());
    }

    #[test]
    fn mapping_sees_partition_relative_bytes() {
        let test = RefCell::new(RamNorFlash::new(3));
        let partition = FlashPartition::new(&test, 1, 2, "test");
        partition.nor_write(4, &[9, 8, 7, 6]).unwrap();
        let mapping = partition.map(4, 4).unwrap();
        assert_eq!(&mapping[..], &[9, 8, 7, 6]);
        assert!(partition.map(4096, 4097).is_err());
    }

    proptest! {
        #[test]
        fn bincode_writer(data in collection::vec(any::<u8>(), 0..1024)) {
            let test = RefCell::new(RamNorFlash::new(4));
            let partition = FlashPartition::new(&test, 1, 3, "test");
            let mut writer = partition.bincode_writer_remember_to_flush::<32>();
            bincode::encode_into_writer(data.clone(), &mut writer, FLASH_BINCODE_CONFIG).unwrap();
            let end = writer.flush().unwrap();
            prop_assert_eq!(end as usize, data.len().div_ceil(RamNorFlash::WRITE_SIZE) + /*int length is 8 bytes*/ 8 / RamNorFlash::WRITE_SIZE);
            {
                let test_ref = test.borrow();
                prop_assert_eq!(&test_ref.as_bytes()[4096 + 8..4096 + 8 + data.len()], &data[..]);
            }

            let decoded: alloc::vec::Vec<u8> =
                bincode::decode_from_reader(partition.bincode_reader(), FLASH_BINCODE_CONFIG).unwrap();
            prop_assert_eq!(decoded, data);
        }
    }
}
