use alloc::{rc::Rc, vec::Vec};
use embedded_storage::nor_flash::{self, NorFlashError, NorFlashErrorKind};

use crate::{MapNorFlash, Mapping, SECTOR_SIZE};

const WORD_SIZE: u32 = 4;

/// NOR flash held in RAM. Writes can only clear bits and erases set whole sectors back to `0xff`,
/// like the real thing. Used by the simulator, the host tools and tests.
pub struct RamNorFlash {
    bytes: Vec<u8>,
    writes_until_failure: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamFlashError {
    OutOfBounds,
    NotAligned,
    /// A failure requested through [`RamNorFlash::fail_after_writes`].
    Injected,
}

impl NorFlashError for RamFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            RamFlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            RamFlashError::NotAligned => NorFlashErrorKind::NotAligned,
            RamFlashError::Injected => NorFlashErrorKind::Other,
        }
    }
}

impl RamNorFlash {
    pub fn new(n_sectors: usize) -> Self {
        Self {
            bytes: vec![0xff; n_sectors * SECTOR_SIZE],
            writes_until_failure: None,
        }
    }

    /// Loads a prebuilt image, padding it out to a whole number of erased sectors.
    pub fn from_image(image: &[u8]) -> Self {
        let mut flash = Self::new(image.len().div_ceil(SECTOR_SIZE).max(1));
        flash.bytes[..image.len()].copy_from_slice(image);
        flash
    }

    /// Lets `n` more writes succeed and fails every write after that, as if power was cut.
    pub fn fail_after_writes(&mut self, n: usize) {
        self.writes_until_failure = Some(n);
    }

    pub fn stop_failing(&mut self) {
        self.writes_until_failure = None;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, RamFlashError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(RamFlashError::OutOfBounds)?;
        if end > self.bytes.len() {
            return Err(RamFlashError::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl nor_flash::ErrorType for RamNorFlash {
    type Error = RamFlashError;
}

impl nor_flash::ReadNorFlash for RamNorFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl nor_flash::NorFlash for RamNorFlash {
    const WRITE_SIZE: usize = WORD_SIZE as usize;
    const ERASE_SIZE: usize = SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from % SECTOR_SIZE as u32 != 0 || to % SECTOR_SIZE as u32 != 0 || to < from {
            return Err(RamFlashError::NotAligned);
        }
        let range = self.range(from, (to - from) as usize)?;
        self.bytes[range].fill(0xff);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if offset % WORD_SIZE != 0 || bytes.len() % WORD_SIZE as usize != 0 {
            return Err(RamFlashError::NotAligned);
        }
        if let Some(remaining) = self.writes_until_failure.as_mut() {
            if *remaining == 0 {
                return Err(RamFlashError::Injected);
            }
            *remaining -= 1;
        }
        let range = self.range(offset, bytes.len())?;
        for (dst, src) in self.bytes[range].iter_mut().zip(bytes) {
            *dst &= *src;
        }
        Ok(())
    }
}

impl MapNorFlash for RamNorFlash {
    fn map(&mut self, offset: u32, len: u32) -> Result<Mapping, Self::Error> {
        let range = self.range(offset, len as usize)?;
        Ok(Mapping::Shared(Rc::from(&self.bytes[range])))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

    #[test]
    fn writes_only_clear_bits() {
        let mut flash = RamNorFlash::new(1);
        flash.write(0, &[0b1010_1010; 4]).unwrap();
        flash.write(0, &[0b0110_0110; 4]).unwrap();
        let mut out = [0u8; 4];
        flash.read(0, &mut out).unwrap();
        assert_eq!(out, [0b0010_0010; 4]);
        flash.erase(0, 4096).unwrap();
        flash.read(0, &mut out).unwrap();
        assert_eq!(out, [0xff; 4]);
    }

    #[test]
    fn injected_failure_stops_writes() {
        let mut flash = RamNorFlash::new(1);
        flash.fail_after_writes(1);
        assert!(flash.write(0, &[0; 4]).is_ok());
        assert_eq!(flash.write(4, &[0; 4]), Err(RamFlashError::Injected));
        assert_eq!(&flash.as_bytes()[4..8], &[0xff; 4]);
        flash.stop_failing();
        assert!(flash.write(4, &[0; 4]).is_ok());
    }

    #[test]
    fn unaligned_access_is_rejected() {
        let mut flash = RamNorFlash::new(1);
        assert_eq!(flash.write(1, &[0; 4]), Err(RamFlashError::NotAligned));
        assert_eq!(flash.erase(0, 100), Err(RamFlashError::NotAligned));
        assert_eq!(flash.map(4000, 200).err(), Some(RamFlashError::OutOfBounds));
    }
}
