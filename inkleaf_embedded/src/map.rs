use alloc::rc::Rc;
use core::ops::Deref;
use embedded_storage::nor_flash::NorFlash;

/// A flash device that can expose a region of itself as directly addressable bytes.
///
/// On hardware this is the MMU mapping of a flash range into the data address space. A mapping
/// reflects flash contents at the time it was created. Anything written afterwards is only
/// guaranteed to be visible through a fresh mapping.
pub trait MapNorFlash: NorFlash {
    fn map(&mut self, offset: u32, len: u32) -> Result<Mapping, Self::Error>;
}

/// Bytes of a mapped flash region.
#[derive(Clone)]
pub enum Mapping {
    /// Memory mapped flash that stays mapped for the life of the program.
    Static(&'static [u8]),
    /// A snapshot of the region held in RAM.
    Shared(Rc<[u8]>),
}

impl Mapping {
    pub fn empty() -> Self {
        Mapping::Static(&[])
    }
}

impl Deref for Mapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Mapping::Static(bytes) => bytes,
            Mapping::Shared(bytes) => bytes,
        }
    }
}

impl core::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mapping").field("len", &self.len()).finish()
    }
}
