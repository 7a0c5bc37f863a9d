#![no_std]
#[cfg(feature = "std")]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

mod map;
pub use map::*;
mod partition;
pub use partition::*;
mod ram;
pub use ram::*;

/// Fixed width little endian integers. Every on-flash structure is encoded with this so its
/// size is known before it is written.
pub const FLASH_BINCODE_CONFIG: bincode::config::Configuration<
    bincode::config::LittleEndian,
    bincode::config::Fixint,
    bincode::config::NoLimit,
> = bincode::config::standard().with_fixed_int_encoding();
