#![no_std]
#[cfg(feature = "std")]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod blob;
pub mod bank;
pub mod cache;
pub mod codepoint;
mod family;
pub mod fixed;
pub mod format;
mod glyph_store;
pub mod kerning;
pub mod opentype;
#[cfg(feature = "rasterizer")]
pub mod rasterizer;

pub use bank::{FontBank, FontHandle};
pub use cache::FontCache;
pub use family::*;
pub use format::{Glyph, UnicodeInterval};
pub use glyph_store::*;
pub use kerning::Kerning;
