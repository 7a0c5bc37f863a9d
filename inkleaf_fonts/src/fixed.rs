//! 4 fractional bit fixed point used for glyph advances (12.4) and kerning adjustments (4.4).

pub const FRACTION_BITS: u32 = 4;
pub const ONE: i32 = 1 << FRACTION_BITS;

/// Converts whole pixels into fixed point.
pub const fn from_pixel(px: i32) -> i32 {
    px << FRACTION_BITS
}

/// Rounds to the nearest whole pixel, halves away from zero.
pub const fn to_pixel(fp: i32) -> i32 {
    if fp >= 0 {
        (fp + ONE / 2) >> FRACTION_BITS
    } else {
        -((-fp + ONE / 2) >> FRACTION_BITS)
    }
}

/// Floors a float already scaled to pixels into fixed point. Used when converting font design
/// units, where the result must never round up into the next pixel.
#[cfg(feature = "std")]
pub fn from_f32_floor(px: f32) -> i32 {
    (px * ONE as f32).floor() as i32
}
