//! Codepoint classification shared by measurement and layout.

/// Drawn in place of any codepoint the font has no glyph for.
pub const REPLACEMENT_CHAR: u32 = 0xFFFD;

/// Marks that attach to the preceding base glyph instead of advancing the cursor.
pub fn is_combining_mark(cp: u32) -> bool {
    matches!(
        cp,
        0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F
    )
}

/// Packs a codepoint pair into the 32 bit key used by the kerning and ligature tables. Only
/// the basic multilingual plane fits.
pub const fn pack_pair(left: u32, right: u32) -> Option<u32> {
    if left > 0xFFFF || right > 0xFFFF {
        return None;
    }
    Some((left << 16) | right)
}

pub const fn unpack_pair(pair: u32) -> (u32, u32) {
    (pair >> 16, pair & 0xFFFF)
}
