//! Packed cell payloads carried by `cell`/`rect`/`row`/`row_segment`
//! updates.
//!
//! ```rust
//! # use tideline_proto::cell::{pack_cell, unpack_cell, StyleId};
//! let packed = pack_cell('x', StyleId(3));
//! let (ch, style) = unpack_cell(packed);
//! assert_eq!(ch, 'x');
//! assert_eq!(style, StyleId(3));
//! ```

/// Packed layout: high 32 bits = char codepoint, low 32 bits = [`StyleId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackedCell(pub u64);

impl PackedCell {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        PackedCell(raw)
    }

    #[inline]
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for PackedCell {
    #[inline]
    fn from(value: u64) -> Self {
        PackedCell(value)
    }
}

impl From<PackedCell> for u64 {
    #[inline]
    fn from(value: PackedCell) -> Self {
        value.0
    }
}

/// Stable identifier into the per-subscription style table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StyleId(pub u32);

impl StyleId {
    pub const DEFAULT: StyleId = StyleId(0);
}

#[inline]
pub fn pack_cell(ch: char, style_id: StyleId) -> PackedCell {
    let code = ch as u32 as u64;
    PackedCell::from_raw((code << 32) | (style_id.0 as u64))
}

/// Unpacks a cell payload. Codepoints outside the valid range render as
/// U+FFFD rather than failing the whole update.
#[inline]
pub fn unpack_cell(packed: PackedCell) -> (char, StyleId) {
    let code = (packed.0 >> 32) as u32;
    let style_id = (packed.0 & 0xFFFF_FFFF) as u32;
    (
        core::char::from_u32(code).unwrap_or('\u{FFFD}'),
        StyleId(style_id),
    )
}

// Packed color layout: tag in the high byte (0 = terminal default,
// 1 = indexed, 2 = rgb), payload in the low 24 bits.

#[inline]
pub fn pack_color_default() -> u32 {
    0 << 24
}

#[inline]
pub fn pack_color_indexed(idx: u8) -> u32 {
    (1u32 << 24) | (idx as u32)
}

#[inline]
pub fn pack_color_rgb(r: u8, g: u8, b: u8) -> u32 {
    (2u32 << 24) | ((r as u32) << 16) | ((g as u32) << 8) | (b as u32)
}
