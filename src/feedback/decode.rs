//! Decoding of resolved min-mip feedback bytes.

/// Raw value a resolve writes for a tile that was never sampled.
pub const UNUSED_TILE: u8 = 0xFF;

/// What a single feedback tile reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileUsage {
    /// The tile was not sampled.
    Unused,
    /// Finest mip level sampled in the tile; 0 is the most detailed.
    FinestMip(u8),
}

pub fn decode_tile(raw: u8) -> TileUsage {
    match raw {
        UNUSED_TILE => TileUsage::Unused,
        level => TileUsage::FinestMip(level),
    }
}

/// Fixed debug colors for the feedback overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorKey {
    Maroon,
    Orange,
    Green,
    Purple,
    Gray,
    LightCyan,
    /// Unused tile.
    Black,
    /// A mip level the visualization has no color for.
    Magenta,
    White,
}

impl ColorKey {
    /// Color for a raw resolved byte. Total over all 256 values.
    pub fn for_raw(raw: u8) -> Self {
        Self::for_usage(decode_tile(raw))
    }

    pub fn for_usage(usage: TileUsage) -> Self {
        match usage {
            TileUsage::Unused => ColorKey::Black,
            TileUsage::FinestMip(0) => ColorKey::Maroon,
            TileUsage::FinestMip(1) => ColorKey::Orange,
            TileUsage::FinestMip(2) => ColorKey::Green,
            TileUsage::FinestMip(3) => ColorKey::Purple,
            TileUsage::FinestMip(4) => ColorKey::Gray,
            TileUsage::FinestMip(5) => ColorKey::LightCyan,
            TileUsage::FinestMip(_) => ColorKey::Magenta,
        }
    }

    /// Opaque RGBA8.
    pub fn rgba(self) -> [u8; 4] {
        match self {
            ColorKey::Maroon => [0x80, 0x00, 0x00, 0xFF],
            ColorKey::Orange => [0xFF, 0xA5, 0x00, 0xFF],
            ColorKey::Green => [0x00, 0x80, 0x00, 0xFF],
            ColorKey::Purple => [0x80, 0x00, 0x80, 0xFF],
            ColorKey::Gray => [0x80, 0x80, 0x80, 0xFF],
            ColorKey::LightCyan => [0xE0, 0xFF, 0xFF, 0xFF],
            ColorKey::Black => [0x00, 0x00, 0x00, 0xFF],
            ColorKey::Magenta => [0xFF, 0x00, 0xFF, 0xFF],
            ColorKey::White => [0xFF, 0xFF, 0xFF, 0xFF],
        }
    }

    /// Opaque BGRA8, the canvas byte order.
    pub fn bgra(self) -> [u8; 4] {
        let [r, g, b, a] = self.rgba();
        [b, g, r, a]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tile() {
        assert_eq!(decode_tile(0), TileUsage::FinestMip(0));
        assert_eq!(decode_tile(5), TileUsage::FinestMip(5));
        assert_eq!(decode_tile(0xFF), TileUsage::Unused);
    }

    #[test]
    fn test_color_key_is_total() {
        let known = [
            ColorKey::Maroon,
            ColorKey::Orange,
            ColorKey::Green,
            ColorKey::Purple,
            ColorKey::Gray,
            ColorKey::LightCyan,
        ];
        for raw in 0..=u8::MAX {
            let key = ColorKey::for_raw(raw);
            match raw {
                0..=5 => assert_eq!(key, known[raw as usize]),
                0xFF => assert_eq!(key, ColorKey::Black),
                _ => assert_eq!(key, ColorKey::Magenta, "raw value {raw}"),
            }
        }
    }

    #[test]
    fn test_level_colors_are_distinct() {
        let mut colors: Vec<[u8; 4]> = (0..=5u8).map(|l| ColorKey::for_raw(l).rgba()).collect();
        colors.push(ColorKey::Black.rgba());
        colors.push(ColorKey::Magenta.rgba());
        let count = colors.len();
        colors.sort();
        colors.dedup();
        assert_eq!(colors.len(), count);
    }

    #[test]
    fn test_bgra_swizzle() {
        assert_eq!(ColorKey::Orange.bgra(), [0x00, 0xA5, 0xFF, 0xFF]);
    }
}
