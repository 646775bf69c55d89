//! Debug overlay for the decoded feedback grid.
//!
//! [`visualize`] turns a [`DecodeGrid`] into a list of colored cells laid
//! out on a square canvas; [`Overlay::rasterize`] paints them into an
//! [`OverlayCanvas`] the compositor can blend onto the presentation target.

use super::decode::ColorKey;
use super::DecodeGrid;

/// Axis-aligned pixel rectangle, `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

/// One tile of the grid as drawn on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayCell {
    pub tile_x: u32,
    pub tile_y: u32,
    pub rect: PixelRect,
    pub fill: ColorKey,
}

/// Vector description of the overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub canvas_size: u32,
    pub background: ColorKey,
    pub outline: ColorKey,
    pub cells: Vec<OverlayCell>,
}

/// Lay out one cell per tile over a `canvas_size` square.
///
/// Cell edges are `tile * canvas_size / grid_dim` rounded down, so the cells
/// tile the canvas without gaps even when it does not divide evenly.
pub fn visualize(grid: &DecodeGrid, canvas_size: u32) -> Overlay {
    let mut cells = Vec::with_capacity(grid.tiles.len());
    let edge = |i: u32, n: u32| (i as u64 * canvas_size as u64 / n.max(1) as u64) as u32;

    for tile_y in 0..grid.height {
        for tile_x in 0..grid.width {
            let rect = PixelRect {
                x0: edge(tile_x, grid.width),
                y0: edge(tile_y, grid.height),
                x1: edge(tile_x + 1, grid.width),
                y1: edge(tile_y + 1, grid.height),
            };
            cells.push(OverlayCell {
                tile_x,
                tile_y,
                rect,
                fill: ColorKey::for_raw(grid.raw(tile_x, tile_y)),
            });
        }
    }

    Overlay {
        canvas_size,
        background: ColorKey::White,
        outline: ColorKey::Black,
        cells,
    }
}

impl Overlay {
    /// Paint the background, then each cell filled and outlined.
    pub fn rasterize(&self) -> OverlayCanvas {
        let mut canvas = OverlayCanvas::new(self.canvas_size, self.canvas_size);
        canvas.fill_rect(
            PixelRect {
                x0: 0,
                y0: 0,
                x1: self.canvas_size,
                y1: self.canvas_size,
            },
            self.background,
        );
        for cell in &self.cells {
            canvas.fill_rect(cell.rect, cell.fill);
            canvas.stroke_rect(cell.rect, self.outline);
        }
        canvas
    }
}

/// CPU-side drawing surface, BGRA8 premultiplied, tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayCanvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl OverlayCanvas {
    /// Fully transparent canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// BGRA of one pixel, `None` outside the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.pixels[i..i + 4]);
        Some(out)
    }

    /// Fill a rectangle, clipped to the canvas.
    pub fn fill_rect(&mut self, rect: PixelRect, color: ColorKey) {
        let bgra = color.bgra();
        let x1 = rect.x1.min(self.width);
        let y1 = rect.y1.min(self.height);
        for y in rect.y0..y1 {
            for x in rect.x0..x1 {
                self.put(x, y, bgra);
            }
        }
    }

    /// One pixel wide outline just inside the rectangle.
    pub fn stroke_rect(&mut self, rect: PixelRect, color: ColorKey) {
        if rect.width() == 0 || rect.height() == 0 {
            return;
        }
        let bgra = color.bgra();
        let (right, bottom) = (rect.x1 - 1, rect.y1 - 1);
        for x in rect.x0..rect.x1 {
            self.put(x, rect.y0, bgra);
            self.put(x, bottom, bgra);
        }
        for y in rect.y0..rect.y1 {
            self.put(rect.x0, y, bgra);
            self.put(right, y, bgra);
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    fn put(&mut self, x: u32, y: u32, bgra: [u8; 4]) {
        if x < self.width && y < self.height {
            let i = self.offset(x, y);
            self.pixels[i..i + 4].copy_from_slice(&bgra);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(width: u32, height: u32, tiles: Vec<u8>) -> DecodeGrid {
        DecodeGrid {
            width,
            height,
            tiles,
        }
    }

    #[test]
    fn test_cells_cover_canvas_without_gaps() {
        let overlay = visualize(&grid(3, 3, vec![0; 9]), 400);
        assert_eq!(overlay.cells.len(), 9);

        let first = overlay.cells[0].rect;
        let last = overlay.cells[8].rect;
        assert_eq!((first.x0, first.y0), (0, 0));
        assert_eq!((last.x1, last.y1), (400, 400));
        // Adjacent cells share edges
        assert_eq!(overlay.cells[0].rect.x1, overlay.cells[1].rect.x0);
        assert_eq!(overlay.cells[0].rect.y1, overlay.cells[3].rect.y0);
    }

    #[test]
    fn test_cell_colors_follow_tile_values() {
        let overlay = visualize(&grid(2, 2, vec![0, 1, 0xFF, 9]), 400);
        let fills: Vec<ColorKey> = overlay.cells.iter().map(|c| c.fill).collect();
        assert_eq!(
            fills,
            vec![
                ColorKey::Maroon,
                ColorKey::Orange,
                ColorKey::Black,
                ColorKey::Magenta
            ]
        );
    }

    #[test]
    fn test_rasterize_fills_and_outlines() {
        let overlay = visualize(&grid(2, 1, vec![2, 3]), 40);
        let canvas = overlay.rasterize();

        // Interior of the left cell is green, of the right cell purple
        assert_eq!(canvas.pixel(10, 10), Some(ColorKey::Green.bgra()));
        assert_eq!(canvas.pixel(30, 10), Some(ColorKey::Purple.bgra()));
        // Cell edges are outlined
        assert_eq!(canvas.pixel(0, 0), Some(ColorKey::Black.bgra()));
        assert_eq!(canvas.pixel(19, 5), Some(ColorKey::Black.bgra()));
        assert_eq!(canvas.pixel(40, 0), None);
    }

    #[test]
    fn test_empty_grid_is_white() {
        let canvas = visualize(&grid(0, 0, Vec::new()), 8).rasterize();
        assert_eq!(canvas.pixel(4, 4), Some(ColorKey::White.bgra()));
    }

    #[test]
    fn test_wide_canvas_addresses_last_pixel() {
        let mut canvas = OverlayCanvas::new(70_000, 2);
        assert_eq!(canvas.pixels().len(), 70_000 * 2 * 4);
        canvas.fill_rect(
            PixelRect {
                x0: 69_999,
                y0: 1,
                x1: 70_000,
                y1: 2,
            },
            ColorKey::Orange,
        );
        assert_eq!(canvas.pixel(69_999, 1), Some(ColorKey::Orange.bgra()));
        assert_eq!(canvas.pixel(69_999, 0), Some([0; 4]));
    }
}
