use static_assertions::const_assert;

const fn rgba(r: u8, g: u8, b: u8, a: u8) -> u32 {
    u32::from_le_bytes([r, g, b, a])
}

/// Colours cycled through by the checker pattern, stored as RGBA bytes.
pub const PALETTE: [u32; 8] = [
    rgba(255, 0, 0, 255),
    rgba(0, 255, 0, 255),
    rgba(0, 0, 255, 255),
    rgba(255, 255, 0, 255),
    rgba(255, 165, 0, 255),
    rgba(0, 255, 255, 255),
    rgba(255, 0, 255, 255),
    rgba(128, 0, 128, 255),
];

const_assert!(PALETTE.len().is_power_of_two());

const PALETTE_MASK: u32 = PALETTE.len() as u32 - 1;

pub const OPAQUE_WHITE: u32 = rgba(255, 255, 255, 255);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentShape {
    #[default]
    Rectangle,
    /// Disc centred in the image; pixels outside stay transparent.
    Circle,
}

/// Deterministic per-tile pattern source.
#[derive(Debug)]
pub struct ContentGenerator {
    cell_shift: u32,
    shape: ContentShape,
    animate: bool,
    animation_index: u32,
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl ContentGenerator {
    pub fn new(cell_size: u32, tile_index: u32, shape: ContentShape, animate: bool) -> Self {
        let scaled_cell = cell_size
            .checked_mul(tile_index)
            .unwrap_or_else(|| panic!("cell size {cell_size} overflows for tile {tile_index}"));
        assert!(scaled_cell > 0, "cell size and tile index must be non-zero");
        Self {
            cell_shift: scaled_cell.trailing_zeros(),
            shape,
            animate,
            animation_index: 0,
            width: 0,
            height: 0,
            pixels: Vec::new(),
        }
    }

    pub fn cell_shift(&self) -> u32 {
        self.cell_shift
    }

    pub fn animation_index(&self) -> u32 {
        self.animation_index
    }

    pub fn color_at(&self, x: u32, y: u32) -> u32 {
        let index = (x >> self.cell_shift)
            .wrapping_add(y >> self.cell_shift)
            .wrapping_add(self.animation_index)
            & PALETTE_MASK;
        PALETTE[index as usize]
    }

    /// Returns a tightly packed `width`×`height` image. Without animation the
    /// previous image is reused as long as the size does not change.
    pub fn generate(&mut self, width: u32, height: u32) -> &[u32] {
        let resized = width != self.width || height != self.height || self.pixels.is_empty();
        if !resized && !self.animate {
            return &self.pixels;
        }
        if resized {
            self.width = width;
            self.height = height;
            self.pixels = vec![0; width as usize * height as usize];
        }

        match self.shape {
            ContentShape::Rectangle => self.fill_rectangle(),
            ContentShape::Circle => self.fill_circle(),
        }
        if self.animate {
            self.animation_index = self.animation_index.wrapping_add(1);
        }
        &self.pixels
    }

    fn fill_rectangle(&mut self) {
        for y in 0..self.height {
            for x in 0..self.width {
                let color = self.color_at(x, y);
                self.pixels[(y * self.width + x) as usize] = color;
            }
        }
    }

    fn fill_circle(&mut self) {
        let (width, height) = (i64::from(self.width), i64::from(self.height));
        let (cx, cy) = (width / 2, height / 2);
        let radius = width.min(height) / 2;
        for y in (cy - radius).max(0)..=(cy + radius).min(height - 1) {
            for x in (cx - radius).max(0)..=(cx + radius).min(width - 1) {
                let (dx, dy) = (x - cx, y - cy);
                if dx * dx + dy * dy <= radius * radius {
                    let color = self.color_at(x as u32, y as u32);
                    self.pixels[(y * width + x) as usize] = color;
                }
            }
        }
    }
}
