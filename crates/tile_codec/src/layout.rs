use render_protocol::BufferModifier;

use crate::ImageGeometry;

pub const TILE_EDGE: u32 = 4;
pub const SUPER_TILE_EDGE: u32 = 64;

/// Pixel arrangement of a destination image in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileLayout {
    Linear,
    /// 4×4 tiles laid out row by row; `pitch` is the pixel width of one
    /// scanline, so a row of tiles spans `pitch * 4` pixels.
    Tiled,
    /// 64×64 super-tiles of nested 32/16/8/4 quadrants.
    SuperTiled,
}

impl TileLayout {
    pub const ALL: [TileLayout; 3] = [TileLayout::Linear, TileLayout::Tiled, TileLayout::SuperTiled];

    /// Pixels moved per iteration by the vectorized path, starting from a
    /// destination column that is a multiple of four.
    pub const fn vector_batch(self) -> u32 {
        match self {
            TileLayout::Linear => 16,
            TileLayout::Tiled | TileLayout::SuperTiled => 4,
        }
    }

    pub fn index(self, x: u32, y: u32, geometry: ImageGeometry) -> u32 {
        match self {
            TileLayout::Linear => linear_index(x, y, geometry.pitch),
            TileLayout::Tiled => tiled_index(x, y, geometry.pitch),
            TileLayout::SuperTiled => super_tiled_index(x, y, geometry.width),
        }
    }

    /// Number of pixels the layout may touch for an image of `geometry`.
    pub fn addressable_len(self, geometry: ImageGeometry) -> usize {
        let pitch = geometry.pitch as usize;
        match self {
            TileLayout::Linear => pitch * geometry.height as usize,
            TileLayout::Tiled => pitch * geometry.height.next_multiple_of(TILE_EDGE) as usize,
            TileLayout::SuperTiled => geometry.width as usize * geometry.height as usize,
        }
    }

    pub(crate) fn assert_geometry(self, geometry: ImageGeometry) {
        assert!(
            geometry.pitch >= geometry.width,
            "pitch {} is smaller than width {}",
            geometry.pitch,
            geometry.width
        );
        match self {
            TileLayout::Linear => {}
            TileLayout::Tiled => assert!(
                geometry.pitch % TILE_EDGE == 0,
                "tiled pitch {} must be a multiple of {TILE_EDGE}",
                geometry.pitch
            ),
            TileLayout::SuperTiled => assert!(
                geometry.width % SUPER_TILE_EDGE == 0 && geometry.height % SUPER_TILE_EDGE == 0,
                "super-tiled image {}x{} must be a multiple of {SUPER_TILE_EDGE} in both dimensions",
                geometry.width,
                geometry.height
            ),
        }
    }
}

impl From<BufferModifier> for TileLayout {
    fn from(modifier: BufferModifier) -> Self {
        match modifier {
            BufferModifier::Linear => TileLayout::Linear,
            BufferModifier::VivanteTiled => TileLayout::Tiled,
            BufferModifier::VivanteSuperTiled => TileLayout::SuperTiled,
        }
    }
}

#[inline]
pub fn linear_index(x: u32, y: u32, pitch: u32) -> u32 {
    y * pitch + x
}

#[inline]
pub fn tiled_index(x: u32, y: u32, pitch: u32) -> u32 {
    ((y >> 2) * pitch + (y & 3)) * 4 + (x >> 2) * 16 + (x & 3)
}

#[inline]
pub fn super_tiled_index(x: u32, y: u32, width: u32) -> u32 {
    let row = (y >> 6) * (width << 6)
        + ((y >> 5) & 1) * 2048
        + ((y >> 4) & 1) * 512
        + ((y >> 3) & 1) * 128
        + (((y >> 2) & 1) << 5)
        + (y & 3) * 4;
    let column = (x & 3)
        + ((x >> 2) & 1) * 16
        + (x >> 6) * 4096
        + ((x >> 5) & 1) * 1024
        + ((x >> 4) & 1) * 256
        + ((x >> 3) & 1) * 64;
    row + column
}
