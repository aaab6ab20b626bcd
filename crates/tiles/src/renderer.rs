use std::fmt;
use std::str::FromStr;

use render_protocol::{
    BlendMode, BufferInfo, FenceHandle, FrameRenderer, GpuDevice, ParseOptionError, PixelRect,
};

use crate::content::{ContentGenerator, ContentShape, OPAQUE_WHITE};
use crate::tile::{Tile, TileContext};
use crate::TileError;

/// Portion of each tile rewritten per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateType {
    #[default]
    Full,
    Half,
    Third,
}

impl UpdateType {
    pub const ALL: [UpdateType; 3] = [UpdateType::Full, UpdateType::Half, UpdateType::Third];

    pub const fn as_str(self) -> &'static str {
        match self {
            UpdateType::Full => "full",
            UpdateType::Half => "half",
            UpdateType::Third => "third",
        }
    }

    /// Update rectangle for a tile of `surface_*` pixels laid out on a
    /// `layout_*` grid cell.
    pub fn update_rect(
        self,
        surface_width: u32,
        surface_height: u32,
        layout_width: u32,
        layout_height: u32,
    ) -> PixelRect {
        let divisor = match self {
            UpdateType::Full => return PixelRect::from_size(surface_width, surface_height),
            UpdateType::Half => 2,
            UpdateType::Third => 3,
        };
        let width = surface_width / divisor;
        let height = surface_height / divisor;
        PixelRect::new(
            layout_width.saturating_sub(width) / divisor,
            layout_height.saturating_sub(height) / divisor,
            width,
            height,
        )
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for UpdateType {
    type Err = ParseOptionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| ParseOptionError {
                kind: "tile update type",
                value: value.to_owned(),
                expected: "full, half, third",
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub columns: u32,
    pub rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl TileGrid {
    /// Fills rows left to right; a screen narrower than one tile still gets a
    /// single column.
    pub fn new(tile_count: u32, tile_width: u32, tile_height: u32, screen_width: u32) -> Self {
        assert!(tile_width > 0 && tile_height > 0, "tile size must be non-zero");
        let columns = (screen_width / tile_width).min(tile_count).max(1);
        Self {
            columns,
            rows: tile_count.div_ceil(columns),
            tile_width,
            tile_height,
        }
    }

    pub fn position(&self, tile: u32) -> (u32, u32) {
        (
            (tile % self.columns) * self.tile_width,
            (tile / self.columns) * self.tile_height,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRendererConfig {
    pub tile_count: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub cell_size: u32,
    pub update_type: UpdateType,
    pub shape: ContentShape,
    pub animate: bool,
    /// Fence each tile update and wait on it before compositing the tile.
    pub fences: bool,
    pub clear: bool,
    /// Composite tiles with premultiplied source-over instead of replacing.
    pub blend: bool,
}

struct RenderedTile {
    tile: Tile,
    generator: ContentGenerator,
    fence: Option<FenceHandle>,
}

/// Owns the tile grid and paints it into window buffers.
pub struct TileRenderer {
    context: TileContext,
    config: TileRendererConfig,
    grid: TileGrid,
    tiles: Vec<RenderedTile>,
}

impl TileRenderer {
    pub fn new(context: TileContext, config: TileRendererConfig) -> Self {
        let grid = TileGrid::new(
            config.tile_count,
            config.tile_width,
            config.tile_height,
            config.screen_width,
        );
        log::info!(
            "tile grid {}x{} for {} tiles of {}x{}",
            grid.columns,
            grid.rows,
            config.tile_count,
            config.tile_width,
            config.tile_height
        );
        Self {
            context,
            config,
            grid,
            tiles: Vec::with_capacity(config.tile_count as usize),
        }
    }

    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter().map(|rendered| &rendered.tile)
    }

    pub fn allocate_texture_tiles<D>(&mut self, device: &mut D) -> Result<(), TileError>
    where
        D: GpuDevice + ?Sized,
    {
        for _ in 0..self.config.tile_count {
            let tile =
                self.context
                    .create_linear_tile(self.config.tile_width, self.config.tile_height, device)?;
            self.push_tile(tile);
        }
        Ok(())
    }

    pub fn allocate_buffer_tiles<D>(&mut self, device: &mut D) -> Result<(), TileError>
    where
        D: GpuDevice + ?Sized,
    {
        for _ in 0..self.config.tile_count {
            let tile = self.context.create_tiled_buffer_tile(
                self.config.tile_width,
                self.config.tile_height,
                device,
            )?;
            self.push_tile(tile);
        }
        Ok(())
    }

    fn push_tile(&mut self, tile: Tile) {
        let generator = ContentGenerator::new(
            self.config.cell_size,
            tile.index(),
            self.config.shape,
            self.config.animate,
        );
        self.tiles.push(RenderedTile {
            tile,
            generator,
            fence: None,
        });
    }

    /// Updates every tile, then composites the grid into `target`.
    pub fn render_tiles<D>(&mut self, device: &mut D, target: &BufferInfo) -> Result<(), TileError>
    where
        D: GpuDevice + ?Sized,
    {
        if self.config.clear {
            device.clear(target, OPAQUE_WHITE)?;
        }

        for rendered in &mut self.tiles {
            let rect = self.config.update_type.update_rect(
                rendered.tile.width(),
                rendered.tile.height(),
                self.config.tile_width,
                self.config.tile_height,
            );
            let content = rendered.generator.generate(rect.width, rect.height);
            rendered
                .tile
                .update_content(&self.context, device, rect, content)?;
            if self.config.fences {
                if let Some(stale) = rendered.fence.replace(device.create_fence()?) {
                    device.destroy_fence(stale);
                }
            }
        }

        let blend = if self.config.blend {
            BlendMode::SourceOver
        } else {
            BlendMode::Replace
        };
        for (index, rendered) in self.tiles.iter_mut().enumerate() {
            if let Some(fence) = rendered.fence.take() {
                let waited = device.wait(&fence);
                device.destroy_fence(fence);
                waited?;
            }
            let (x, y) = self.grid.position(index as u32);
            device.draw_texture(rendered.tile.texture(), x, y, target, blend)?;
        }
        Ok(())
    }

    pub fn destroy<D>(self, device: &mut D)
    where
        D: GpuDevice + ?Sized,
    {
        for rendered in self.tiles {
            if let Some(fence) = rendered.fence {
                device.destroy_fence(fence);
            }
            rendered.tile.destroy(device);
        }
    }
}

impl<D> FrameRenderer<D> for TileRenderer
where
    D: GpuDevice + ?Sized,
{
    type Error = TileError;

    fn render_frame(&mut self, device: &mut D, target: &BufferInfo) -> Result<(), TileError> {
        self.render_tiles(device, target)
    }
}
