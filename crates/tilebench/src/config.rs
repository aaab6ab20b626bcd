use clap::Parser;
use render_protocol::BufferModifier;
use tiles::{ContentShape, UpdateMethod, UpdateType};

#[derive(Debug, Clone, Parser)]
#[command(name = "tilebench")]
#[command(
    version,
    about = "Streams tiled content through a pool of window buffers to a headless compositor"
)]
pub struct Args {
    /// Frames to render, -1 renders until interrupted
    #[arg(short = 'f', long, default_value_t = -1, allow_negative_numbers = true)]
    pub frames: i64,

    /// Number of tiles in the grid
    #[arg(short = 't', long, default_value_t = 6)]
    pub tiles: u32,

    #[arg(long, default_value_t = 512)]
    pub tile_width: u32,

    #[arg(long, default_value_t = 512)]
    pub tile_height: u32,

    /// Checker cell edge in pixels, scaled by the tile index
    #[arg(long, default_value_t = 32)]
    pub cell_size: u32,

    #[arg(long, default_value_t = 1920)]
    pub window_width: u32,

    #[arg(long, default_value_t = 1080)]
    pub window_height: u32,

    /// linear, vivante-tiled or vivante-super-tiled
    #[arg(long, default_value_t = BufferModifier::Linear)]
    pub tile_buffer_modifier: BufferModifier,

    /// linear, vivante-tiled or vivante-super-tiled
    #[arg(long, default_value_t = BufferModifier::Linear)]
    pub window_buffer_modifier: BufferModifier,

    /// direct-upload, mapped-copy or synchronized-dma
    #[arg(long, default_value_t = UpdateMethod::DirectUpload)]
    pub tile_update_method: UpdateMethod,

    /// full, half or third of each tile per frame
    #[arg(long, default_value_t = UpdateType::Full)]
    pub tile_update_type: UpdateType,

    /// Back tiles with buffer objects instead of plain textures
    #[arg(short = 'd', long)]
    pub dmabuf_tiles: bool,

    /// Use the SIMD tiling path when the CPU has one
    #[arg(long)]
    pub vectorized: bool,

    /// Pass acquire and release fences instead of implicit sync
    #[arg(long)]
    pub explicit_sync: bool,

    /// Keep the tile pattern static
    #[arg(long)]
    pub no_animate: bool,

    /// Draw a disc instead of filling the whole tile
    #[arg(long)]
    pub circle: bool,

    /// Fence every tile update before compositing it
    #[arg(long)]
    pub fences: bool,

    /// Clear the window buffer before compositing
    #[arg(long)]
    pub clear: bool,

    /// Blend tiles over the window buffer instead of overwriting it
    #[arg(long)]
    pub blend: bool,

    /// Do not wait for frame callbacks and redraw the first buffer every frame
    #[arg(short = 'u', long)]
    pub unbounded: bool,

    /// Refresh rate of the headless compositor in Hz
    #[arg(long, default_value_t = 60.0)]
    pub refresh_rate: f64,

    /// Back texture tiles with wgpu textures
    #[arg(long)]
    pub wgpu_textures: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one tile is required")]
    NoTiles,
    #[error("tile size {width}x{height} must be non-zero")]
    EmptyTile { width: u32, height: u32 },
    #[error("window size {width}x{height} must be non-zero")]
    EmptyWindow { width: u32, height: u32 },
    #[error("cell size must be non-zero")]
    EmptyCell,
    #[error("tile update method {0} requires --dmabuf-tiles")]
    MethodNeedsBufferTiles(UpdateMethod),
    #[error("refresh rate {0} Hz must be positive")]
    InvalidRefreshRate(f64),
}

impl Args {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tiles == 0 {
            return Err(ConfigError::NoTiles);
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(ConfigError::EmptyTile {
                width: self.tile_width,
                height: self.tile_height,
            });
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(ConfigError::EmptyWindow {
                width: self.window_width,
                height: self.window_height,
            });
        }
        if self.cell_size == 0 {
            return Err(ConfigError::EmptyCell);
        }
        if self.tile_update_method.requires_buffer_tiles() && !self.dmabuf_tiles {
            return Err(ConfigError::MethodNeedsBufferTiles(self.tile_update_method));
        }
        if !self.refresh_rate.is_finite() || self.refresh_rate <= 0.0 {
            return Err(ConfigError::InvalidRefreshRate(self.refresh_rate));
        }
        Ok(())
    }

    /// `None` when rendering until interrupted.
    pub fn frame_limit(&self) -> Option<u64> {
        u64::try_from(self.frames).ok()
    }

    pub fn shape(&self) -> ContentShape {
        if self.circle {
            ContentShape::Circle
        } else {
            ContentShape::Rectangle
        }
    }
}
