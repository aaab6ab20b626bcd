mod content;
mod renderer;
mod tile;

pub use content::{ContentGenerator, ContentShape, OPAQUE_WHITE, PALETTE};
pub use renderer::{TileGrid, TileRenderer, TileRendererConfig, UpdateType};
pub use tile::{Tile, TileConfig, TileContext, UpdateMethod};

use render_protocol::{
    AllocationError, CompositeError, FenceError, MapError, SyncError, TextureError,
};

#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("tile allocation failed: {0}")]
    Allocation(#[from] AllocationError),
    #[error("tile texture: {0}")]
    Texture(#[from] TextureError),
    #[error("tile mapping: {0}")]
    Map(#[from] MapError),
    #[error("tile DMA sync: {0}")]
    Sync(#[from] SyncError),
    #[error("tile fence: {0}")]
    Fence(#[from] FenceError),
    #[error("tile composite: {0}")]
    Composite(#[from] CompositeError),
}
