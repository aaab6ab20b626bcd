use std::fmt;
use std::str::FromStr;

use render_protocol::{
    BufferAllocator, BufferInfo, BufferModifier, BufferRequest, BufferRole, DmaAccess,
    DmaSyncPhase, ParseOptionError, PixelFormat, PixelRect, PlaneMapping, TextureBackend,
    TextureId,
};
use tile_codec::{ImageGeometry, SUPER_TILE_EDGE, TileCodec, TileLayout};

use crate::TileError;

/// How new pixels reach a tile surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateMethod {
    /// Hand the rectangle to the texture upload path.
    #[default]
    DirectUpload,
    /// Map the whole buffer object for one linear write, then unmap.
    MappedCopy,
    /// Keep plane 0 mapped and bracket each write with DMA sync calls.
    SynchronizedDma,
}

impl UpdateMethod {
    pub const ALL: [UpdateMethod; 3] = [
        UpdateMethod::DirectUpload,
        UpdateMethod::MappedCopy,
        UpdateMethod::SynchronizedDma,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            UpdateMethod::DirectUpload => "direct-upload",
            UpdateMethod::MappedCopy => "mapped-copy",
            UpdateMethod::SynchronizedDma => "synchronized-dma",
        }
    }

    pub const fn requires_buffer_tiles(self) -> bool {
        !matches!(self, UpdateMethod::DirectUpload)
    }
}

impl fmt::Display for UpdateMethod {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for UpdateMethod {
    type Err = ParseOptionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| ParseOptionError {
                kind: "tile update method",
                value: value.to_owned(),
                expected: "direct-upload, mapped-copy, synchronized-dma",
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    pub tile_modifier: BufferModifier,
    pub update_method: UpdateMethod,
}

/// Shared state for tile construction: configuration, the codec, and the
/// counter handing out tile indices.
#[derive(Debug)]
pub struct TileContext {
    config: TileConfig,
    codec: TileCodec,
    last_tile_index: u32,
}

impl TileContext {
    pub fn new(config: TileConfig, codec: TileCodec) -> Self {
        Self {
            config,
            codec,
            last_tile_index: 0,
        }
    }

    pub fn config(&self) -> TileConfig {
        self.config
    }

    pub fn codec(&self) -> TileCodec {
        self.codec
    }

    fn next_tile_index(&mut self) -> u32 {
        self.last_tile_index = self
            .last_tile_index
            .checked_add(1)
            .unwrap_or_else(|| panic!("tile index counter overflow"));
        self.last_tile_index
    }

    pub fn create_linear_tile<T>(
        &mut self,
        width: u32,
        height: u32,
        textures: &mut T,
    ) -> Result<Tile, TileError>
    where
        T: TextureBackend + ?Sized,
    {
        let index = self.next_tile_index();
        let texture = textures.create_texture(width, height)?;
        log::debug!("tile {index}: {width}x{height} texture");
        Ok(Tile {
            index,
            width,
            height,
            texture,
            backing: TileBacking::Texture,
        })
    }

    pub fn create_tiled_buffer_tile<D>(
        &mut self,
        width: u32,
        height: u32,
        device: &mut D,
    ) -> Result<Tile, TileError>
    where
        D: BufferAllocator + TextureBackend + ?Sized,
    {
        let index = self.next_tile_index();
        let (width, height) = match self.config.tile_modifier {
            BufferModifier::VivanteSuperTiled => (
                width.next_multiple_of(SUPER_TILE_EDGE),
                height.next_multiple_of(SUPER_TILE_EDGE),
            ),
            BufferModifier::Linear | BufferModifier::VivanteTiled => (width, height),
        };
        let buffer = device.allocate(&BufferRequest {
            role: BufferRole::TileBuffer,
            format: PixelFormat::Abgr8888,
            modifier: self.config.tile_modifier,
            width,
            height,
        })?;
        let texture = match device.import_buffer(&buffer) {
            Ok(texture) => texture,
            Err(error) => {
                device.destroy(buffer.id);
                return Err(error.into());
            }
        };
        log::debug!(
            "tile {index}: {width}x{height} buffer, modifier {:?}, {} plane(s)",
            buffer.modifier,
            buffer.plane_count()
        );
        Ok(Tile {
            index,
            width,
            height,
            texture,
            backing: TileBacking::Buffer {
                buffer,
                plane_mapping: None,
            },
        })
    }
}

#[derive(Debug)]
enum TileBacking {
    Texture,
    Buffer {
        buffer: BufferInfo,
        plane_mapping: Option<PlaneMapping>,
    },
}

/// One drawable surface of the tile grid.
#[derive(Debug)]
pub struct Tile {
    index: u32,
    width: u32,
    height: u32,
    texture: TextureId,
    backing: TileBacking,
}

impl Tile {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Texture sampled when compositing; aliases the buffer for buffer tiles.
    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn is_buffer_backed(&self) -> bool {
        matches!(self.backing, TileBacking::Buffer { .. })
    }

    pub fn buffer(&self) -> Option<&BufferInfo> {
        match &self.backing {
            TileBacking::Texture => None,
            TileBacking::Buffer { buffer, .. } => Some(buffer),
        }
    }

    /// Writes the tightly packed `source` image into `rect` of this tile.
    pub fn update_content<D>(
        &mut self,
        context: &TileContext,
        device: &mut D,
        rect: PixelRect,
        source: &[u32],
    ) -> Result<(), TileError>
    where
        D: BufferAllocator + TextureBackend + ?Sized,
    {
        assert!(
            rect.fits_within(self.width, self.height),
            "update rect {rect:?} exceeds tile {} ({}x{})",
            self.index,
            self.width,
            self.height
        );
        if rect.is_empty() {
            return Ok(());
        }
        let method = context.config.update_method;
        if method == UpdateMethod::DirectUpload {
            device.upload(self.texture, rect, source, rect.width)?;
            return Ok(());
        }

        let TileBacking::Buffer {
            buffer,
            plane_mapping,
        } = &mut self.backing
        else {
            panic!(
                "update method {method} requires a buffer-backed tile, tile {} is a texture",
                self.index
            );
        };
        let source_geometry = ImageGeometry::packed(rect.width, rect.height);
        let codec = context.codec;

        match method {
            UpdateMethod::DirectUpload => unreachable!("handled above"),
            UpdateMethod::MappedCopy => {
                let mapping = device.map(buffer.id)?;
                let geometry = ImageGeometry::new(self.width, self.height, mapping.pitch());
                codec.store(
                    TileLayout::Linear,
                    mapping.pixels,
                    geometry,
                    rect.x,
                    rect.y,
                    source,
                    source_geometry,
                );
                device.unmap(buffer.id)?;
            }
            UpdateMethod::SynchronizedDma => {
                let mapping = match plane_mapping.take() {
                    Some(mapping) => mapping,
                    None => device.map_plane(buffer.id, 0)?,
                };
                let mapping = &*plane_mapping.insert(mapping);
                assert!(
                    mapping.pitch() >= self.width,
                    "plane pitch {} is narrower than tile {} width {}",
                    mapping.pitch(),
                    self.index,
                    self.width
                );
                let layout = TileLayout::from(buffer.effective_modifier());
                let geometry = ImageGeometry::new(self.width, self.height, mapping.pitch());

                device.dma_sync(mapping, DmaSyncPhase::Start, DmaAccess::WRITE)?;
                let written = device.plane_pixels(mapping).map(|pixels| {
                    codec.store(
                        layout,
                        pixels,
                        geometry,
                        rect.x,
                        rect.y,
                        source,
                        source_geometry,
                    );
                });
                let ended = device.dma_sync(mapping, DmaSyncPhase::End, DmaAccess::WRITE);
                written?;
                ended?;
            }
        }
        Ok(())
    }

    /// Releases the surface. Buffer tiles drop their texture alias first.
    pub fn destroy<D>(self, device: &mut D)
    where
        D: BufferAllocator + TextureBackend + ?Sized,
    {
        device.destroy_texture(self.texture);
        if let TileBacking::Buffer { buffer, .. } = self.backing {
            device.destroy(buffer.id);
        }
    }
}
