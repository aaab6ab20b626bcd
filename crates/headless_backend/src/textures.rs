use render_protocol::{BufferId, BufferInfo, PixelRect, TextureBackend, TextureError, TextureId};
use tile_codec::{ImageGeometry, TileLayout};

use crate::device::HeadlessDevice;

pub(crate) enum TextureStorage {
    Memory(Vec<u32>),
    /// Shares the pixels of an allocated buffer object.
    Imported(BufferId),
    Gpu(wgpu::Texture),
}

pub(crate) struct TextureObject {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) storage: TextureStorage,
}

impl TextureObject {
    fn check_rect(&self, rect: PixelRect) -> Result<(), TextureError> {
        if rect.fits_within(self.width, self.height) {
            return Ok(());
        }
        Err(TextureError::RectOutOfBounds {
            rect,
            width: self.width,
            height: self.height,
        })
    }
}

fn required_len(rect: PixelRect, pitch: u32) -> usize {
    if rect.is_empty() {
        return 0;
    }
    (rect.height as usize - 1) * pitch as usize + rect.width as usize
}

impl TextureBackend for HeadlessDevice {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, TextureError> {
        if width == 0 || height == 0 {
            return Err(TextureError::InvalidSize { width, height });
        }
        let storage = match &self.gpu {
            Some(store) => TextureStorage::Gpu(store.create_texture(width, height)),
            None => TextureStorage::Memory(vec![0; width as usize * height as usize]),
        };
        Ok(self.textures.insert(TextureObject {
            width,
            height,
            storage,
        }))
    }

    fn import_buffer(&mut self, buffer: &BufferInfo) -> Result<TextureId, TextureError> {
        if !self.buffers.contains_key(buffer.id) {
            return Err(TextureError::Import(format!(
                "buffer {:?} is not allocated",
                buffer.id
            )));
        }
        Ok(self.textures.insert(TextureObject {
            width: buffer.width,
            height: buffer.height,
            storage: TextureStorage::Imported(buffer.id),
        }))
    }

    fn upload(
        &mut self,
        texture: TextureId,
        rect: PixelRect,
        pixels: &[u32],
        pitch: u32,
    ) -> Result<(), TextureError> {
        let object = self
            .textures
            .get_mut(texture)
            .ok_or(TextureError::UnknownTexture)?;
        object.check_rect(rect)?;
        assert!(pitch >= rect.width, "upload pitch {pitch} below width {}", rect.width);
        let required = required_len(rect, pitch);
        if pixels.len() < required {
            return Err(TextureError::DataTooShort {
                required,
                actual: pixels.len(),
            });
        }
        if rect.is_empty() {
            return Ok(());
        }
        let source = ImageGeometry::new(rect.width, rect.height, pitch);

        match &mut object.storage {
            TextureStorage::Memory(texels) => {
                let geometry = ImageGeometry::packed(object.width, object.height);
                self.codec.store(
                    TileLayout::Linear,
                    texels,
                    geometry,
                    rect.x,
                    rect.y,
                    pixels,
                    source,
                );
            }
            TextureStorage::Imported(buffer) => {
                // The driver re-tiles uploads into the buffer's own layout.
                let target = self
                    .buffers
                    .get_mut(*buffer)
                    .ok_or(TextureError::UnknownTexture)?;
                self.codec.store(
                    target.layout,
                    &mut target.pixels,
                    target.geometry,
                    rect.x,
                    rect.y,
                    pixels,
                    source,
                );
            }
            TextureStorage::Gpu(gpu_texture) => {
                let store = self
                    .gpu
                    .as_ref()
                    .ok_or_else(|| TextureError::Backend("wgpu store missing".to_owned()))?;
                store.write(gpu_texture, rect, pixels, pitch);
            }
        }
        Ok(())
    }

    fn read_texture(
        &mut self,
        texture: TextureId,
        rect: PixelRect,
        out: &mut [u32],
    ) -> Result<(), TextureError> {
        let object = self
            .textures
            .get(texture)
            .ok_or(TextureError::UnknownTexture)?;
        object.check_rect(rect)?;
        let required = rect.width as usize * rect.height as usize;
        if out.len() < required {
            return Err(TextureError::DataTooShort {
                required,
                actual: out.len(),
            });
        }
        if rect.is_empty() {
            return Ok(());
        }
        let region = ImageGeometry::packed(rect.width, rect.height);

        match &object.storage {
            TextureStorage::Memory(texels) => self.codec.load(
                TileLayout::Linear,
                texels,
                ImageGeometry::packed(object.width, object.height),
                rect.x,
                rect.y,
                out,
                region,
            ),
            TextureStorage::Imported(buffer) => {
                let source = self
                    .buffers
                    .get(*buffer)
                    .ok_or(TextureError::UnknownTexture)?;
                self.codec.load(
                    source.layout,
                    &source.pixels,
                    source.geometry,
                    rect.x,
                    rect.y,
                    out,
                    region,
                );
            }
            TextureStorage::Gpu(gpu_texture) => {
                let store = self
                    .gpu
                    .as_ref()
                    .ok_or_else(|| TextureError::Backend("wgpu store missing".to_owned()))?;
                store.read(gpu_texture, rect, out)?;
            }
        }
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(texture).is_none() {
            log::warn!("destroying unknown texture {texture:?}");
        }
    }
}
