use render_protocol::{
    BlendMode, BufferInfo, CompositeError, MapError, PixelRect, TextureBackend, TextureError,
    TextureId, TileCompositor,
};
use tile_codec::ImageGeometry;

use crate::device::HeadlessDevice;

/// Blends one premultiplied RGBA texel over `dst`, alpha in the high byte.
fn source_over(src: u32, dst: u32) -> u32 {
    let src = src.to_le_bytes();
    let dst = dst.to_le_bytes();
    let inverse_alpha = 255 - u32::from(src[3]);
    let channel = |index: usize| {
        let scaled = (u32::from(dst[index]) * inverse_alpha + 127) / 255;
        (u32::from(src[index]) + scaled).min(255) as u8
    };
    u32::from_le_bytes([channel(0), channel(1), channel(2), channel(3)])
}

impl TileCompositor for HeadlessDevice {
    fn clear(&mut self, target: &BufferInfo, color: u32) -> Result<(), CompositeError> {
        let object = self
            .buffers
            .get_mut(target.id)
            .ok_or(MapError::UnknownBuffer)?;
        object.pixels.fill(color);
        Ok(())
    }

    fn draw_texture(
        &mut self,
        texture: TextureId,
        dest_x: u32,
        dest_y: u32,
        target: &BufferInfo,
        blend: BlendMode,
    ) -> Result<(), CompositeError> {
        let (texture_width, texture_height) = self
            .textures
            .get(texture)
            .map(|object| (object.width, object.height))
            .ok_or(TextureError::UnknownTexture)?;
        if dest_x >= target.width || dest_y >= target.height {
            log::trace!("texture {texture:?} at ({dest_x}, {dest_y}) lies outside the target");
            return Ok(());
        }
        let width = texture_width.min(target.width - dest_x);
        let height = texture_height.min(target.height - dest_y);

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(width as usize * height as usize, 0);
        let read = self.read_texture(texture, PixelRect::from_size(width, height), &mut scratch);
        let drawn = read.map_err(CompositeError::from).and_then(|()| {
            let object = self
                .buffers
                .get_mut(target.id)
                .ok_or(MapError::UnknownBuffer)?;
            let region = ImageGeometry::packed(width, height);
            if blend == BlendMode::SourceOver {
                let mut below = vec![0; scratch.len()];
                self.codec.load(
                    object.layout,
                    &object.pixels,
                    object.geometry,
                    dest_x,
                    dest_y,
                    &mut below,
                    region,
                );
                for (texel, dst) in scratch.iter_mut().zip(below) {
                    *texel = source_over(*texel, dst);
                }
            }
            self.codec.store(
                object.layout,
                &mut object.pixels,
                object.geometry,
                dest_x,
                dest_y,
                &scratch,
                region,
            );
            Ok(())
        });
        self.scratch = scratch;
        drawn
    }
}
