use render_protocol::{PixelRect, TextureError};

const READBACK_ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Real GPU textures for tiles updated through the upload path.
pub struct WgpuTextureStore {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
}

impl WgpuTextureStore {
    pub fn new() -> Result<Self, TextureError> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|error| TextureError::Backend(format!("request adapter: {error}")))?;
            let adapter_name = adapter.get_info().name;
            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("tile textures"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .map_err(|error| TextureError::Backend(format!("request device: {error}")))?;
            log::info!("wgpu texture store on adapter {adapter_name}");
            Ok(Self {
                device,
                queue,
                adapter_name,
            })
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn create_texture(&self, width: u32, height: u32) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("tile texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    /// `pixels` holds `rect` with `pitch` pixels per row.
    pub fn write(&self, texture: &wgpu::Texture, rect: PixelRect, pixels: &[u32], pitch: u32) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(pixels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(pitch * 4),
                rows_per_image: Some(rect.height),
            },
            wgpu::Extent3d {
                width: rect.width,
                height: rect.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Copies `rect` back into `out`, tightly packed.
    pub fn read(
        &self,
        texture: &wgpu::Texture,
        rect: PixelRect,
        out: &mut [u32],
    ) -> Result<(), TextureError> {
        let bytes_per_row = (rect.width * 4).next_multiple_of(READBACK_ROW_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tile texture readback"),
            size: u64::from(bytes_per_row) * u64::from(rect.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tile texture readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(rect.height),
                },
            },
            wgpu::Extent3d {
                width: rect.width,
                height: rect.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|error| TextureError::Backend(format!("device poll: {error}")))?;
        receiver
            .recv()
            .map_err(|_| TextureError::Backend("readback callback dropped".to_owned()))?
            .map_err(|error| TextureError::Backend(format!("map readback: {error}")))?;

        {
            let mapped = slice.get_mapped_range();
            let row_bytes = rect.width as usize * 4;
            for (row, out_row) in out
                .chunks_exact_mut(rect.width as usize)
                .take(rect.height as usize)
                .enumerate()
            {
                let start = row * bytes_per_row as usize;
                let row_data = &mapped[start..start + row_bytes];
                for (pixel, bytes) in out_row.iter_mut().zip(row_data.chunks_exact(4)) {
                    *pixel = bytemuck::pod_read_unaligned(bytes);
                }
            }
        }
        buffer.unmap();
        Ok(())
    }
}
