use render_protocol::{
    AllocationError, BufferAllocator, BufferId, BufferInfo, BufferModifier, BufferRequest,
    CpuMapping, DmaAccess, DmaSyncPhase, FenceError, FenceFd, FenceHandle, FenceProvider,
    MapError, PlaneLayout, PlaneMapping, SyncError, TextureId,
};
use slotmap::SlotMap;
use smallvec::smallvec;
use tile_codec::{ImageGeometry, SUPER_TILE_EDGE, TILE_EDGE, TileCodec, TileLayout};

use crate::fences::FenceRegistry;
use crate::textures::TextureObject;
use crate::wgpu_store::WgpuTextureStore;

const ROW_ALIGNMENT_PIXELS: u32 = 16;

#[derive(Debug, Clone, Default)]
pub struct HeadlessDeviceConfig {
    pub codec: TileCodec,
    /// Requests for these modifiers fall back to an implicit linear layout.
    pub unsupported_modifiers: Vec<BufferModifier>,
    pub memory_limit_bytes: Option<u64>,
}

pub(crate) struct BufferObject {
    pub(crate) info: BufferInfo,
    pub(crate) layout: TileLayout,
    /// Geometry of the physical storage, padded as the layout requires.
    pub(crate) geometry: ImageGeometry,
    pub(crate) pixels: Vec<u32>,
    staging: Option<Vec<u32>>,
    mapped: bool,
    sync: Option<DmaAccess>,
}

impl BufferObject {
    fn linear_geometry(&self) -> ImageGeometry {
        ImageGeometry::new(self.info.width, self.info.height, self.geometry.pitch)
    }
}

/// In-process GPU stand-in: buffer objects live in host memory in their
/// tiled layout, and imported textures alias that memory.
pub struct HeadlessDevice {
    pub(crate) codec: TileCodec,
    unsupported_modifiers: Vec<BufferModifier>,
    memory_limit_bytes: Option<u64>,
    allocated_bytes: u64,
    pub(crate) buffers: SlotMap<BufferId, BufferObject>,
    pub(crate) textures: SlotMap<TextureId, TextureObject>,
    pub(crate) gpu: Option<WgpuTextureStore>,
    pub(crate) scratch: Vec<u32>,
    fences: FenceRegistry,
}

impl HeadlessDevice {
    pub fn new(config: HeadlessDeviceConfig, fences: FenceRegistry) -> Self {
        Self {
            codec: config.codec,
            unsupported_modifiers: config.unsupported_modifiers,
            memory_limit_bytes: config.memory_limit_bytes,
            allocated_bytes: 0,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            gpu: None,
            scratch: Vec::new(),
            fences,
        }
    }

    /// Backs textures created with `create_texture` by real GPU textures.
    pub fn with_wgpu_textures(mut self, store: WgpuTextureStore) -> Self {
        self.gpu = Some(store);
        self
    }

    pub fn fence_registry(&self) -> &FenceRegistry {
        &self.fences
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Linear, tightly packed copy of a buffer's visible pixels.
    pub fn buffer_snapshot(&self, buffer: BufferId) -> Result<Vec<u32>, MapError> {
        let object = self.buffers.get(buffer).ok_or(MapError::UnknownBuffer)?;
        let region = ImageGeometry::packed(object.info.width, object.info.height);
        let mut pixels = vec![0; object.info.width as usize * object.info.height as usize];
        self.codec.load(
            object.layout,
            &object.pixels,
            object.geometry,
            0,
            0,
            &mut pixels,
            region,
        );
        Ok(pixels)
    }
}

fn storage_geometry(layout: TileLayout, width: u32, height: u32) -> ImageGeometry {
    match layout {
        TileLayout::Linear => {
            ImageGeometry::new(width, height, width.next_multiple_of(ROW_ALIGNMENT_PIXELS))
        }
        TileLayout::Tiled => ImageGeometry::new(
            width,
            height.next_multiple_of(TILE_EDGE),
            width.next_multiple_of(ROW_ALIGNMENT_PIXELS),
        ),
        TileLayout::SuperTiled => ImageGeometry::packed(
            width.next_multiple_of(SUPER_TILE_EDGE),
            height.next_multiple_of(SUPER_TILE_EDGE),
        ),
    }
}

impl BufferAllocator for HeadlessDevice {
    fn allocate(&mut self, request: &BufferRequest) -> Result<BufferInfo, AllocationError> {
        if request.width == 0 || request.height == 0 {
            return Err(AllocationError::InvalidSize {
                width: request.width,
                height: request.height,
            });
        }
        let modifier = if self.unsupported_modifiers.contains(&request.modifier) {
            log::warn!(
                "modifier {} unsupported for {:?}, allocating without modifier",
                request.modifier,
                request.role
            );
            None
        } else {
            Some(request.modifier)
        };
        let layout = modifier.map_or(TileLayout::Linear, TileLayout::from);
        let geometry = storage_geometry(layout, request.width, request.height);
        let len = layout.addressable_len(geometry);
        let bytes = len as u64 * u64::from(request.format.bytes_per_pixel());
        if let Some(limit) = self.memory_limit_bytes {
            if self.allocated_bytes + bytes > limit {
                return Err(AllocationError::OutOfMemory {
                    requested_bytes: bytes,
                });
            }
        }
        self.allocated_bytes += bytes;

        let id = self.buffers.insert_with_key(|id| BufferObject {
            info: BufferInfo {
                id,
                role: request.role,
                format: request.format,
                width: request.width,
                height: request.height,
                modifier,
                planes: smallvec![PlaneLayout {
                    stride: geometry.pitch * 4,
                    offset: 0,
                }],
            },
            layout,
            geometry,
            pixels: vec![0; len],
            staging: None,
            mapped: false,
            sync: None,
        });
        let info = self.buffers[id].info.clone();
        log::debug!(
            "allocated {:?} buffer {}x{} format {:#010x} modifier {:#018x} ({layout:?}, pitch {})",
            info.role,
            info.width,
            info.height,
            info.format.fourcc(),
            info.drm_modifier(),
            geometry.pitch
        );
        Ok(info)
    }

    fn map(&mut self, buffer: BufferId) -> Result<CpuMapping<'_>, MapError> {
        let codec = self.codec;
        let object = self.buffers.get_mut(buffer).ok_or(MapError::UnknownBuffer)?;
        if object.mapped {
            return Err(MapError::AlreadyMapped);
        }
        object.mapped = true;
        let stride = object.geometry.pitch * 4;
        if object.layout == TileLayout::Linear {
            return Ok(CpuMapping {
                pixels: object.pixels.as_mut_slice(),
                stride,
            });
        }

        // Tiled storage is exposed through a linear staging copy.
        let linear = object.linear_geometry();
        let mut staging = vec![0; linear.pitch as usize * linear.height as usize];
        codec.load(
            object.layout,
            &object.pixels,
            object.geometry,
            0,
            0,
            &mut staging,
            linear,
        );
        let staging = object.staging.insert(staging);
        Ok(CpuMapping {
            pixels: staging.as_mut_slice(),
            stride,
        })
    }

    fn unmap(&mut self, buffer: BufferId) -> Result<(), MapError> {
        let codec = self.codec;
        let object = self.buffers.get_mut(buffer).ok_or(MapError::UnknownBuffer)?;
        if !object.mapped {
            return Err(MapError::NotMapped);
        }
        object.mapped = false;
        if let Some(staging) = object.staging.take() {
            let linear = object.linear_geometry();
            codec.store(
                object.layout,
                &mut object.pixels,
                object.geometry,
                0,
                0,
                &staging,
                linear,
            );
        }
        Ok(())
    }

    fn map_plane(&mut self, buffer: BufferId, plane: u32) -> Result<PlaneMapping, MapError> {
        let object = self.buffers.get(buffer).ok_or(MapError::UnknownBuffer)?;
        if plane >= object.info.plane_count() {
            return Err(MapError::PlaneOutOfRange {
                plane,
                plane_count: object.info.plane_count(),
            });
        }
        Ok(PlaneMapping::new(
            buffer,
            plane,
            object.info.plane(plane).stride,
            object.pixels.len(),
        ))
    }

    fn plane_pixels(&mut self, mapping: &PlaneMapping) -> Result<&mut [u32], MapError> {
        let object = self
            .buffers
            .get_mut(mapping.buffer())
            .ok_or(MapError::UnknownBuffer)?;
        if object.sync.is_none() {
            return Err(MapError::NotSynchronized);
        }
        object
            .pixels
            .get_mut(..mapping.len_pixels())
            .ok_or(MapError::UnknownBuffer)
    }

    fn dma_sync(
        &mut self,
        mapping: &PlaneMapping,
        phase: DmaSyncPhase,
        access: DmaAccess,
    ) -> Result<(), SyncError> {
        let object = self
            .buffers
            .get_mut(mapping.buffer())
            .ok_or(SyncError::UnknownMapping)?;
        if mapping.plane() >= object.info.plane_count() {
            return Err(SyncError::UnknownMapping);
        }
        match (phase, object.sync) {
            (DmaSyncPhase::Start, Some(_)) => Err(SyncError::AlreadyStarted),
            (DmaSyncPhase::Start, None) => {
                object.sync = Some(access);
                Ok(())
            }
            (DmaSyncPhase::End, None) => Err(SyncError::NotStarted),
            (DmaSyncPhase::End, Some(start)) if start != access => {
                Err(SyncError::AccessMismatch { start, end: access })
            }
            (DmaSyncPhase::End, Some(_)) => {
                object.sync = None;
                Ok(())
            }
        }
    }

    fn destroy(&mut self, buffer: BufferId) {
        match self.buffers.remove(buffer) {
            Some(object) => {
                let bytes = object.pixels.len() as u64 * u64::from(object.info.format.bytes_per_pixel());
                self.allocated_bytes = self.allocated_bytes.saturating_sub(bytes);
                if object.mapped || object.sync.is_some() {
                    log::warn!("destroying buffer {buffer:?} while mapped or synchronized");
                }
            }
            None => log::warn!("destroying unknown buffer {buffer:?}"),
        }
    }
}

impl FenceProvider for HeadlessDevice {
    /// Work on this device completes synchronously, so new fences start
    /// signaled.
    fn create_fence(&mut self) -> Result<FenceHandle, FenceError> {
        Ok(self.fences.create(true))
    }

    fn wait(&mut self, fence: &FenceHandle) -> Result<(), FenceError> {
        self.fences.wait(fence)
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        self.fences.destroy(fence);
    }

    fn dup_as_descriptor(&mut self, fence: &FenceHandle) -> Result<FenceFd, FenceError> {
        self.fences.export(fence)
    }

    fn wait_descriptor(&mut self, fence: &FenceFd) -> Result<(), FenceError> {
        self.fences.wait_descriptor(fence)
    }

    fn close_descriptor(&mut self, fence: FenceFd) {
        self.fences.close_descriptor(fence);
    }
}

#[cfg(test)]
mod tests {
    use render_protocol::{BufferRole, DRM_FORMAT_MOD_INVALID, PixelFormat};

    use super::*;

    fn tile_request(modifier: BufferModifier, width: u32, height: u32) -> BufferRequest {
        BufferRequest {
            role: BufferRole::TileBuffer,
            format: PixelFormat::Abgr8888,
            modifier,
            width,
            height,
        }
    }

    #[test]
    fn plane_pixels_span_padded_storage_inside_sync_bracket() {
        let mut device = HeadlessDevice::new(HeadlessDeviceConfig::default(), FenceRegistry::new());
        let info = device
            .allocate(&tile_request(BufferModifier::VivanteTiled, 20, 10))
            .expect("allocate tiled buffer");
        assert_eq!(info.plane(0).stride, 32 * 4);

        let mapping = device.map_plane(info.id, 0).expect("map plane");
        assert_eq!(mapping.len_pixels(), 32 * 12);
        assert_eq!(device.plane_pixels(&mapping), Err(MapError::NotSynchronized));

        device
            .dma_sync(&mapping, DmaSyncPhase::Start, DmaAccess::WRITE)
            .expect("sync start");
        assert_eq!(
            device.dma_sync(&mapping, DmaSyncPhase::Start, DmaAccess::WRITE),
            Err(SyncError::AlreadyStarted)
        );
        let pixels = device.plane_pixels(&mapping).expect("plane pixels");
        assert_eq!(pixels.len(), mapping.len_pixels());
        pixels.fill(9);
        assert_eq!(
            device.dma_sync(&mapping, DmaSyncPhase::End, DmaAccess::READ),
            Err(SyncError::AccessMismatch {
                start: DmaAccess::WRITE,
                end: DmaAccess::READ,
            })
        );
        device
            .dma_sync(&mapping, DmaSyncPhase::End, DmaAccess::WRITE)
            .expect("sync end");
        assert_eq!(
            device.dma_sync(&mapping, DmaSyncPhase::End, DmaAccess::WRITE),
            Err(SyncError::NotStarted)
        );

        let snapshot = device.buffer_snapshot(info.id).expect("snapshot");
        assert!(snapshot.iter().all(|pixel| *pixel == 9));
        device.destroy(info.id);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn unsupported_modifier_allocates_linear_without_modifier() {
        let mut device = HeadlessDevice::new(
            HeadlessDeviceConfig {
                unsupported_modifiers: vec![BufferModifier::VivanteSuperTiled],
                ..HeadlessDeviceConfig::default()
            },
            FenceRegistry::new(),
        );
        let info = device
            .allocate(&tile_request(BufferModifier::VivanteSuperTiled, 20, 10))
            .expect("allocate with fallback");
        assert_eq!(info.modifier, None);
        assert_eq!(info.drm_modifier(), DRM_FORMAT_MOD_INVALID);
        assert_eq!(info.plane(0).stride, 32 * 4);

        let supported = device
            .allocate(&tile_request(BufferModifier::VivanteTiled, 20, 10))
            .expect("allocate tiled");
        assert_eq!(supported.drm_modifier(), BufferModifier::VivanteTiled.drm_modifier());
    }

    #[test]
    fn memory_limit_rejects_oversized_allocation() {
        let mut device = HeadlessDevice::new(
            HeadlessDeviceConfig {
                memory_limit_bytes: Some(64 * 64 * 4),
                ..HeadlessDeviceConfig::default()
            },
            FenceRegistry::new(),
        );
        let first = device
            .allocate(&tile_request(BufferModifier::VivanteSuperTiled, 64, 64))
            .expect("fits the limit");
        assert_eq!(
            device.allocate(&tile_request(BufferModifier::Linear, 1, 1)),
            Err(AllocationError::OutOfMemory {
                requested_bytes: 16 * 4,
            })
        );
        device.destroy(first.id);
        device
            .allocate(&tile_request(BufferModifier::Linear, 1, 1))
            .expect("memory returned on destroy");
    }
}
