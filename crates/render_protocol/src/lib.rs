use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use smallvec::SmallVec;

mod fence;

pub use fence::{FenceFd, FenceHandle, NO_FENCE_FD};

slotmap::new_key_type! {
    pub struct BufferId;
    pub struct TextureId;
}

pub const MAX_BUFFER_PLANES: usize = 4;

pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;
pub const DRM_FORMAT_MOD_INVALID: u64 = 0x00ff_ffff_ffff_ffff;
const DRM_FORMAT_MOD_VENDOR_VIVANTE: u64 = 0x06;
pub const DRM_FORMAT_MOD_VIVANTE_TILED: u64 = fourcc_mod_code(DRM_FORMAT_MOD_VENDOR_VIVANTE, 1);
pub const DRM_FORMAT_MOD_VIVANTE_SUPER_TILED: u64 =
    fourcc_mod_code(DRM_FORMAT_MOD_VENDOR_VIVANTE, 2);

const fn fourcc_mod_code(vendor: u64, value: u64) -> u64 {
    (vendor << 56) | (value & 0x00ff_ffff_ffff_ffff)
}

const fn fourcc_code(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Abgr8888,
    Xrgb8888,
}

impl PixelFormat {
    pub const fn fourcc(self) -> u32 {
        match self {
            PixelFormat::Abgr8888 => fourcc_code(b"AB24"),
            PixelFormat::Xrgb8888 => fourcc_code(b"XR24"),
        }
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        4
    }
}

/// Tiling convention of a buffer, as negotiated through DRM format modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferModifier {
    #[default]
    Linear,
    VivanteTiled,
    VivanteSuperTiled,
}

impl BufferModifier {
    pub const ALL: [BufferModifier; 3] = [
        BufferModifier::Linear,
        BufferModifier::VivanteTiled,
        BufferModifier::VivanteSuperTiled,
    ];

    pub const fn drm_modifier(self) -> u64 {
        match self {
            BufferModifier::Linear => DRM_FORMAT_MOD_LINEAR,
            BufferModifier::VivanteTiled => DRM_FORMAT_MOD_VIVANTE_TILED,
            BufferModifier::VivanteSuperTiled => DRM_FORMAT_MOD_VIVANTE_SUPER_TILED,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            BufferModifier::Linear => "linear",
            BufferModifier::VivanteTiled => "vivante-tiled",
            BufferModifier::VivanteSuperTiled => "vivante-super-tiled",
        }
    }
}

impl fmt::Display for BufferModifier {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for BufferModifier {
    type Err = ParseOptionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| ParseOptionError {
                kind: "buffer modifier",
                value: value.to_owned(),
                expected: "linear, vivante-tiled, vivante-super-tiled",
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}` (expected one of: {expected})")]
pub struct ParseOptionError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    TileBuffer,
    WindowBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequest {
    pub role: BufferRole,
    pub format: PixelFormat,
    pub modifier: BufferModifier,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneLayout {
    /// Row stride in bytes.
    pub stride: u32,
    /// Byte offset of the plane inside the buffer object.
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub id: BufferId,
    pub role: BufferRole,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// `None` when the allocator fell back to an allocation without an
    /// explicit modifier.
    pub modifier: Option<BufferModifier>,
    pub planes: SmallVec<[PlaneLayout; MAX_BUFFER_PLANES]>,
}

impl BufferInfo {
    pub fn plane_count(&self) -> u32 {
        self.planes.len() as u32
    }

    pub fn plane(&self, plane: u32) -> PlaneLayout {
        match self.planes.get(plane as usize) {
            Some(layout) => *layout,
            None => panic!(
                "plane {plane} out of range for buffer with {} planes",
                self.planes.len()
            ),
        }
    }

    pub fn drm_modifier(&self) -> u64 {
        self.modifier
            .map_or(DRM_FORMAT_MOD_INVALID, BufferModifier::drm_modifier)
    }

    /// Layout used when the CPU writes into this buffer.
    pub fn effective_modifier(&self) -> BufferModifier {
        self.modifier.unwrap_or(BufferModifier::Linear)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub const fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }
}

/// A transient CPU-visible view of a whole buffer object.
#[derive(Debug)]
pub struct CpuMapping<'a> {
    pub pixels: &'a mut [u32],
    /// Row stride in bytes, as reported by the allocator.
    pub stride: u32,
}

impl CpuMapping<'_> {
    pub fn pitch(&self) -> u32 {
        self.stride / 4
    }
}

/// A long-lived mapping of one buffer plane, created once and reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneMapping {
    buffer: BufferId,
    plane: u32,
    stride: u32,
    len_pixels: usize,
}

impl PlaneMapping {
    pub fn new(buffer: BufferId, plane: u32, stride: u32, len_pixels: usize) -> Self {
        Self {
            buffer,
            plane,
            stride,
            len_pixels,
        }
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn plane(&self) -> u32 {
        self.plane
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn pitch(&self) -> u32 {
        self.stride / 4
    }

    pub fn len_pixels(&self) -> usize {
        self.len_pixels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmaSyncPhase {
    Start,
    End,
}

bitflags! {
    /// Access declared around a CPU write or read of a shared buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DmaAccess: u64 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("buffer size {width}x{height} is invalid")]
    InvalidSize { width: u32, height: u32 },
    #[error("out of buffer memory ({requested_bytes} bytes requested)")]
    OutOfMemory { requested_bytes: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("buffer is unknown to the allocator")]
    UnknownBuffer,
    #[error("plane {plane} out of range ({plane_count} planes)")]
    PlaneOutOfRange { plane: u32, plane_count: u32 },
    #[error("buffer is already mapped")]
    AlreadyMapped,
    #[error("buffer is not mapped")]
    NotMapped,
    #[error("plane accessed outside a DMA sync bracket")]
    NotSynchronized,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("mapping does not refer to a live buffer plane")]
    UnknownMapping,
    #[error("sync start issued twice without a matching end")]
    AlreadyStarted,
    #[error("sync end issued without a matching start")]
    NotStarted,
    #[error("sync end access {end:?} does not match start access {start:?}")]
    AccessMismatch { start: DmaAccess, end: DmaAccess },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextureError {
    #[error("texture is unknown to the backend")]
    UnknownTexture,
    #[error("texture size {width}x{height} is invalid")]
    InvalidSize { width: u32, height: u32 },
    #[error("rect {rect:?} exceeds texture bounds {width}x{height}")]
    RectOutOfBounds {
        rect: PixelRect,
        width: u32,
        height: u32,
    },
    #[error("pixel data too short: {actual} < {required}")]
    DataTooShort { required: usize, actual: usize },
    #[error("texture import failed: {0}")]
    Import(String),
    #[error("texture backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FenceError {
    #[error("fence {0} is unknown")]
    UnknownFence(u64),
    #[error("fence descriptor {0} is not valid")]
    InvalidDescriptor(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresentError {
    #[error("presentation backend disconnected")]
    Disconnected,
    #[error("buffer {0:?} was never imported")]
    UnknownBuffer(PresentableBuffer),
    #[error("buffer import rejected: {0}")]
    ImportFailed(String),
    #[error("explicit sync requested but not supported by the backend")]
    ExplicitSyncUnsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompositeError {
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Texture(#[from] TextureError),
}

/// Consumer-side representation of a buffer imported into the presentation
/// backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PresentableBuffer(u64);

impl PresentableBuffer {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct Submission {
    pub buffer: PresentableBuffer,
    /// Ownership of the descriptor moves to the presentation backend.
    pub acquire_fence: Option<FenceFd>,
    pub frame_callback: bool,
}

#[derive(Debug)]
pub enum PresentEvent {
    /// The consumer relinquished `buffer`. With explicit sync a release fence
    /// may accompany the event and must be waited on before the next write.
    Released {
        buffer: PresentableBuffer,
        fence: Option<FenceFd>,
    },
    FrameDone {
        presented_frames: u64,
    },
    Closed,
}

pub trait BufferAllocator {
    fn allocate(&mut self, request: &BufferRequest) -> Result<BufferInfo, AllocationError>;

    fn map(&mut self, buffer: BufferId) -> Result<CpuMapping<'_>, MapError>;

    fn unmap(&mut self, buffer: BufferId) -> Result<(), MapError>;

    fn map_plane(&mut self, buffer: BufferId, plane: u32) -> Result<PlaneMapping, MapError>;

    fn plane_pixels(&mut self, mapping: &PlaneMapping) -> Result<&mut [u32], MapError>;

    fn dma_sync(
        &mut self,
        mapping: &PlaneMapping,
        phase: DmaSyncPhase,
        access: DmaAccess,
    ) -> Result<(), SyncError>;

    fn destroy(&mut self, buffer: BufferId);
}

pub trait TextureBackend {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, TextureError>;

    /// Wraps an allocated buffer object as a sampleable texture.
    fn import_buffer(&mut self, buffer: &BufferInfo) -> Result<TextureId, TextureError>;

    /// Uploads `rect` from `pixels`, a linear image with `pitch` pixels per row.
    fn upload(
        &mut self,
        texture: TextureId,
        rect: PixelRect,
        pixels: &[u32],
        pitch: u32,
    ) -> Result<(), TextureError>;

    /// Reads `rect` back into `out`, tightly packed.
    fn read_texture(
        &mut self,
        texture: TextureId,
        rect: PixelRect,
        out: &mut [u32],
    ) -> Result<(), TextureError>;

    fn destroy_texture(&mut self, texture: TextureId);
}

pub trait FenceProvider {
    fn create_fence(&mut self) -> Result<FenceHandle, FenceError>;

    fn wait(&mut self, fence: &FenceHandle) -> Result<(), FenceError>;

    fn destroy_fence(&mut self, fence: FenceHandle);

    fn dup_as_descriptor(&mut self, fence: &FenceHandle) -> Result<FenceFd, FenceError>;

    fn wait_descriptor(&mut self, fence: &FenceFd) -> Result<(), FenceError>;

    fn close_descriptor(&mut self, fence: FenceFd);
}

/// How texels combine with the pixels already in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Replace,
    /// Premultiplied source-over: `src + dst * (1 - src.alpha)`.
    SourceOver,
}

pub trait TileCompositor {
    fn clear(&mut self, target: &BufferInfo, color: u32) -> Result<(), CompositeError>;

    /// Draws the whole `texture` with its top-left corner at
    /// (`dest_x`, `dest_y`), clipped to the target.
    fn draw_texture(
        &mut self,
        texture: TextureId,
        dest_x: u32,
        dest_y: u32,
        target: &BufferInfo,
        blend: BlendMode,
    ) -> Result<(), CompositeError>;
}

pub trait PresentationBackend {
    fn supports_explicit_sync(&self) -> bool;

    fn import_buffer(&mut self, buffer: &BufferInfo) -> Result<PresentableBuffer, PresentError>;

    fn destroy_buffer(&mut self, buffer: PresentableBuffer);

    fn submit(&mut self, submission: Submission) -> Result<(), PresentError>;

    fn flush(&mut self) -> Result<(), PresentError>;

    /// Blocks until at least one event is available.
    fn dispatch(&mut self) -> Result<Vec<PresentEvent>, PresentError>;

    fn dispatch_pending(&mut self) -> Result<Vec<PresentEvent>, PresentError>;
}

/// Draws one frame into an acquired window buffer.
pub trait FrameRenderer<D: ?Sized> {
    type Error: std::error::Error + Send + Sync + 'static;

    fn render_frame(&mut self, device: &mut D, target: &BufferInfo) -> Result<(), Self::Error>;
}

/// Everything the tile renderer needs from the GPU side.
pub trait GpuDevice: BufferAllocator + TextureBackend + FenceProvider + TileCompositor {}

impl<T> GpuDevice for T where
    T: BufferAllocator + TextureBackend + FenceProvider + TileCompositor + ?Sized
{
}
