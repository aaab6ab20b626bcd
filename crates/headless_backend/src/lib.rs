//! In-process stand-ins for the GPU device and the display server.
//!
//! `HeadlessDevice` keeps buffer objects in host memory using their real
//! tiled layouts, and `HeadlessPresenter` runs a compositor thread that
//! consumes submissions at a fixed refresh rate and hands buffers back.

mod compositor;
mod device;
mod fences;
mod presenter;
mod textures;
mod wgpu_store;

pub use device::{HeadlessDevice, HeadlessDeviceConfig};
pub use fences::FenceRegistry;
pub use presenter::{HeadlessPresenter, PresenterConfig, PresenterStartError};
pub use wgpu_store::WgpuTextureStore;
