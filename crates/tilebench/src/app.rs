use anyhow::{Context, Result, bail};
use frame_scheduler::{
    BufferPool, CancellationToken, FrameError, FrameScheduler, PoolConfig, SchedulerConfig,
};
use headless_backend::{
    FenceRegistry, HeadlessDevice, HeadlessDeviceConfig, HeadlessPresenter, PresenterConfig,
    WgpuTextureStore,
};
use render_protocol::{PixelFormat, PresentationBackend};
use tile_codec::TileCodec;
use tiles::{TileConfig, TileContext, TileRenderer, TileRendererConfig};

use crate::config::Args;

/// Brings up the headless collaborators, renders until the frame limit or
/// cancellation, and tears everything down. Returns the frames rendered.
pub fn run(args: &Args, cancel: &CancellationToken) -> Result<u64> {
    let codec = TileCodec::new(args.vectorized);
    let fences = FenceRegistry::new();
    let mut device = HeadlessDevice::new(
        HeadlessDeviceConfig {
            codec,
            ..HeadlessDeviceConfig::default()
        },
        fences.clone(),
    );
    if args.wgpu_textures {
        if args.dmabuf_tiles {
            log::warn!("--wgpu-textures has no effect on buffer-backed tiles");
        }
        let store = WgpuTextureStore::new().context("create wgpu texture store")?;
        log::info!("tile textures on {}", store.adapter_name());
        device = device.with_wgpu_textures(store);
    }

    let mut presenter = HeadlessPresenter::start(
        PresenterConfig {
            refresh_rate_hz: args.refresh_rate,
            explicit_sync: args.explicit_sync,
        },
        fences,
    )
    .context("start headless compositor")?;
    if args.explicit_sync && !presenter.supports_explicit_sync() {
        bail!("compositor does not support explicit sync");
    }

    let context = TileContext::new(
        TileConfig {
            tile_modifier: args.tile_buffer_modifier,
            update_method: args.tile_update_method,
        },
        codec,
    );
    let mut renderer = TileRenderer::new(
        context,
        TileRendererConfig {
            tile_count: args.tiles,
            tile_width: args.tile_width,
            tile_height: args.tile_height,
            screen_width: args.window_width,
            screen_height: args.window_height,
            cell_size: args.cell_size,
            update_type: args.tile_update_type,
            shape: args.shape(),
            animate: !args.no_animate,
            fences: args.fences,
            clear: args.clear,
            blend: args.blend,
        },
    );
    let allocated = if args.dmabuf_tiles {
        renderer.allocate_buffer_tiles(&mut device)
    } else {
        renderer.allocate_texture_tiles(&mut device)
    };
    if let Err(error) = allocated {
        renderer.destroy(&mut device);
        return Err(error).context("allocate tiles");
    }

    let pool = match BufferPool::populate(
        PoolConfig {
            width: args.window_width,
            height: args.window_height,
            format: PixelFormat::Abgr8888,
            modifier: args.window_buffer_modifier,
            explicit_sync: args.explicit_sync,
            unbounded: args.unbounded,
        },
        &mut device,
        &mut presenter,
    ) {
        Ok(pool) => pool,
        Err(error) => {
            renderer.destroy(&mut device);
            return Err(error).context("populate window buffer pool");
        }
    };

    let mut scheduler = FrameScheduler::new(
        SchedulerConfig {
            explicit_sync: args.explicit_sync,
            unbounded: args.unbounded,
        },
        pool,
    );
    let result = scheduler.run(
        &mut device,
        &mut presenter,
        &mut renderer,
        cancel,
        args.frame_limit(),
    );
    if let Err(FrameError::FirstBufferUnavailable) = result {
        log::error!("failed to obtain a window buffer for the first frame");
        std::process::abort();
    }

    scheduler.teardown(&mut device, &mut presenter);
    renderer.destroy(&mut device);
    drop(presenter);
    log::debug!(
        "teardown left {} buffers, {} textures",
        device.live_buffers(),
        device.live_textures()
    );
    result.context("render loop")
}
