mod app;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use frame_scheduler::CancellationToken;

use crate::config::Args;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    args.validate()?;
    log::info!(
        "{} tiles of {}x{} ({}), {} update, window {}x{} ({})",
        args.tiles,
        args.tile_width,
        args.tile_height,
        if args.dmabuf_tiles {
            args.tile_buffer_modifier.as_str()
        } else {
            "texture"
        },
        args.tile_update_method,
        args.window_width,
        args.window_height,
        args.window_buffer_modifier
    );

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install SIGINT handler")?;

    let frames = app::run(&args, &cancel)?;
    log::info!("done after {frames} frames");
    Ok(())
}
