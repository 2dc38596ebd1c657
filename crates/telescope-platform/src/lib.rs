// SPDX-License-Identifier: CEPL-1.0
//! Window side of the surface: creation and drawable-size reporting.
#![deny(unsafe_op_in_unsafe_fn)]

use anyhow::{Context, Result};
use telescope_render::RenderSize;
use tracing::info;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

pub use winit;

/// Drawable area in physical pixels. A minimized window yields a zero
/// dimension, which the graphics context treats as "suspended".
pub fn drawable_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

pub fn window_size(window: &Window) -> RenderSize {
    drawable_size(window.inner_size())
}

pub fn create_window(event_loop: &ActiveEventLoop, title: &str, size: RenderSize) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(size.width.max(1), size.height.max(1)));
    let window = event_loop.create_window(attrs).context("create_window")?;
    let actual = window_size(&window);
    info!("window '{title}' {}x{}", actual.width, actual.height);
    Ok(window)
}
