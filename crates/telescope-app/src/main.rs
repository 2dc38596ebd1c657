// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info, warn};

use telescope_core::{init_tracing, load_config_or_default};
use telescope_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use telescope_platform::{create_window, drawable_size, window_size};
use telescope_render::{GfxError, GraphicsConfig, GraphicsContext, RenderSize};
use telescope_vk::{AshBackend, BackendOptions};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing means defaults
    #[arg(long, default_value = "telescope.toml")]
    config: PathBuf,
    /// Enable the Vulkan validation layer
    #[arg(long)]
    validation: bool,
    /// Exit after this many presented frames (0 = until closed)
    #[arg(long, default_value_t = 0)]
    frames: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "telescope".into(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    graphics: GraphicsConfig,
    backend: BackendOptions,
}

struct App {
    cfg: AppCfg,
    frame_limit: u64,

    // dropped before the window it renders to
    gfx: Option<GraphicsContext<AshBackend>>,
    window: Option<Window>,

    exiting: bool,
    failure: Option<anyhow::Error>,
    presented: u64,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let want = RenderSize::new(self.cfg.window.width, self.cfg.window.height);
        let window = create_window(event_loop, &self.cfg.window.title, want)?;

        // SAFETY: `gfx` is torn down before `window` in `stop` and in field order.
        let backend = unsafe { AshBackend::new(&window, &window, self.cfg.backend.clone()) }
            .context("vulkan backend")?;
        let gfx = GraphicsContext::init(backend, window_size(&window), self.cfg.graphics.clone())
            .context("graphics init")?;

        self.gfx = Some(gfx);
        self.window = Some(window);
        Ok(())
    }

    fn stop(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(gfx) = self.gfx.take() {
            gfx.shutdown();
        }
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.stop(event_loop);
    }

    /// Stale surfaces are retried next frame; everything else stops the loop.
    fn check(&mut self, event_loop: &ActiveEventLoop, result: Result<(), GfxError>) {
        match result {
            Ok(()) => {}
            Err(e) if !e.is_fatal() => warn!("{e}; retrying"),
            Err(e) => self.fail(event_loop, anyhow!(e)),
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(gfx) = &mut self.gfx else {
            return;
        };
        let presented = match gfx.render_frame(|_| {}) {
            Ok(presented) => presented,
            Err(e) => {
                self.check(event_loop, Err(e));
                return;
            }
        };
        if presented {
            self.presented += 1;
            self.frames = self.frames.saturating_add(1);
        }
        if self.frame_limit > 0 && self.presented >= self.frame_limit {
            info!("presented {} frames; exiting", self.presented);
            self.stop(event_loop);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gfx.is_none() && !self.exiting {
            if let Err(e) = self.start(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.stop(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let size = drawable_size(new_size);
                info!("Resized → {}x{}", size.width, size.height);
                if let Some(gfx) = &mut self.gfx {
                    let result = gfx.resize(size);
                    self.check(event_loop, result);
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.exiting {
                    self.redraw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        let suspended = self.gfx.as_ref().map_or(true, |g| g.is_suspended());
        event_loop.set_control_flow(ControlFlow::Wait);
        if suspended {
            self.frames = 0;
            return;
        }
        // FIFO present paces the loop
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg: AppCfg = load_config_or_default(&args.config);
    cfg.backend.validation |= args.validation;
    info!(
        "config {} (validation={}, frames={})",
        args.config.display(),
        cfg.backend.validation,
        args.frames
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        frame_limit: args.frames,
        gfx: None,
        window: None,
        exiting: false,
        failure: None,
        presented: 0,
        frames: 0,
        last_fps_instant: Instant::now(),
    };
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
