use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use winit::dpi::{LogicalSize, PhysicalPosition};
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::{Window, WindowBuilder};

use crate::animator::FrameStatus;
use crate::error::RenderError;
use crate::gpu::{DeviceEvent, WgpuBackend};
use crate::host::EffectHost;
use crate::runtime::{FrameHandle, SystemTimeSource};
use crate::surface::CanvasMetrics;
use crate::types::{BackendKind, Rect, RendererConfig};

/// Canvas layout for a window whose client area is entirely canvas.
fn canvas_metrics(window: &Window) -> CanvasMetrics {
    let scale_factor = window.scale_factor();
    let logical = window.inner_size().to_logical::<f64>(scale_factor);
    CanvasMetrics::new(
        Rect::new(0.0, 0.0, logical.width, logical.height),
        scale_factor,
    )
}

struct WindowState {
    // Drop order: the effect (and its surface) before the window it renders into.
    host: EffectHost<WgpuBackend>,
    frames: FrameHandle,
    window: Arc<Window>,
}

impl WindowState {
    fn new(window: Arc<Window>, config: &RendererConfig, backend: BackendKind) -> Result<Self> {
        let gpu = WgpuBackend::new(
            window.as_ref(),
            window.inner_size(),
            backend,
            config.antialiasing,
        )
        .context("failed to initialise GPU backend")?;

        let metrics = canvas_metrics(&window);
        let mut host = EffectHost::build(
            &config.effect,
            gpu,
            &metrics,
            Box::new(SystemTimeSource::new()),
        )
        .context("failed to build effect")?;
        let frames = host.start();

        Ok(Self {
            host,
            frames,
            window,
        })
    }

    fn resize(&mut self) {
        let metrics = canvas_metrics(&self.window);
        self.host.resize(&metrics);
        self.window.request_redraw();
    }

    fn cursor_moved(&mut self, position: PhysicalPosition<f64>) {
        let metrics = canvas_metrics(&self.window);
        let logical = position.to_logical::<f64>(self.window.scale_factor());
        self.host.pointer_moved(logical.x, logical.y, &metrics);
    }

    /// Draws one frame. Returns `false` when the host should exit.
    fn redraw(&mut self) -> bool {
        match self.host.frame() {
            Ok(FrameStatus::Drawn(_) | FrameStatus::Skipped | FrameStatus::Cancelled) => true,
            Err(RenderError::Surface(err)) => {
                tracing::error!(%err, "surface failure; closing window");
                false
            }
            Err(err) => {
                tracing::error!(%err, "frame failed; stopping effect");
                self.frames.cancel();
                true
            }
        }
    }

    /// Applies pending device notifications. Device loss stops the loop.
    fn drain_device_events(&mut self) {
        let lost = self
            .host
            .backend()
            .events()
            .try_iter()
            .any(|event| matches!(event, DeviceEvent::Lost { .. }));
        if lost && !self.frames.is_cancelled() {
            tracing::warn!("GPU device lost; effect stopped");
            self.frames.cancel();
        }
    }
}

pub(crate) fn run_window(config: &RendererConfig, backend: BackendKind) -> Result<()> {
    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;

    let (width, height) = config.window_size;
    let window = WindowBuilder::new()
        .with_title(config.title.as_str())
        .with_inner_size(LogicalSize::new(width, height))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create window: {err}"))?;
    let window = Arc::new(window);

    let mut state = WindowState::new(window.clone(), config, backend)?;
    window.request_redraw();

    let run_result = event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == state.window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                state.host.teardown();
                elwt.exit();
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                state.resize();
            }
            WindowEvent::CursorMoved { position, .. } => {
                state.cursor_moved(position);
            }
            WindowEvent::RedrawRequested => {
                if !state.redraw() {
                    state.host.teardown();
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            state.drain_device_events();
            if !state.frames.is_cancelled() {
                state.window.request_redraw();
            }
            elwt.set_control_flow(ControlFlow::Wait);
        }
        Event::LoopExiting => {
            state.host.teardown();
        }
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))
}
