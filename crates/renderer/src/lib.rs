//! Renderer crate for afterglow: animated glow shaders and an instanced
//! texture compositor drawn with `wgpu`.
//!
//! The overall flow is:
//!
//! ```text
//!   afterglow CLI
//!          │ RendererConfig
//!          ▼
//!   Renderer::run ──▶ select_backend(probe) ──▶ Headless: log, return
//!          │
//!          ▼
//!   winit window ──▶ EffectHost ──▶ Animator | Compositor ──▶ RenderBackend
//!                                                            (WgpuBackend)
//! ```
//!
//! Effects only talk to the [`RenderBackend`] trait, so the same state
//! machines run against [`HeadlessBackend`] in tests and in `afterglow check`.
//! Shaders are GLSL 450, validated with naga before any GPU object exists
//! (see [`compile`]).

mod animator;
mod backend;
pub mod compile;
mod compositor;
pub mod diagnostics;
mod error;
mod gpu;
mod host;
mod runtime;
mod surface;
mod types;
mod uniforms;
mod window;

use anyhow::Result;

pub use animator::{Animator, AnimatorOptions, AnimatorState, FrameStatus, InitStatus};
pub use backend::{fallback_chain, select_backend, DrawCall, HeadlessBackend, PipelineKind, RenderBackend};
pub use compositor::{solid_element, Compositor, CompositorState};
pub use error::RenderError;
pub use gpu::{is_backend_supported, probe_backend, DeviceEvent, ProbeReport, WgpuBackend};
pub use host::EffectHost;
pub use runtime::{
    BoxedTimeSource, FixedTimeSource, FrameHandle, FrameLoop, SteppedTimeSource, SystemTimeSource,
    TimeSample, TimeSource,
};
pub use surface::{client_to_ndc, element_rect_in_canvas, project_element_to_canvas, CanvasMetrics, SurfaceSync};
pub use types::{
    Antialiasing, BackendKind, BackendPreference, CanvasRect, CompositeConfig, CompositeElement,
    EffectConfig, ElementRecord, GlowConfig, GlowEffect, InstanceBuffer, Point, Rect, RegionSpec,
    RendererConfig, ShaderOverrides, SourceElement, ELEMENT_STRIDE, MAX_TEXTURE_UNITS,
};
pub use uniforms::UniformBlock;

/// Entry point that picks a backend and drives the configured effect.
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Walks the fallback chain, probing each GPU backend with a real device.
    pub fn select_backend(&self) -> BackendKind {
        backend::select_backend(self.config.backend, |kind| probe_backend(kind).is_some())
    }

    /// Opens the window and runs until it is closed.
    ///
    /// With no usable GPU backend the effect is disabled and this returns
    /// immediately.
    pub fn run(&mut self) -> Result<()> {
        let kind = self.select_backend();
        if kind == BackendKind::Headless {
            diagnostics::log(
                diagnostics::LogKind::Info,
                format_args!("{} runs without a GPU; nothing to display", self.config.title),
            );
            return Ok(());
        }
        window::run_window(&self.config, kind)
    }
}
