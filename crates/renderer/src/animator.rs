//! Single-quad shader animator.
//!
//! One program, one full-screen triangle and a handful of uniforms, repainted
//! every frame. The anchor (`uPos`) follows a tracked client rectangle plus a
//! fixed pixel offset; `uTime` is the elapsed time reported by the clock.

use crate::backend::{DrawCall, PipelineKind, RenderBackend};
use crate::compile::{self, Program, U_MOUSE, U_POS, U_RESOLUTION, U_TIME};
use crate::diagnostics::{self, LogKind};
use crate::error::RenderError;
use crate::runtime::{BoxedTimeSource, FrameHandle, FrameLoop};
use crate::surface::{self, CanvasMetrics, SurfaceSync};
use crate::types::Rect;
use crate::uniforms::UniformBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimatorState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// Outcome of `init`: `Degraded` means the program failed and nothing will draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    Ready,
    Degraded,
}

/// Outcome of a single frame tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Drawn(DrawCall),
    /// Not running (never started, or the program is missing).
    Skipped,
    /// The loop was cancelled; the host should stop scheduling frames.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AnimatorOptions {
    pub vertex_source: String,
    pub fragment_source: String,
    /// Pixel offset added to the projected anchor.
    pub anchor_offset: [f32; 2],
}

pub struct Animator<B: RenderBackend> {
    backend: B,
    options: AnimatorOptions,
    program: Option<Program>,
    uniforms: UniformBlock,
    surface: SurfaceSync,
    clock: BoxedTimeSource,
    frames: FrameLoop,
    state: AnimatorState,
}

impl<B: RenderBackend> Animator<B> {
    pub fn new(backend: B, options: AnimatorOptions, clock: BoxedTimeSource) -> Self {
        Self {
            backend,
            options,
            program: None,
            uniforms: UniformBlock::empty(),
            surface: SurfaceSync::new(),
            clock,
            frames: FrameLoop::new(),
            state: AnimatorState::Uninitialized,
        }
    }

    pub fn state(&self) -> AnimatorState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn uniforms(&self) -> &UniformBlock {
        &self.uniforms
    }

    /// Builds the program and the triangle pipeline.
    pub fn init(&mut self) -> Result<InitStatus, RenderError> {
        if self.state != AnimatorState::Uninitialized {
            return Ok(if self.program.is_some() {
                InitStatus::Ready
            } else {
                InitStatus::Degraded
            });
        }

        let Some(program) =
            compile::build_program(&self.options.vertex_source, &self.options.fragment_source)
        else {
            return Ok(InitStatus::Degraded);
        };

        self.backend
            .create_pipeline(&program, PipelineKind::FullscreenTriangle)?;
        self.uniforms = UniformBlock::new(program.uniform_layout().clone());
        self.uniforms.set_vec2(U_RESOLUTION, self.surface.resolution());
        self.backend.write_uniforms(self.uniforms.as_bytes());
        self.program = Some(program);
        self.state = AnimatorState::Initialized;
        Ok(InitStatus::Ready)
    }

    /// Resyncs the backing size and re-anchors on `target` (client space).
    pub fn resize(&mut self, metrics: &CanvasMetrics, target: &Rect) {
        if let Some(size) = self.surface.sync(metrics) {
            self.backend.configure(size);
        }
        if self.program.is_none() {
            return;
        }

        let anchor = surface::project_element_to_canvas(target, &metrics.client, metrics.device_pixel_ratio)
            .offset(self.options.anchor_offset);
        self.uniforms.set_vec2(U_RESOLUTION, self.surface.resolution());
        self.uniforms.set_vec2(U_POS, [anchor.x, anchor.y]);
        self.backend.write_uniforms(self.uniforms.as_bytes());
    }

    /// Pushes the pointer position in normalised device coordinates.
    pub fn mouse_move(&mut self, client_x: f64, client_y: f64, metrics: &CanvasMetrics) {
        if self.program.is_none() {
            return;
        }
        let ndc = surface::client_to_ndc(client_x, client_y, &metrics.client);
        if self.uniforms.set_vec2(U_MOUSE, ndc) {
            self.backend.write_uniforms(self.uniforms.as_bytes());
        }
    }

    /// Enters `Running` and resets the clock. Without a program the returned
    /// handle is already cancelled.
    pub fn start(&mut self) -> FrameHandle {
        let handle = self.frames.start();
        match self.state {
            AnimatorState::Initialized | AnimatorState::Running => {
                self.clock.reset();
                self.state = AnimatorState::Running;
            }
            AnimatorState::Uninitialized | AnimatorState::Stopped => {
                diagnostics::log(LogKind::Info, "animator has no program; frame loop not started");
                handle.cancel();
            }
        }
        handle
    }

    pub fn frame(&mut self) -> Result<FrameStatus, RenderError> {
        if !self.frames.advance() {
            return Ok(FrameStatus::Cancelled);
        }
        if self.state != AnimatorState::Running {
            return Ok(FrameStatus::Skipped);
        }

        let sample = self.clock.sample();
        self.uniforms.set_f32(U_TIME, sample.seconds);
        self.backend.write_uniforms(self.uniforms.as_bytes());

        let call = DrawCall {
            pipeline: PipelineKind::FullscreenTriangle,
            vertices: 3,
            instances: 1,
        };
        self.backend.draw(call)?;
        Ok(FrameStatus::Drawn(call))
    }

    /// Cancels the frame loop and releases GPU objects.
    pub fn teardown(&mut self) {
        self.frames.stop();
        self.backend.release_all();
        self.program = None;
        self.state = AnimatorState::Stopped;
    }
}
