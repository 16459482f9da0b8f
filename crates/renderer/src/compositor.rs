//! Instanced texture compositor.
//!
//! Every added element owns one texture unit and one [`ElementRecord`]; all of
//! them are drawn with a single instanced call of the shared unit quad. The
//! record buffer is re-uploaded every frame.

use image::RgbaImage;

use crate::backend::{DrawCall, PipelineKind, RenderBackend};
use crate::compile::{self, Program, U_MOUSE, U_RESOLUTION, U_SAMPLERS};
use crate::diagnostics::{self, LogKind};
use crate::error::RenderError;
use crate::runtime::{FrameHandle, FrameLoop};
use crate::surface::{self, CanvasMetrics, SurfaceSync};
use crate::types::{ElementRecord, InstanceBuffer, Point, Rect, SourceElement, MAX_TEXTURE_UNITS};
use crate::uniforms::UniformBlock;

pub use crate::animator::FrameStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorState {
    Uninitialized,
    Initialized,
    Rendering,
    Stopped,
}

pub struct Compositor<B: RenderBackend> {
    backend: B,
    vertex_source: String,
    fragment_source: String,
    program: Option<Program>,
    uniforms: UniformBlock,
    instances: InstanceBuffer,
    surface: SurfaceSync,
    frames: FrameLoop,
    state: CompositorState,
    mouse_notice_logged: bool,
}

impl<B: RenderBackend> Compositor<B> {
    pub fn new(backend: B, vertex_source: impl Into<String>, fragment_source: impl Into<String>) -> Self {
        Self {
            backend,
            vertex_source: vertex_source.into(),
            fragment_source: fragment_source.into(),
            program: None,
            uniforms: UniformBlock::empty(),
            instances: InstanceBuffer::new(),
            surface: SurfaceSync::new(),
            frames: FrameLoop::new(),
            state: CompositorState::Uninitialized,
            mouse_notice_logged: false,
        }
    }

    /// Compositor using the built-in textured-quad program.
    pub fn with_builtin_program(backend: B) -> Self {
        Self::new(backend, compile::COMPOSITOR_VERTEX, compile::COMPOSITOR_FRAGMENT)
    }

    pub fn state(&self) -> CompositorState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn instances(&self) -> &InstanceBuffer {
        &self.instances
    }

    pub fn uniforms(&self) -> &UniformBlock {
        &self.uniforms
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Builds the program and the instanced pipeline, then sets the initial
    /// viewport from `metrics`. A failed program leaves the compositor inert.
    pub fn init(&mut self, metrics: &CanvasMetrics) -> Result<bool, RenderError> {
        if self.state != CompositorState::Uninitialized {
            return Ok(self.program.is_some());
        }
        let Some(program) = compile::build_program(&self.vertex_source, &self.fragment_source)
        else {
            return Ok(false);
        };

        self.backend
            .create_pipeline(&program, PipelineKind::InstancedQuad)?;
        self.uniforms = UniformBlock::new(program.uniform_layout().clone());
        self.program = Some(program);
        self.state = CompositorState::Initialized;
        self.sync_surface(metrics);
        Ok(true)
    }

    /// Uploads `element` to texture unit `index` and appends its record.
    ///
    /// Units are handed out densely: `index` must equal the current element count.
    pub fn add(&mut self, index: usize, element: &SourceElement) -> Result<(), RenderError> {
        if self.program.is_none() {
            return Err(RenderError::NotInitialized);
        }
        if index >= MAX_TEXTURE_UNITS {
            return Err(RenderError::TooManyTextures {
                max: MAX_TEXTURE_UNITS,
            });
        }
        let expected = self.instances.len();
        if index != expected {
            return Err(RenderError::TextureUnit { index, expected });
        }

        self.backend.upload_texture(index as u32, &element.pixels)?;
        let (width, height) = element.pixels.dimensions();
        self.instances.push(ElementRecord::new(
            width as f32,
            height as f32,
            element.origin.x,
            element.origin.y,
            index,
        ));
        tracing::debug!(index, width, height, "compositor element added");
        Ok(())
    }

    /// Publishes the sampler table for the current elements and starts the loop.
    pub fn render(&mut self) -> Result<FrameHandle, RenderError> {
        if self.program.is_none() || self.state == CompositorState::Stopped {
            return Err(RenderError::NotInitialized);
        }
        let samplers: Vec<i32> = (0..self.instances.len() as i32).collect();
        self.uniforms.set_int_array(U_SAMPLERS, &samplers);
        self.backend.write_uniforms(self.uniforms.as_bytes());
        self.state = CompositorState::Rendering;
        Ok(self.frames.start())
    }

    pub fn frame(&mut self) -> Result<FrameStatus, RenderError> {
        if !self.frames.advance() {
            return Ok(FrameStatus::Cancelled);
        }
        if self.state != CompositorState::Rendering {
            return Ok(FrameStatus::Skipped);
        }

        self.uniforms.set_vec2(U_RESOLUTION, self.surface.resolution());
        self.backend.write_uniforms(self.uniforms.as_bytes());
        self.backend.write_instances(self.instances.as_bytes());

        let call = DrawCall {
            pipeline: PipelineKind::InstancedQuad,
            vertices: 6,
            instances: self.instances.len() as u32,
        };
        self.backend.draw(call)?;
        Ok(FrameStatus::Drawn(call))
    }

    /// Re-measures element 0 only, then resyncs the canvas.
    ///
    /// Records after the first keep their add-time geometry; use
    /// [`Compositor::resize_all`] to update every element.
    pub fn resize(&mut self, metrics: &CanvasMetrics, rects: &[Rect]) {
        if let Some(rect) = rects.first() {
            let projected =
                surface::element_rect_in_canvas(rect, &metrics.client, metrics.device_pixel_ratio);
            self.instances.set_rect(0, projected);
        }
        self.sync_surface(metrics);
    }

    /// Re-measures a single element from its client rectangle.
    pub fn resize_element(
        &mut self,
        metrics: &CanvasMetrics,
        index: usize,
        rect: &Rect,
    ) -> Result<(), RenderError> {
        let projected =
            surface::element_rect_in_canvas(rect, &metrics.client, metrics.device_pixel_ratio);
        if !self.instances.set_rect(index, projected) {
            return Err(RenderError::ElementIndex {
                index,
                len: self.instances.len(),
            });
        }
        Ok(())
    }

    /// Re-measures every element (`rects[i]` belongs to element `i`) and resyncs the canvas.
    pub fn resize_all(&mut self, metrics: &CanvasMetrics, rects: &[Rect]) -> Result<(), RenderError> {
        if rects.len() > self.instances.len() {
            return Err(RenderError::ElementIndex {
                index: self.instances.len(),
                len: self.instances.len(),
            });
        }
        for (index, rect) in rects.iter().enumerate() {
            self.resize_element(metrics, index, rect)?;
        }
        self.sync_surface(metrics);
        Ok(())
    }

    /// Releases every texture and record; the next `render` starts from zero elements.
    pub fn clear(&mut self) {
        for unit in 0..self.instances.len() as u32 {
            self.backend.release_texture(unit);
        }
        self.instances.clear();
        self.frames.stop();
        if self.program.is_some() && self.state != CompositorState::Stopped {
            self.state = CompositorState::Initialized;
        }
        diagnostics::log(LogKind::Info, "compositor cleared");
    }

    /// Pushes the pointer position in normalised device coordinates.
    pub fn mouse(&mut self, client_x: f64, client_y: f64, metrics: &CanvasMetrics) {
        if self.program.is_none() {
            return;
        }
        let ndc = surface::client_to_ndc(client_x, client_y, &metrics.client);
        if self.uniforms.set_vec2(U_MOUSE, ndc) {
            self.backend.write_uniforms(self.uniforms.as_bytes());
        } else if !self.mouse_notice_logged {
            self.mouse_notice_logged = true;
            diagnostics::log(
                LogKind::Info,
                "compositor program does not read uMouse; pointer updates are ignored",
            );
        }
    }

    /// Cancels the frame loop and releases every GPU object.
    pub fn teardown(&mut self) {
        self.frames.stop();
        self.instances.clear();
        self.backend.release_all();
        self.program = None;
        self.state = CompositorState::Stopped;
    }

    fn sync_surface(&mut self, metrics: &CanvasMetrics) {
        if let Some(size) = self.surface.sync(metrics) {
            self.backend.configure(size);
        }
        if self.program.is_some() {
            self.uniforms.set_vec2(U_RESOLUTION, self.surface.resolution());
            self.backend.write_uniforms(self.uniforms.as_bytes());
        }
    }
}

/// Solid-colour snapshot, handy for placeholders and tests.
pub fn solid_element(width: u32, height: u32, rgba: [u8; 4], origin: Point) -> SourceElement {
    SourceElement {
        pixels: RgbaImage::from_pixel(width, height, image::Rgba(rgba)),
        origin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::diagnostics::capture::with_captured;
    use crate::types::ELEMENT_STRIDE;

    const MOUSELESS_VERTEX: &str = r"#version 450
layout(location = 0) in vec2 aQuad;
layout(location = 0) out vec2 vUv;
layout(location = 1) flat out float vTexUnit;

layout(std140, set = 0, binding = 0) uniform Params {
    vec2 uResolution;
} params;

void main() {
    vUv = aQuad;
    vTexUnit = 0.0;
    gl_Position = vec4(aQuad / params.uResolution, 0.0, 1.0);
}
";

    const MOUSELESS_FRAGMENT: &str = r"#version 450
layout(location = 0) in vec2 vUv;
layout(location = 1) flat in float vTexUnit;
layout(location = 0) out vec4 fragColor;

void main() {
    fragColor = vec4(vUv, vTexUnit, 1.0);
}
";

    fn metrics() -> CanvasMetrics {
        CanvasMetrics::new(Rect::new(0.0, 0.0, 640.0, 480.0), 1.0)
    }

    fn compositor_with(count: usize) -> Compositor<HeadlessBackend> {
        let mut compositor = Compositor::with_builtin_program(HeadlessBackend::default());
        assert!(compositor.init(&metrics()).expect("init"));
        for index in 0..count {
            let origin = Point::new(10.0 * index as f32, 400.0);
            compositor
                .add(index, &solid_element(32 + index as u32, 16, [255, 0, 0, 255], origin))
                .expect("add");
        }
        compositor
    }

    #[test]
    fn adds_pack_records_in_order() {
        for count in 1..=MAX_TEXTURE_UNITS {
            let compositor = compositor_with(count);
            let floats = compositor.instances().as_floats();
            assert_eq!(floats.len(), ELEMENT_STRIDE * count);
            assert_eq!(floats[ELEMENT_STRIDE * (count - 1) + 4], (count - 1) as f32);
            assert_eq!(compositor.backend().live_textures().len(), count);
        }
    }

    #[test]
    fn add_rejects_out_of_order_units() {
        let mut compositor = compositor_with(2);
        let element = solid_element(4, 4, [0; 4], Point::default());
        assert!(matches!(
            compositor.add(3, &element),
            Err(RenderError::TextureUnit { index: 3, expected: 2 })
        ));
        assert!(matches!(
            compositor.add(1, &element),
            Err(RenderError::TextureUnit { .. })
        ));

        let mut full = compositor_with(MAX_TEXTURE_UNITS);
        assert!(matches!(
            full.add(MAX_TEXTURE_UNITS, &element),
            Err(RenderError::TooManyTextures { .. })
        ));
    }

    #[test]
    fn resize_touches_only_first_record() {
        let mut compositor = compositor_with(3);
        let before = compositor.instances().as_floats().to_vec();

        let rects = [
            Rect::new(5.0, 6.0, 70.0, 80.0),
            Rect::new(1.0, 1.0, 1.0, 1.0),
            Rect::new(2.0, 2.0, 2.0, 2.0),
        ];
        compositor.resize(&metrics(), &rects);
        let after = compositor.instances().as_floats();

        assert_eq!(&after[0..4], &[70.0, 80.0, 5.0, 474.0]);
        assert_eq!(after[4], before[4]);
        assert_eq!(&after[ELEMENT_STRIDE..], &before[ELEMENT_STRIDE..]);
    }

    #[test]
    fn resize_with_missing_rects_keeps_records() {
        let mut compositor = compositor_with(3);
        let before = compositor.instances().as_floats().to_vec();

        compositor.resize(&metrics(), &[]);
        assert_eq!(compositor.instances().as_floats(), before.as_slice());

        compositor.resize(&metrics(), &[Rect::new(5.0, 6.0, 70.0, 80.0)]);
        let after = compositor.instances().as_floats();
        assert_eq!(&after[0..4], &[70.0, 80.0, 5.0, 474.0]);
        assert_eq!(&after[4..], &before[4..]);
    }

    #[test]
    fn repeated_resize_configures_once() {
        let mut compositor = compositor_with(2);
        assert_eq!(compositor.backend().configure_count(), 1);
        let rects = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(20.0, 30.0, 40.0, 50.0)];

        compositor.resize(&metrics(), &rects);
        compositor.resize_all(&metrics(), &rects).expect("resize_all");
        assert_eq!(compositor.backend().configure_count(), 1);

        let larger = CanvasMetrics::new(Rect::new(0.0, 0.0, 800.0, 480.0), 1.0);
        compositor.resize(&larger, &rects);
        compositor.resize(&larger, &rects);
        assert_eq!(compositor.backend().configure_count(), 2);
        assert_eq!(
            compositor.backend().surface_size(),
            winit::dpi::PhysicalSize::new(800, 480)
        );
    }

    #[test]
    fn resize_all_updates_every_record() {
        let mut compositor = compositor_with(2);
        let rects = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(20.0, 30.0, 40.0, 50.0)];
        compositor.resize_all(&metrics(), &rects).expect("resize_all");
        assert_eq!(
            compositor.instances().get(1),
            Some(&ElementRecord::new(40.0, 50.0, 20.0, 450.0, 1))
        );
        assert!(matches!(
            compositor.resize_element(&metrics(), 5, &rects[0]),
            Err(RenderError::ElementIndex { index: 5, len: 2 })
        ));
    }

    #[test]
    fn frame_draws_every_instance() {
        let mut compositor = compositor_with(3);
        compositor.render().expect("render");
        assert_eq!(
            compositor.uniforms().get_int_array(U_SAMPLERS),
            Some(vec![0, 1, 2, 0, 0, 0, 0, 0])
        );
        let status = compositor.frame().expect("frame");
        assert_eq!(
            status,
            FrameStatus::Drawn(DrawCall {
                pipeline: PipelineKind::InstancedQuad,
                vertices: 6,
                instances: 3,
            })
        );
        assert_eq!(compositor.backend().last_instances(), compositor.instances().as_bytes());
    }

    #[test]
    fn clear_then_render_draws_nothing() {
        let mut compositor = compositor_with(4);
        compositor.render().expect("render");
        compositor.frame().expect("frame");

        compositor.clear();
        assert_eq!(compositor.state(), CompositorState::Initialized);
        assert!(compositor.backend().live_textures().is_empty());

        compositor.render().expect("render after clear");
        assert_eq!(
            compositor.uniforms().get_int_array(U_SAMPLERS),
            Some(vec![0; MAX_TEXTURE_UNITS])
        );
        let status = compositor.frame().expect("frame");
        assert!(matches!(status, FrameStatus::Drawn(call) if call.instances == 0));
        assert!(compositor.backend().last_instances().is_empty());

        compositor
            .add(0, &solid_element(8, 8, [1, 2, 3, 4], Point::default()))
            .expect("units restart at zero");
    }

    #[test]
    fn mouse_without_uniform_logs_once() {
        let (_, events) = with_captured(|| {
            let mut compositor = Compositor::new(
                HeadlessBackend::default(),
                MOUSELESS_VERTEX,
                MOUSELESS_FRAGMENT,
            );
            assert!(compositor.init(&metrics()).expect("init"));
            compositor.mouse(10.0, 10.0, &metrics());
            compositor.mouse(20.0, 20.0, &metrics());
        });
        let notices = events
            .iter()
            .filter(|event| event.message.contains("uMouse"))
            .count();
        assert_eq!(notices, 1);
    }

    #[test]
    fn mouse_updates_builtin_program() {
        let mut compositor = compositor_with(1);
        compositor.mouse(160.0, 120.0, &metrics());
        assert_eq!(compositor.uniforms().get_vec2(U_MOUSE), Some([-0.5, 0.5]));
    }

    #[test]
    fn teardown_releases_textures_and_cancels() {
        let mut compositor = compositor_with(3);
        let handle = compositor.render().expect("render");
        compositor.teardown();

        assert!(handle.is_cancelled());
        assert!(compositor.backend().live_textures().is_empty());
        assert_eq!(compositor.frame().expect("frame"), FrameStatus::Cancelled);
        assert!(matches!(compositor.render(), Err(RenderError::NotInitialized)));
    }
}
