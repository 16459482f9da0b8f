//! Backend seam between the effects and the GPU.
//!
//! `Animator` and `Compositor` only talk to [`RenderBackend`]. `WgpuBackend`
//! (in `gpu`) does real work; [`HeadlessBackend`] keeps bookkeeping only and
//! is what the fallback chain ends in when no GPU is usable.

use std::collections::BTreeMap;

use image::RgbaImage;
use winit::dpi::PhysicalSize;

use crate::compile::Program;
use crate::error::RenderError;
use crate::types::{BackendKind, BackendPreference};

/// Vertex setup a pipeline is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// One `vec2` attribute, three vertices, no textures.
    FullscreenTriangle,
    /// Shared unit quad plus the per-instance element records and texture units.
    InstancedQuad,
}

/// One non-indexed draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub pipeline: PipelineKind,
    pub vertices: u32,
    pub instances: u32,
}

pub trait RenderBackend {
    fn kind(&self) -> BackendKind;
    /// Current backing-store size in physical pixels.
    fn surface_size(&self) -> PhysicalSize<u32>;
    /// Resizes the backing store and viewport.
    fn configure(&mut self, size: PhysicalSize<u32>);
    fn create_pipeline(&mut self, program: &Program, kind: PipelineKind) -> Result<(), RenderError>;
    /// Uploads RGBA8 pixels to a texture unit, replacing whatever it held.
    fn upload_texture(&mut self, unit: u32, image: &RgbaImage) -> Result<(), RenderError>;
    fn release_texture(&mut self, unit: u32);
    fn write_uniforms(&mut self, bytes: &[u8]);
    fn write_instances(&mut self, bytes: &[u8]);
    fn draw(&mut self, call: DrawCall) -> Result<(), RenderError>;
    /// Drops every GPU object owned by the backend.
    fn release_all(&mut self);
}

/// Backend that records what would have been sent to a GPU.
#[derive(Debug)]
pub struct HeadlessBackend {
    size: PhysicalSize<u32>,
    configure_count: usize,
    pipelines: Vec<PipelineKind>,
    textures: BTreeMap<u32, (u32, u32)>,
    uniforms: Vec<u8>,
    instances: Vec<u8>,
    draws: Vec<DrawCall>,
}

impl HeadlessBackend {
    pub fn new(size: PhysicalSize<u32>) -> Self {
        Self {
            size,
            configure_count: 0,
            pipelines: Vec::new(),
            textures: BTreeMap::new(),
            uniforms: Vec::new(),
            instances: Vec::new(),
            draws: Vec::new(),
        }
    }

    pub fn configure_count(&self) -> usize {
        self.configure_count
    }

    pub fn pipelines(&self) -> &[PipelineKind] {
        &self.pipelines
    }

    /// Texture units currently holding an upload, with their pixel sizes.
    pub fn live_textures(&self) -> &BTreeMap<u32, (u32, u32)> {
        &self.textures
    }

    pub fn last_uniforms(&self) -> &[u8] {
        &self.uniforms
    }

    pub fn last_instances(&self) -> &[u8] {
        &self.instances
    }

    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(PhysicalSize::new(1, 1))
    }
}

impl RenderBackend for HeadlessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Headless
    }

    fn surface_size(&self) -> PhysicalSize<u32> {
        self.size
    }

    fn configure(&mut self, size: PhysicalSize<u32>) {
        self.size = size;
        self.configure_count += 1;
    }

    fn create_pipeline(&mut self, _program: &Program, kind: PipelineKind) -> Result<(), RenderError> {
        self.pipelines.push(kind);
        Ok(())
    }

    fn upload_texture(&mut self, unit: u32, image: &RgbaImage) -> Result<(), RenderError> {
        self.textures.insert(unit, image.dimensions());
        Ok(())
    }

    fn release_texture(&mut self, unit: u32) {
        self.textures.remove(&unit);
    }

    fn write_uniforms(&mut self, bytes: &[u8]) {
        self.uniforms = bytes.to_vec();
    }

    fn write_instances(&mut self, bytes: &[u8]) {
        self.instances = bytes.to_vec();
    }

    fn draw(&mut self, call: DrawCall) -> Result<(), RenderError> {
        self.draws.push(call);
        Ok(())
    }

    fn release_all(&mut self) {
        self.pipelines.clear();
        self.textures.clear();
        self.uniforms.clear();
        self.instances.clear();
    }
}

/// Candidate backends for a preference, most capable first.
pub fn fallback_chain(preference: BackendPreference) -> &'static [BackendKind] {
    match preference {
        BackendPreference::Auto | BackendPreference::Primary => {
            &[BackendKind::Primary, BackendKind::Gl, BackendKind::Headless]
        }
        BackendPreference::Gl => &[BackendKind::Gl, BackendKind::Headless],
        BackendPreference::Headless => &[BackendKind::Headless],
    }
}

/// Walks the fallback chain and returns the first backend `probe` accepts.
///
/// `Headless` needs no device and is always accepted without probing.
pub fn select_backend<F>(preference: BackendPreference, mut probe: F) -> BackendKind
where
    F: FnMut(BackendKind) -> bool,
{
    for &kind in fallback_chain(preference) {
        if kind == BackendKind::Headless {
            break;
        }
        if probe(kind) {
            tracing::info!(backend = %kind, "selected rendering backend");
            return kind;
        }
        tracing::warn!(backend = %kind, "backend unavailable; trying next");
    }
    tracing::info!("no GPU backend available; effects disabled");
    BackendKind::Headless
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_primary_when_available() {
        let mut probed = Vec::new();
        let kind = select_backend(BackendPreference::Auto, |kind| {
            probed.push(kind);
            true
        });
        assert_eq!(kind, BackendKind::Primary);
        assert_eq!(probed, vec![BackendKind::Primary]);
    }

    #[test]
    fn falls_back_to_gl_then_headless() {
        let kind = select_backend(BackendPreference::Auto, |kind| kind == BackendKind::Gl);
        assert_eq!(kind, BackendKind::Gl);

        let mut probed = Vec::new();
        let kind = select_backend(BackendPreference::Primary, |kind| {
            probed.push(kind);
            false
        });
        assert_eq!(kind, BackendKind::Headless);
        assert_eq!(probed, vec![BackendKind::Primary, BackendKind::Gl]);
    }

    #[test]
    fn headless_preference_never_probes() {
        let kind = select_backend(BackendPreference::Headless, |_| panic!("probe called"));
        assert_eq!(kind, BackendKind::Headless);
    }

    #[test]
    fn gl_preference_skips_primary() {
        let mut probed = Vec::new();
        select_backend(BackendPreference::Gl, |kind| {
            probed.push(kind);
            false
        });
        assert_eq!(probed, vec![BackendKind::Gl]);
    }
}
