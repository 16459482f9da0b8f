use std::fmt;
use std::path::PathBuf;

use bytemuck::{Pod, Zeroable};
use image::RgbaImage;

/// Number of `f32` slots occupied by one [`ElementRecord`] in the instance buffer.
pub const ELEMENT_STRIDE: usize = 5;

/// Byte stride of one instance as seen by the vertex fetch stage.
pub const ELEMENT_STRIDE_BYTES: u64 = (ELEMENT_STRIDE * std::mem::size_of::<f32>()) as u64;

/// Texture units available to the compositor (one per element).
pub const MAX_TEXTURE_UNITS: usize = 8;

/// Oversized triangle whose hypotenuse covers all four clip-space corners.
pub const FULLSCREEN_TRIANGLE: [[f32; 2]; 3] = [[-1.0, -1.0], [3.0, -1.0], [-1.0, 3.0]];

/// Two-triangle unit quad shared by every compositor instance.
pub const UNIT_QUAD: [[f32; 2]; 6] = [
    [0.0, 0.0],
    [1.0, 0.0],
    [0.0, 1.0],
    [0.0, 1.0],
    [1.0, 0.0],
    [1.0, 1.0],
];

/// Axis-aligned rectangle in client (logical, y-down) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> f64 {
        self.x
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Position in canvas pixel space (origin bottom-left, scaled by the device pixel ratio).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, by: [f32; 2]) -> Self {
        Self::new(self.x + by[0], self.y + by[1])
    }
}

/// Element rectangle projected into canvas pixel space.
///
/// `origin` is the element's top-left corner with `y` measured from the canvas
/// bottom edge, so the element spans `origin.y - height ..= origin.y` vertically.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CanvasRect {
    pub origin: Point,
    pub width: f32,
    pub height: f32,
}

/// Per-instance attributes consumed by the compositor's vertex stage.
///
/// Field order is the vertex layout: size at byte offset 0, position at 8 and
/// the texture unit at 16.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct ElementRecord {
    pub width: f32,
    pub height: f32,
    pub x: f32,
    pub y: f32,
    pub texture_unit: f32,
}

const _: () = assert!(std::mem::size_of::<ElementRecord>() == ELEMENT_STRIDE_BYTES as usize);

impl ElementRecord {
    pub fn new(width: f32, height: f32, x: f32, y: f32, texture_unit: usize) -> Self {
        Self {
            width,
            height,
            x,
            y,
            texture_unit: texture_unit as f32,
        }
    }

    fn set_rect(&mut self, rect: CanvasRect) {
        self.width = rect.width;
        self.height = rect.height;
        self.x = rect.origin.x;
        self.y = rect.origin.y;
    }
}

/// Ordered element records; insertion order is draw order and texture-unit order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceBuffer {
    records: Vec<ElementRecord>,
}

impl InstanceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ElementRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ElementRecord> {
        self.records.get(index)
    }

    /// Overwrites the size and position of one record, keeping its texture unit.
    pub fn set_rect(&mut self, index: usize, rect: CanvasRect) -> bool {
        match self.records.get_mut(index) {
            Some(record) => {
                record.set_rect(rect);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Flat view with `ELEMENT_STRIDE` floats per record.
    pub fn as_floats(&self) -> &[f32] {
        bytemuck::cast_slice(&self.records)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records)
    }
}

/// A pixel snapshot handed to the compositor together with its canvas-space origin.
#[derive(Clone)]
pub struct SourceElement {
    pub pixels: RgbaImage,
    pub origin: Point,
}

impl fmt::Debug for SourceElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceElement")
            .field("width", &self.pixels.width())
            .field("height", &self.pixels.height())
            .field("origin", &self.origin)
            .finish()
    }
}

/// Layout rule for a tracked region inside the window's client area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionSpec {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Centre horizontally and ignore `x`, like a fixed-width content column.
    pub centered: bool,
}

impl RegionSpec {
    /// Resolves the region against the current client size (logical pixels).
    pub fn resolve(&self, client_width: f64, client_height: f64) -> Rect {
        let width = self.width.min(client_width).max(0.0);
        let height = self.height.min(client_height).max(0.0);
        let x = if self.centered {
            ((client_width - width) * 0.5).max(0.0)
        } else {
            self.x
        };
        Rect::new(x, self.y, width, height)
    }
}

/// Anti-aliasing policy for the render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Antialiasing {
    /// Pick the highest sample count supported by the surface format.
    #[default]
    Auto,
    /// Disable MSAA and render directly into the swapchain.
    Off,
    /// Request a specific MSAA sample count (clamped to what the device supports).
    Samples(u32),
}

/// Closed set of rendering backends, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Native modern API (Vulkan, Metal, DX12) or browser WebGPU.
    Primary,
    /// OpenGL / WebGL2 legacy path.
    Gl,
    /// No GPU work at all; effects are disabled.
    Headless,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Gl => "gl",
            Self::Headless => "headless",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller preference fed into backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    #[default]
    Auto,
    Primary,
    Gl,
    Headless,
}

/// Built-in glow effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlowEffect {
    /// Twin turbulence crosses on a dark background.
    Cross,
    /// Warm noise-textured crosses that track the pointer.
    Ember,
}

impl GlowEffect {
    /// Fixed pixel offset applied to the anchor after projection.
    pub fn anchor_offset(self) -> [f32; 2] {
        match self {
            Self::Cross => [-50.0, 40.0],
            Self::Ember => [-30.0, 10.0],
        }
    }
}

/// Optional replacement shader sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderOverrides {
    pub vertex: Option<String>,
    pub fragment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlowConfig {
    pub effect: GlowEffect,
    pub anchor: RegionSpec,
    /// Overrides the effect's built-in anchor offset when set.
    pub offset: Option<[f32; 2]>,
    pub track_mouse: bool,
    pub shaders: ShaderOverrides,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeElement {
    pub image: PathBuf,
    pub region: RegionSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeConfig {
    pub elements: Vec<CompositeElement>,
    pub shaders: ShaderOverrides,
}

/// Which effect the host drives.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectConfig {
    Glow(GlowConfig),
    Composite(CompositeConfig),
}

/// Immutable configuration passed to the renderer at start-up.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Initial window size in logical pixels.
    pub window_size: (u32, u32),
    pub title: String,
    pub antialiasing: Antialiasing,
    pub backend: BackendPreference,
    pub effect: EffectConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_elements(buffer: &mut InstanceBuffer, count: usize) {
        for index in 0..count {
            let offset = index as f32 * 10.0;
            buffer.push(ElementRecord::new(64.0, 32.0, offset, offset + 5.0, index));
        }
    }

    #[test]
    fn flat_view_tracks_stride() {
        for count in [1usize, 3, 8] {
            let mut buffer = InstanceBuffer::new();
            push_elements(&mut buffer, count);
            let floats = buffer.as_floats();
            assert_eq!(floats.len(), ELEMENT_STRIDE * count);
            assert_eq!(floats[ELEMENT_STRIDE * (count - 1) + 4], (count - 1) as f32);
            assert_eq!(buffer.as_bytes().len() as u64, ELEMENT_STRIDE_BYTES * count as u64);
        }
    }

    #[test]
    fn set_rect_keeps_texture_unit() {
        let mut buffer = InstanceBuffer::new();
        push_elements(&mut buffer, 2);
        let rect = CanvasRect {
            origin: Point::new(1.0, 2.0),
            width: 3.0,
            height: 4.0,
        };
        assert!(buffer.set_rect(1, rect));
        assert_eq!(buffer.get(1), Some(&ElementRecord::new(3.0, 4.0, 1.0, 2.0, 1)));
        assert!(!buffer.set_rect(2, rect));
    }

    #[test]
    fn centered_region_ignores_x() {
        let region = RegionSpec {
            x: 400.0,
            y: 120.0,
            width: 600.0,
            height: 300.0,
            centered: true,
        };
        assert_eq!(region.resolve(1000.0, 800.0), Rect::new(200.0, 120.0, 600.0, 300.0));
        assert_eq!(region.resolve(500.0, 800.0), Rect::new(0.0, 120.0, 500.0, 300.0));
    }
}
