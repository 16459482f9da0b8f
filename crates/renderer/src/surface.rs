//! Client-space to canvas-space conversions.
//!
//! Client rectangles use logical pixels with y growing downward. Canvas
//! positions are physical pixels with y measured from the canvas bottom edge,
//! matching the shaders' bottom-left `gl_FragCoord` convention.

use winit::dpi::PhysicalSize;

use crate::types::{CanvasRect, Point, Rect};

/// Layout of the drawable surface as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasMetrics {
    pub client: Rect,
    pub device_pixel_ratio: f64,
}

impl CanvasMetrics {
    pub fn new(client: Rect, device_pixel_ratio: f64) -> Self {
        Self {
            client,
            device_pixel_ratio,
        }
    }

    /// Backing-store size for this layout: client size times the pixel ratio.
    pub fn backing_size(&self) -> PhysicalSize<u32> {
        let scale = |logical: f64| (logical * self.device_pixel_ratio).round().max(1.0) as u32;
        PhysicalSize::new(scale(self.client.width), scale(self.client.height))
    }
}

/// Tracks the backing-store size so GPU reconfiguration only happens on change.
#[derive(Debug, Default)]
pub struct SurfaceSync {
    current: Option<PhysicalSize<u32>>,
}

impl SurfaceSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new backing size when it differs from the last synced one.
    pub fn sync(&mut self, metrics: &CanvasMetrics) -> Option<PhysicalSize<u32>> {
        let size = metrics.backing_size();
        if self.current == Some(size) {
            return None;
        }
        self.current = Some(size);
        Some(size)
    }

    /// Last synced size, or 1x1 before the first sync.
    pub fn size(&self) -> PhysicalSize<u32> {
        self.current.unwrap_or(PhysicalSize::new(1, 1))
    }

    pub fn resolution(&self) -> [f32; 2] {
        let size = self.size();
        [size.width as f32, size.height as f32]
    }
}

/// Projects an element's top-left corner into canvas pixel space.
pub fn project_element_to_canvas(element: &Rect, canvas: &Rect, device_pixel_ratio: f64) -> Point {
    let x = (element.left() - canvas.left()) * device_pixel_ratio;
    let y = (canvas.bottom() - element.top()) * device_pixel_ratio;
    Point::new(x as f32, y as f32)
}

/// Projects an element's full rectangle into canvas pixel space.
pub fn element_rect_in_canvas(element: &Rect, canvas: &Rect, device_pixel_ratio: f64) -> CanvasRect {
    CanvasRect {
        origin: project_element_to_canvas(element, canvas, device_pixel_ratio),
        width: (element.width * device_pixel_ratio) as f32,
        height: (element.height * device_pixel_ratio) as f32,
    }
}

/// Converts client coordinates to normalised device coordinates (y up).
pub fn client_to_ndc(client_x: f64, client_y: f64, canvas: &Rect) -> [f32; 2] {
    let width = canvas.width.max(f64::EPSILON);
    let height = canvas.height.max(f64::EPSILON);
    let x = (client_x - canvas.left()) / width * 2.0 - 1.0;
    let y = 1.0 - (client_y - canvas.top()) / height * 2.0;
    [x as f32, y as f32]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_measures_from_canvas_bottom() {
        let canvas = Rect::new(10.0, 20.0, 400.0, 300.0);
        let element = Rect::new(30.0, 50.0, 100.0, 30.0);
        assert_eq!(element.bottom(), 80.0);

        let point = project_element_to_canvas(&element, &canvas, 2.0);
        assert_eq!(point.x, 40.0);
        assert_eq!(point.y, ((canvas.bottom() - 50.0) * 2.0) as f32);
        assert_eq!(point.y, 540.0);

        let rect = element_rect_in_canvas(&element, &canvas, 2.0);
        assert_eq!((rect.width, rect.height), (200.0, 60.0));
    }

    #[test]
    fn sync_is_idempotent() {
        let metrics = CanvasMetrics::new(Rect::new(0.0, 0.0, 640.0, 360.0), 1.5);
        let mut sync = SurfaceSync::new();
        assert_eq!(sync.sync(&metrics), Some(PhysicalSize::new(960, 540)));
        assert_eq!(sync.sync(&metrics), None);

        let grown = CanvasMetrics::new(Rect::new(0.0, 0.0, 800.0, 360.0), 1.5);
        assert_eq!(sync.sync(&grown), Some(PhysicalSize::new(1200, 540)));
        assert_eq!(sync.resolution(), [1200.0, 540.0]);
    }

    #[test]
    fn ndc_corners() {
        let canvas = Rect::new(0.0, 0.0, 200.0, 100.0);
        assert_eq!(client_to_ndc(0.0, 0.0, &canvas), [-1.0, 1.0]);
        assert_eq!(client_to_ndc(200.0, 100.0, &canvas), [1.0, -1.0]);
        assert_eq!(client_to_ndc(100.0, 50.0, &canvas), [0.0, 0.0]);
    }
}
