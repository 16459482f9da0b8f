//! Drives one configured effect against any [`RenderBackend`].
//!
//! The window host wraps this around a [`WgpuBackend`](crate::WgpuBackend);
//! `afterglow check` wraps it around a [`HeadlessBackend`](crate::HeadlessBackend)
//! to exercise a scene without a display.

use crate::animator::{Animator, AnimatorOptions, AnimatorState, FrameStatus, InitStatus};
use crate::backend::RenderBackend;
use crate::compile;
use crate::compositor::{Compositor, CompositorState};
use crate::diagnostics::{self, LogKind};
use crate::error::RenderError;
use crate::runtime::{BoxedTimeSource, FrameHandle};
use crate::surface::{self, CanvasMetrics};
use crate::types::{
    CompositeConfig, EffectConfig, GlowConfig, GlowEffect, Rect, RegionSpec, SourceElement,
};

enum HostedEffect<B: RenderBackend> {
    Glow {
        animator: Animator<B>,
        anchor: RegionSpec,
        track_mouse: bool,
    },
    Composite {
        compositor: Compositor<B>,
        regions: Vec<RegionSpec>,
    },
}

pub struct EffectHost<B: RenderBackend> {
    effect: HostedEffect<B>,
    degraded: bool,
    skipped_elements: usize,
}

impl<B: RenderBackend> EffectHost<B> {
    /// Builds the effect, loads its inputs and sizes it to `metrics`.
    ///
    /// Shader failures leave the host degraded (nothing draws); composite
    /// images that cannot be read or uploaded are logged and skipped.
    pub fn build(
        effect: &EffectConfig,
        backend: B,
        metrics: &CanvasMetrics,
        clock: BoxedTimeSource,
    ) -> Result<Self, RenderError> {
        let mut host = match effect {
            EffectConfig::Glow(glow) => Self::build_glow(glow, backend, clock)?,
            EffectConfig::Composite(composite) => Self::build_composite(composite, backend, metrics)?,
        };
        host.resize(metrics);
        Ok(host)
    }

    fn build_glow(config: &GlowConfig, backend: B, clock: BoxedTimeSource) -> Result<Self, RenderError> {
        let fragment = match config.effect {
            GlowEffect::Cross => compile::CROSS_FRAGMENT,
            GlowEffect::Ember => compile::EMBER_FRAGMENT,
        };
        let options = AnimatorOptions {
            vertex_source: config
                .shaders
                .vertex
                .clone()
                .unwrap_or_else(|| compile::FULLSCREEN_VERTEX.to_owned()),
            fragment_source: config
                .shaders
                .fragment
                .clone()
                .unwrap_or_else(|| fragment.to_owned()),
            anchor_offset: config.offset.unwrap_or_else(|| config.effect.anchor_offset()),
        };

        let mut animator = Animator::new(backend, options, clock);
        let degraded = animator.init()? == InitStatus::Degraded;
        Ok(Self {
            effect: HostedEffect::Glow {
                animator,
                anchor: config.anchor,
                track_mouse: config.track_mouse,
            },
            degraded,
            skipped_elements: 0,
        })
    }

    fn build_composite(
        config: &CompositeConfig,
        backend: B,
        metrics: &CanvasMetrics,
    ) -> Result<Self, RenderError> {
        let vertex = config
            .shaders
            .vertex
            .as_deref()
            .unwrap_or(compile::COMPOSITOR_VERTEX);
        let fragment = config
            .shaders
            .fragment
            .as_deref()
            .unwrap_or(compile::COMPOSITOR_FRAGMENT);
        let mut compositor = Compositor::new(backend, vertex, fragment);
        let degraded = !compositor.init(metrics)?;

        let mut regions = Vec::new();
        let mut skipped_elements = 0;
        if !degraded {
            for element in &config.elements {
                let pixels = match image::open(&element.image) {
                    Ok(image) => image.to_rgba8(),
                    Err(err) => {
                        diagnostics::log(
                            LogKind::Error,
                            format_args!("failed to load {}: {err}", element.image.display()),
                        );
                        skipped_elements += 1;
                        continue;
                    }
                };
                let rect = resolve(&element.region, metrics);
                let origin =
                    surface::project_element_to_canvas(&rect, &metrics.client, metrics.device_pixel_ratio);
                if let Err(err) = compositor.add(regions.len(), &SourceElement { pixels, origin }) {
                    diagnostics::log(
                        LogKind::Error,
                        format_args!("failed to upload {}: {err}", element.image.display()),
                    );
                    skipped_elements += 1;
                    continue;
                }
                regions.push(element.region);
            }
            diagnostics::log(
                LogKind::Success,
                format_args!("compositor loaded {} element(s)", regions.len()),
            );
        }

        Ok(Self {
            effect: HostedEffect::Composite {
                compositor,
                regions,
            },
            degraded,
            skipped_elements,
        })
    }

    /// `true` when the program failed and the effect will never draw.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Composite elements whose image could not be loaded or uploaded.
    pub fn skipped_elements(&self) -> usize {
        self.skipped_elements
    }

    pub fn backend(&self) -> &B {
        match &self.effect {
            HostedEffect::Glow { animator, .. } => animator.backend(),
            HostedEffect::Composite { compositor, .. } => compositor.backend(),
        }
    }

    /// Starts the frame loop. A degraded effect hands back a cancelled handle.
    pub fn start(&mut self) -> FrameHandle {
        match &mut self.effect {
            HostedEffect::Glow { animator, .. } => animator.start(),
            HostedEffect::Composite { compositor, .. } => match compositor.render() {
                Ok(handle) => handle,
                Err(err) => {
                    diagnostics::log(LogKind::Info, format_args!("compositor not started: {err}"));
                    let handle = FrameHandle::default();
                    handle.cancel();
                    handle
                }
            },
        }
    }

    /// Re-anchors the effect after the window size or scale factor changed.
    pub fn resize(&mut self, metrics: &CanvasMetrics) {
        match &mut self.effect {
            HostedEffect::Glow {
                animator, anchor, ..
            } => {
                let target = resolve(anchor, metrics);
                animator.resize(metrics, &target);
            }
            HostedEffect::Composite {
                compositor,
                regions,
            } => {
                let rects: Vec<Rect> = regions.iter().map(|region| resolve(region, metrics)).collect();
                if let Err(err) = compositor.resize_all(metrics, &rects) {
                    tracing::warn!(%err, "failed to re-measure compositor elements");
                }
            }
        }
    }

    /// Forwards a pointer position in client coordinates.
    pub fn pointer_moved(&mut self, client_x: f64, client_y: f64, metrics: &CanvasMetrics) {
        match &mut self.effect {
            HostedEffect::Glow {
                animator,
                track_mouse,
                ..
            } => {
                if *track_mouse {
                    animator.mouse_move(client_x, client_y, metrics);
                }
            }
            HostedEffect::Composite { compositor, .. } => compositor.mouse(client_x, client_y, metrics),
        }
    }

    pub fn frame(&mut self) -> Result<FrameStatus, RenderError> {
        match &mut self.effect {
            HostedEffect::Glow { animator, .. } => animator.frame(),
            HostedEffect::Composite { compositor, .. } => compositor.frame(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        match &self.effect {
            HostedEffect::Glow { animator, .. } => animator.state() == AnimatorState::Stopped,
            HostedEffect::Composite { compositor, .. } => compositor.state() == CompositorState::Stopped,
        }
    }

    pub fn teardown(&mut self) {
        if self.is_stopped() {
            return;
        }
        match &mut self.effect {
            HostedEffect::Glow { animator, .. } => animator.teardown(),
            HostedEffect::Composite { compositor, .. } => compositor.teardown(),
        }
        tracing::debug!("effect torn down");
    }
}

fn resolve(region: &RegionSpec, metrics: &CanvasMetrics) -> Rect {
    region.resolve(metrics.client.width, metrics.client.height)
}
