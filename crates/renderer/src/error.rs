use crate::compile::Stage;

/// Failures surfaced by the effect renderers and their backends.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{stage} shader failed to compile:\n{log}")]
    Compile { stage: Stage, log: String },
    #[error("program failed to link: {0}")]
    Link(String),
    #[error("renderer has no usable program")]
    NotInitialized,
    #[error("texture unit {index} is out of order; next free unit is {expected}")]
    TextureUnit { index: usize, expected: usize },
    #[error("compositor supports at most {max} texture units")]
    TooManyTextures { max: usize },
    #[error("element {index} does not exist ({len} elements)")]
    ElementIndex { index: usize, len: usize },
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("GPU device error: {0}")]
    Device(String),
}
