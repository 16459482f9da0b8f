//! wgpu side of the renderer.
//!
//! - `context` owns the instance, surface, device and queue, and picks the
//!   surface format, present mode and MSAA sample count.
//! - `probe` opens a surfaceless device to test whether a backend works and
//!   forwards device-lost / uncaptured-error notifications.
//! - `pipeline` turns a linked [`Program`](crate::compile::Program) into a
//!   render pipeline for either the full-screen triangle or instanced quads.
//! - `textures` keeps the compositor's texture units and their bind group.
//! - `backend` ties these together as [`WgpuBackend`].

mod backend;
mod context;
mod pipeline;
pub mod probe;
mod textures;

pub use backend::WgpuBackend;
pub use probe::{is_backend_supported, probe_backend, DeviceEvent, ProbeReport};
