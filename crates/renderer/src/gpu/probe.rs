//! Device capability probe.
//!
//! Requests an adapter and a device at the WebGL2 compatibility tier without
//! creating a surface, so the host can decide which backend to open before a
//! window exists.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::diagnostics::{self, LogKind};
use crate::types::BackendKind;

/// Asynchronous device notification forwarded from wgpu callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Lost { reason: String, message: String },
    Uncaptured { message: String },
}

/// A device obtained by the probe, kept alive for as long as the report is.
#[derive(Debug)]
pub struct ProbeReport {
    pub kind: BackendKind,
    pub adapter_name: String,
    pub adapter_backend: String,
    pub device_type: String,
    pub events: Receiver<DeviceEvent>,
    _device: wgpu::Device,
    _queue: wgpu::Queue,
}

/// wgpu backends a kind maps onto. `Headless` has none.
pub(crate) fn backends_for(kind: BackendKind) -> Option<wgpu::Backends> {
    match kind {
        BackendKind::Primary => Some(wgpu::Backends::PRIMARY | wgpu::Backends::BROWSER_WEBGPU),
        BackendKind::Gl => Some(wgpu::Backends::GL),
        BackendKind::Headless => None,
    }
}

/// Registers device-lost and uncaptured-error handlers that log and forward.
pub(crate) fn attach_device_listeners(device: &wgpu::Device) -> Receiver<DeviceEvent> {
    let (tx, rx) = unbounded();

    let lost_tx = tx.clone();
    device.set_device_lost_callback(move |reason, message| {
        match reason {
            wgpu::DeviceLostReason::Destroyed => {
                tracing::debug!(%message, "GPU device destroyed");
            }
            _ => diagnostics::log(
                LogKind::Error,
                format_args!("GPU device lost ({reason:?}): {message}"),
            ),
        }
        forward(
            &lost_tx,
            DeviceEvent::Lost {
                reason: format!("{reason:?}"),
                message,
            },
        );
    });

    device.on_uncaptured_error(Box::new(move |error: wgpu::Error| {
        let message = error.to_string();
        diagnostics::log(LogKind::Error, format_args!("uncaptured GPU error: {message}"));
        forward(&tx, DeviceEvent::Uncaptured { message });
    }));

    rx
}

/// Returns `false` when the event was dropped.
fn forward(tx: &Sender<DeviceEvent>, event: DeviceEvent) -> bool {
    // The receiver goes away with its report or backend; callbacks can outlive both.
    match tx.send(event) {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(event = ?err.into_inner(), "device event dropped; no listener");
            false
        }
    }
}

/// Opens a throwaway device for `kind`. Logs one ERROR when none is available.
pub async fn probe(kind: BackendKind) -> Option<ProbeReport> {
    let backends = backends_for(kind)?;
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends,
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    });

    let adapter = match instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
    {
        Ok(adapter) => adapter,
        Err(err) => {
            diagnostics::log(
                LogKind::Error,
                format_args!("no {kind} adapter available: {err}"),
            );
            return None;
        }
    };

    let info = adapter.get_info();
    let required_limits = wgpu::Limits::downlevel_webgl2_defaults().using_resolution(adapter.limits());
    let (device, queue) = match adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("afterglow probe"),
            required_features: wgpu::Features::empty(),
            required_limits,
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        })
        .await
    {
        Ok(pair) => pair,
        Err(err) => {
            diagnostics::log(
                LogKind::Error,
                format_args!("{kind} adapter {} refused a device: {err}", info.name),
            );
            return None;
        }
    };
    let events = attach_device_listeners(&device);

    tracing::debug!(
        backend = %kind,
        adapter = %info.name,
        api = ?info.backend,
        device_type = ?info.device_type,
        "probe acquired device"
    );

    Some(ProbeReport {
        kind,
        adapter_name: info.name,
        adapter_backend: format!("{:?}", info.backend),
        device_type: format!("{:?}", info.device_type),
        events,
        _device: device,
        _queue: queue,
    })
}

/// `true` when a device of this kind can be created. Headless always can.
pub async fn is_backend_supported(kind: BackendKind) -> bool {
    match kind {
        BackendKind::Headless => true,
        _ => probe(kind).await.is_some(),
    }
}

/// Blocking form of [`probe`].
pub fn probe_backend(kind: BackendKind) -> Option<ProbeReport> {
    pollster::block_on(probe(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kinds_map_to_wgpu_backends() {
        assert_eq!(backends_for(BackendKind::Gl), Some(wgpu::Backends::GL));
        let primary = backends_for(BackendKind::Primary).expect("primary backends");
        assert!(primary.contains(wgpu::Backends::VULKAN));
        assert!(!primary.contains(wgpu::Backends::GL));
        assert_eq!(backends_for(BackendKind::Headless), None);
    }

    #[test]
    fn forward_tolerates_a_dropped_listener() {
        let (tx, rx) = unbounded();
        let lost = DeviceEvent::Lost {
            reason: "Unknown".into(),
            message: "driver reset".into(),
        };
        assert!(forward(&tx, lost.clone()));
        assert_eq!(rx.try_recv().ok(), Some(lost));

        drop(rx);
        assert!(!forward(
            &tx,
            DeviceEvent::Uncaptured {
                message: "validation".into()
            }
        ));
    }

    #[test]
    fn headless_needs_no_device() {
        assert!(pollster::block_on(is_backend_supported(BackendKind::Headless)));
        assert!(probe_backend(BackendKind::Headless).is_none());
    }
}
