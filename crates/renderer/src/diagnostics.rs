//! Categorised log sink shared by the effects.
//!
//! Every message is a `tracing` event carrying a `kind` field so hosts can
//! filter or restyle them; the renderer never reads them back.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Success,
    Error,
    Info,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Info => "INFO",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn log(kind: LogKind, message: impl fmt::Display) {
    match kind {
        LogKind::Error => tracing::error!(kind = kind.as_str(), "{message}"),
        LogKind::Success | LogKind::Info => tracing::info!(kind = kind.as_str(), "{message}"),
    }
}

/// Event capture for tests that assert on what reached the sink.
#[cfg(test)]
pub(crate) mod capture {
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
    use tracing_subscriber::Registry;

    #[derive(Debug, Clone)]
    pub(crate) struct Captured {
        pub level: Level,
        pub message: String,
    }

    #[derive(Clone, Default)]
    pub(crate) struct CaptureLayer {
        events: Arc<Mutex<Vec<Captured>>>,
    }

    #[derive(Default)]
    struct MessageVisitor {
        message: String,
    }

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.message = format!("{value:?}");
            }
        }
    }

    impl<S: Subscriber> Layer<S> for CaptureLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            if let Ok(mut events) = self.events.lock() {
                events.push(Captured {
                    level: *event.metadata().level(),
                    message: visitor.message,
                });
            }
        }
    }

    /// Runs `f` with a thread-local subscriber and returns everything it logged.
    pub(crate) fn with_captured<R>(f: impl FnOnce() -> R) -> (R, Vec<Captured>) {
        let layer = CaptureLayer::default();
        let events = layer.events.clone();
        let subscriber = Registry::default().with(layer);
        let result = tracing::subscriber::with_default(subscriber, f);
        let captured = events.lock().map(|e| e.clone()).unwrap_or_default();
        (result, captured)
    }

    pub(crate) fn errors(events: &[Captured]) -> Vec<&Captured> {
        events.iter().filter(|e| e.level == Level::ERROR).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::capture::{errors, with_captured};
    use super::*;

    #[test]
    fn error_kind_maps_to_error_level() {
        let (_, events) = with_captured(|| {
            log(LogKind::Success, "device ready");
            log(LogKind::Error, "device lost");
            log(LogKind::Info, "waiting");
        });
        assert_eq!(events.len(), 3);
        let errors = errors(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("device lost"));
    }
}
