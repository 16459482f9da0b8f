use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Clock reading handed to an effect for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Seconds since the clock was last reset; becomes `uTime`.
    pub seconds: f32,
}

impl TimeSample {
    pub fn new(seconds: f32) -> Self {
        Self { seconds }
    }
}

/// Where an effect's animation time comes from.
pub trait TimeSource: Send {
    /// Rewinds to time zero; called when an effect (re)starts its loop.
    fn reset(&mut self);
    fn sample(&mut self) -> TimeSample;
}

/// Wall clock measured from construction or the last reset.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    started: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn sample(&mut self) -> TimeSample {
        TimeSample::new(self.started.elapsed().as_secs_f32())
    }
}

/// Frozen clock; every frame renders the same moment.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource(f32);

impl FixedTimeSource {
    pub fn new(seconds: f32) -> Self {
        Self(seconds)
    }
}

impl TimeSource for FixedTimeSource {
    fn reset(&mut self) {}

    fn sample(&mut self) -> TimeSample {
        TimeSample::new(self.0)
    }
}

/// Deterministic clock that advances by `step` seconds per frame.
///
/// Frame `n` (1-based) reports `n * step`, so the first drawn frame already
/// sees one step of elapsed time.
#[derive(Debug, Clone, Copy)]
pub struct SteppedTimeSource {
    step: f32,
    frame: u64,
}

impl SteppedTimeSource {
    pub fn new(step: f32) -> Self {
        Self { step, frame: 0 }
    }
}

impl TimeSource for SteppedTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        self.frame = self.frame.saturating_add(1);
        TimeSample::new(self.frame as f32 * self.step)
    }
}

pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Cancellation handle for a running frame loop. Clones share one flag.
#[derive(Debug, Clone, Default)]
pub struct FrameHandle {
    cancelled: Arc<AtomicBool>,
}

impl FrameHandle {
    fn cancelled() -> Self {
        let handle = Self::default();
        handle.cancel();
        handle
    }

    /// Revokes every future tick of the loop this handle belongs to.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Self-rescheduling per-frame task.
///
/// The host calls [`FrameLoop::advance`] once per display refresh; the flag is
/// checked before anything else so a cancelled loop never draws again.
#[derive(Debug)]
pub struct FrameLoop {
    handle: FrameHandle,
    ticks: u64,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self {
            handle: FrameHandle::cancelled(),
            ticks: 0,
        }
    }
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh loop, revoking any previous one.
    pub fn start(&mut self) -> FrameHandle {
        self.handle.cancel();
        self.handle = FrameHandle::default();
        self.ticks = 0;
        self.handle.clone()
    }

    pub fn stop(&mut self) {
        self.handle.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_cancelled()
    }

    /// Returns `true` when the current tick should run.
    pub fn advance(&mut self) -> bool {
        if self.handle.is_cancelled() {
            return false;
        }
        self.ticks = self.ticks.saturating_add(1);
        true
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stepped_source_reports_n_steps() {
        let mut clock = SteppedTimeSource::new(0.25);
        let samples: Vec<f32> = (0..4).map(|_| clock.sample().seconds).collect();
        assert_eq!(samples, vec![0.25, 0.5, 0.75, 1.0]);
        clock.reset();
        assert_eq!(clock.sample(), TimeSample::new(0.25));
    }

    #[test]
    fn cancelled_loop_stops_ticking() {
        let mut frames = FrameLoop::new();
        assert!(!frames.advance(), "loop is idle until started");

        let handle = frames.start();
        assert!(frames.advance());
        assert!(frames.advance());
        handle.clone().cancel();
        assert!(!frames.advance());
        assert_eq!(frames.ticks(), 2);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn restart_revokes_previous_handle() {
        let mut frames = FrameLoop::new();
        let first = frames.start();
        let second = frames.start();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(frames.is_active());
    }
}
