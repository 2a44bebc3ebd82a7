use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::{Duration, Instant},
};

use serde::Serialize;

/// Number of latency samples kept per stage.
pub const LATENCY_WINDOW: usize = 100;

/// `f32` stored in an `AtomicU32` so a single unit can publish a value that
/// others read without locking.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Counters written by the pipeline units and read by `performance_metrics`.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub frames_captured: AtomicU64,
    pub frames_processed: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub ui_frames_evicted: AtomicU64,
    pub avg_inference_ms: AtomicF32,
    pub avg_end_to_end_ms: AtomicF32,
    pub fps_actual: AtomicF32,
}

impl PipelineCounters {
    pub fn reset(&self) {
        self.frames_captured.store(0, Ordering::Relaxed);
        self.frames_processed.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.ui_frames_evicted.store(0, Ordering::Relaxed);
        self.avg_inference_ms.store(0.0);
        self.avg_end_to_end_ms.store(0.0);
        self.fps_actual.store(0.0);
    }
}

/// Rolling window of the most recent latency samples.
#[derive(Debug)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
    total: Duration,
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(LATENCY_WINDOW)
    }
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total: Duration::ZERO,
        }
    }

    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.total = self.total.saturating_sub(oldest);
            }
        }
        self.samples.push_back(sample);
        self.total += sample;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average_ms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.total.as_secs_f32() * 1000.0 / self.samples.len() as f32
    }
}

/// Frames fully processed per elapsed second between ticks.
#[derive(Debug)]
pub struct ThroughputMeter {
    last_count: u64,
    last_tick: Instant,
}

impl ThroughputMeter {
    pub fn new(count: u64, now: Instant) -> Self {
        Self {
            last_count: count,
            last_tick: now,
        }
    }

    pub fn tick(&mut self, count: u64, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.last_tick).as_secs_f32();
        let frames = count.saturating_sub(self.last_count);
        self.last_count = count;
        self.last_tick = now;
        if elapsed > 0.0 {
            frames as f32 / elapsed
        } else {
            0.0
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueSizes {
    pub capture: usize,
    pub inference: usize,
    pub ui: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub running: bool,
    pub fps_actual: f32,
    pub fps_target: f32,
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub ui_frames_evicted: u64,
    pub drop_rate: f32,
    pub avg_inference_ms: f32,
    pub avg_end_to_end_ms: f32,
    pub queue_sizes: QueueSizes,
}

impl PerformanceMetrics {
    pub fn collect(
        counters: &PipelineCounters,
        running: bool,
        fps_target: f32,
        queue_sizes: QueueSizes,
    ) -> Self {
        let frames_captured = counters.frames_captured.load(Ordering::Relaxed);
        let frames_dropped = counters.frames_dropped.load(Ordering::Relaxed);
        Self {
            running,
            fps_actual: counters.fps_actual.load(),
            fps_target,
            frames_captured,
            frames_processed: counters.frames_processed.load(Ordering::Relaxed),
            frames_dropped,
            ui_frames_evicted: counters.ui_frames_evicted.load(Ordering::Relaxed),
            drop_rate: frames_dropped as f32 / frames_captured.max(1) as f32,
            avg_inference_ms: counters.avg_inference_ms.load(),
            avg_end_to_end_ms: counters.avg_end_to_end_ms.load(),
            queue_sizes,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn latency_window_keeps_most_recent_samples() {
        let mut window = LatencyWindow::new(3);
        for ms in [10, 20, 30, 40] {
            window.push(Duration::from_millis(ms));
        }
        assert_eq!(window.len(), 3);
        assert_relative_eq!(window.average_ms(), 30.0, epsilon = 1e-3);
        assert_relative_eq!(LatencyWindow::default().average_ms(), 0.0);
    }

    #[test]
    fn throughput_is_frames_per_elapsed_second() {
        let start = Instant::now();
        let mut meter = ThroughputMeter::new(0, start);
        let fps = meter.tick(45, start + Duration::from_millis(1500));
        assert_relative_eq!(fps, 30.0, epsilon = 1e-3);
        let fps = meter.tick(45, start + Duration::from_millis(2500));
        assert_relative_eq!(fps, 0.0);
    }

    #[test]
    fn metrics_report_drop_rate() {
        let counters = PipelineCounters::default();
        counters.frames_captured.store(40, Ordering::Relaxed);
        counters.frames_dropped.store(10, Ordering::Relaxed);
        counters.avg_inference_ms.store(4.5);
        let metrics = PerformanceMetrics::collect(&counters, true, 30.0, QueueSizes::default());
        assert_relative_eq!(metrics.drop_rate, 0.25);
        assert_relative_eq!(metrics.avg_inference_ms, 4.5);

        counters.reset();
        let metrics = PerformanceMetrics::collect(&counters, false, 30.0, QueueSizes::default());
        assert_eq!(metrics.frames_captured, 0);
        assert_relative_eq!(metrics.drop_rate, 0.0);
    }
}
