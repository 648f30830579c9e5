//! Flip timing and frame statistics
//!
//! Every swap of an onscreen window goes through that window's
//! [`FramePacer`], which turns the backend's [`SwapTimestamp`] into the
//! [`FlipInfo`] handed to flip callbacks and returned from `swap`, and keeps
//! a rolling history of flip intervals for [`FrameStats`].
//!
//! Timestamps are seconds since the owning screen was created.

use crate::backend::SwapTimestamp;
use crate::window::WindowIndex;
use log::{debug, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of flip intervals kept for statistics
const FRAME_HISTORY_SIZE: usize = 120;

/// A flip interval longer than this many refresh intervals is a missed frame
const MISSED_FRAME_THRESHOLD: f64 = 1.5;

/// What happened at one buffer swap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlipInfo {
    pub window: WindowIndex,
    /// Flip count of the window, starting at 1
    pub frame: u64,
    /// Vertical blank at which the flip happened
    pub vbl_timestamp: f64,
    /// When the new frame started to be scanned out
    pub stimulus_onset: f64,
    /// When the swap call returned
    pub flip_timestamp: f64,
    /// Positive when the flip came later than the missed-frame threshold
    pub missed: f64,
    /// Scanline at the time of the flip, when the backend can query it
    pub beampos: Option<u32>,
}

impl FlipInfo {
    pub fn deadline_missed(&self) -> bool {
        self.missed > 0.0
    }
}

/// Statistics about flip timing
#[derive(Debug, Clone)]
pub struct FrameStats {
    /// Average interval between flips
    pub avg_frame_time: Duration,
    pub min_frame_time: Duration,
    pub max_frame_time: Duration,
    /// Standard deviation of flip intervals
    pub frame_time_jitter: Duration,
    pub current_fps: f32,
    pub missed_frames: u64,
    pub total_frames: u64,
    /// Percentage of flips that missed their deadline
    pub miss_rate: f32,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            avg_frame_time: Duration::ZERO,
            min_frame_time: Duration::MAX,
            max_frame_time: Duration::ZERO,
            frame_time_jitter: Duration::ZERO,
            current_fps: 0.0,
            missed_frames: 0,
            total_frames: 0,
            miss_rate: 0.0,
        }
    }
}

/// Flip timing of one onscreen window
#[derive(Debug)]
pub struct FramePacer {
    window: WindowIndex,
    epoch: Instant,
    intervals: VecDeque<Duration>,
    last_vblank: Option<Instant>,
    stats: FrameStats,
}

impl FramePacer {
    pub fn new(window: WindowIndex, epoch: Instant) -> Self {
        Self {
            window,
            epoch,
            intervals: VecDeque::with_capacity(FRAME_HISTORY_SIZE),
            last_vblank: None,
            stats: FrameStats::default(),
        }
    }

    fn seconds(&self, t: Instant) -> f64 {
        t.saturating_duration_since(self.epoch).as_secs_f64()
    }

    /// Record a completed swap
    pub fn on_swap(&mut self, swap: &SwapTimestamp) -> FlipInfo {
        let threshold = swap.refresh_interval.as_secs_f64() * MISSED_FRAME_THRESHOLD;

        let missed = match self.last_vblank {
            Some(last) => {
                let interval = swap.vblank.saturating_duration_since(last);
                self.intervals.push_back(interval);
                if self.intervals.len() > FRAME_HISTORY_SIZE {
                    self.intervals.pop_front();
                }
                interval.as_secs_f64() - threshold
            }
            None => -threshold,
        };

        self.stats.total_frames += 1;
        if missed > 0.0 {
            self.stats.missed_frames += 1;
            warn!(
                "⚠️ Window {} missed flip deadline by {:.3}ms",
                self.window,
                missed * 1000.0
            );
        }
        self.last_vblank = Some(swap.vblank);
        self.update_stats();

        let vbl_timestamp = self.seconds(swap.vblank);
        let info = FlipInfo {
            window: self.window,
            frame: self.stats.total_frames,
            vbl_timestamp,
            stimulus_onset: vbl_timestamp,
            flip_timestamp: self.seconds(swap.completed),
            missed,
            beampos: None,
        };
        debug!(
            "Flip {} of window {} at {:.6}s",
            info.frame, self.window, info.vbl_timestamp
        );
        info
    }

    fn update_stats(&mut self) {
        if self.stats.total_frames > 0 {
            self.stats.miss_rate = (self.stats.missed_frames as f32 / self.stats.total_frames as f32) * 100.0;
        }
        if self.intervals.is_empty() {
            return;
        }

        let total: Duration = self.intervals.iter().sum();
        self.stats.avg_frame_time = total / self.intervals.len() as u32;
        self.stats.min_frame_time = self.intervals.iter().min().copied().unwrap_or(Duration::ZERO);
        self.stats.max_frame_time = self.intervals.iter().max().copied().unwrap_or(Duration::ZERO);

        if self.stats.avg_frame_time.as_secs_f64() > 0.0 {
            self.stats.current_fps = 1.0 / self.stats.avg_frame_time.as_secs_f32();
        }

        let avg = self.stats.avg_frame_time.as_secs_f64();
        let variance = self
            .intervals
            .iter()
            .map(|d| {
                let diff = d.as_secs_f64() - avg;
                diff * diff
            })
            .sum::<f64>()
            / self.intervals.len() as f64;
        self.stats.frame_time_jitter = Duration::from_secs_f64(variance.sqrt());
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = FrameStats::default();
        self.intervals.clear();
        self.last_vblank = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap_at(epoch: Instant, vblank_ms: u64) -> SwapTimestamp {
        let vblank = epoch + Duration::from_millis(vblank_ms);
        SwapTimestamp {
            vblank,
            completed: vblank + Duration::from_micros(200),
            refresh_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_flip_timestamps_relative_to_epoch() {
        let epoch = Instant::now();
        let mut pacer = FramePacer::new(WindowIndex(1), epoch);

        let info = pacer.on_swap(&swap_at(epoch, 10));
        assert_eq!(info.frame, 1);
        assert!((info.vbl_timestamp - 0.010).abs() < 1e-9);
        assert!(info.flip_timestamp > info.vbl_timestamp);
        assert_eq!(info.stimulus_onset, info.vbl_timestamp);
        assert!(!info.deadline_missed());
    }

    #[test]
    fn test_missed_frame_detection() {
        let epoch = Instant::now();
        let mut pacer = FramePacer::new(WindowIndex(1), epoch);

        pacer.on_swap(&swap_at(epoch, 10));
        let on_time = pacer.on_swap(&swap_at(epoch, 20));
        let late = pacer.on_swap(&swap_at(epoch, 50));

        assert!(!on_time.deadline_missed());
        assert!(late.deadline_missed());
        assert!((late.missed - 0.015).abs() < 1e-9);
        assert_eq!(pacer.stats().missed_frames, 1);
        assert_eq!(pacer.stats().total_frames, 3);
    }

    #[test]
    fn test_interval_stats() {
        let epoch = Instant::now();
        let mut pacer = FramePacer::new(WindowIndex(1), epoch);
        for i in 1..=5 {
            pacer.on_swap(&swap_at(epoch, i * 10));
        }

        let stats = pacer.stats();
        assert_eq!(stats.avg_frame_time, Duration::from_millis(10));
        assert_eq!(stats.min_frame_time, Duration::from_millis(10));
        assert_eq!(stats.max_frame_time, Duration::from_millis(10));
        assert!((stats.current_fps - 100.0).abs() < 0.01);

        pacer.reset_stats();
        assert_eq!(pacer.stats().total_frames, 0);
    }
}
