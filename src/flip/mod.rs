//! Flip Callback Scheduler
//!
//! Callbacks are queued per window and run, in enqueue order, right after
//! that window's next buffer swap. Per window the scheduler moves through
//!
//! ```text
//! Idle --schedule--> Armed --swap--> Draining --> Idle | Armed
//! ```
//!
//! Only entries that were queued when the drain started run in it; anything
//! scheduled from inside a callback waits for the following swap. The lock
//! is released while a callback runs, so callbacks may schedule or clear,
//! and `clear` from another thread atomically removes whatever has not been
//! invoked yet.
//!
//! Windows are registered when they open and retired when they close.
//! Scheduling for a window that is not registered fails, so a closed
//! window can never accumulate callbacks that no swap will drain.
//!
//! [`FlipScheduler`] is a cheap `Clone` handle onto shared state.

use crate::error::{Result, ScreenError};
use crate::pacing::FlipInfo;
use crate::window::WindowIndex;
use log::{debug, error};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Work to run after a flip; errors are logged, never propagated
pub type FlipCallback = Box<dyn FnOnce(&FlipInfo) -> anyhow::Result<()> + Send>;

/// Identifies one scheduled callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle {
    pub window: WindowIndex,
    seq: u64,
}

/// Scheduler state of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipState {
    /// Nothing pending
    Idle,
    /// Callbacks pending for the next swap
    Armed,
    /// Callbacks of the current swap are running
    Draining,
}

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlipStats {
    pub scheduled: u64,
    pub invoked: u64,
    pub failed: u64,
    pub cleared: u64,
}

struct Entry {
    seq: u64,
    callback: FlipCallback,
}

#[derive(Default)]
struct WindowQueue {
    entries: VecDeque<Entry>,
    draining: bool,
}

#[derive(Default)]
struct Inner {
    live: HashSet<WindowIndex>,
    queues: HashMap<WindowIndex, WindowQueue>,
    next_seq: u64,
    stats: FlipStats,
}

impl Inner {
    fn cleanup(&mut self, window: WindowIndex) {
        if self
            .queues
            .get(&window)
            .is_some_and(|q| q.entries.is_empty() && !q.draining)
        {
            self.queues.remove(&window);
        }
    }
}

/// Resets the draining flag even if a callback panics
struct DrainGuard<'a> {
    inner: &'a Mutex<Inner>,
    window: WindowIndex,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Some(queue) = inner.queues.get_mut(&self.window) {
            queue.draining = false;
        }
        inner.cleanup(self.window);
    }
}

/// Per-window FIFO of flip callbacks
#[derive(Clone, Default)]
pub struct FlipScheduler {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for FlipScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FlipScheduler")
            .field("windows", &inner.queues.len())
            .field("stats", &inner.stats)
            .finish()
    }
}

impl FlipScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept callbacks for `window` from now on
    pub fn register(&self, window: WindowIndex) {
        self.inner.lock().live.insert(window);
    }

    /// Stop accepting callbacks for `window` and drop its pending ones.
    ///
    /// Returns how many were dropped.
    pub fn retire(&self, window: WindowIndex) -> usize {
        let mut inner = self.inner.lock();
        inner.live.remove(&window);
        let removed = inner
            .queues
            .get_mut(&window)
            .map_or(0, |q| std::mem::take(&mut q.entries).len());
        inner.stats.cleared += removed as u64;
        inner.cleanup(window);
        debug!("Retired window {} ({} flip callbacks dropped)", window, removed);
        removed
    }

    pub fn is_registered(&self, window: WindowIndex) -> bool {
        self.inner.lock().live.contains(&window)
    }

    /// Queue a callback for the window's next swap
    pub fn schedule<F>(&self, window: WindowIndex, callback: F) -> Result<CallbackHandle>
    where
        F: FnOnce(&FlipInfo) -> anyhow::Result<()> + Send + 'static,
    {
        self.schedule_boxed(window, Box::new(callback))
    }

    /// Fails with [`ScreenError::InvalidWindowIndex`] unless the window is registered
    pub fn schedule_boxed(&self, window: WindowIndex, callback: FlipCallback) -> Result<CallbackHandle> {
        let mut inner = self.inner.lock();
        if !inner.live.contains(&window) {
            return Err(ScreenError::InvalidWindowIndex(window));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.stats.scheduled += 1;
        inner
            .queues
            .entry(window)
            .or_default()
            .entries
            .push_back(Entry { seq, callback });
        debug!("Scheduled flip callback {} for window {}", seq, window);
        Ok(CallbackHandle { window, seq })
    }

    /// Drop every callback of the window that has not run yet
    pub fn clear(&self, window: WindowIndex) -> usize {
        let mut inner = self.inner.lock();
        let removed = match inner.queues.get_mut(&window) {
            Some(queue) => {
                let n = queue.entries.len();
                queue.entries.clear();
                n
            }
            None => 0,
        };
        inner.stats.cleared += removed as u64;
        inner.cleanup(window);
        if removed > 0 {
            debug!("Cleared {} flip callbacks of window {}", removed, window);
        }
        removed
    }

    /// Drop every pending callback of every window
    pub fn clear_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed: usize = inner.queues.values_mut().map(|q| std::mem::take(&mut q.entries).len()).sum();
        inner.queues.retain(|_, q| q.draining);
        inner.stats.cleared += removed as u64;
        removed
    }

    /// Cancel one callback; false if it already ran or was cleared
    pub fn cancel(&self, handle: CallbackHandle) -> bool {
        let mut inner = self.inner.lock();
        let Some(queue) = inner.queues.get_mut(&handle.window) else {
            return false;
        };
        let before = queue.entries.len();
        queue.entries.retain(|e| e.seq != handle.seq);
        let removed = queue.entries.len() != before;
        if removed {
            inner.stats.cleared += 1;
        }
        inner.cleanup(handle.window);
        removed
    }

    pub fn state(&self, window: WindowIndex) -> FlipState {
        let inner = self.inner.lock();
        match inner.queues.get(&window) {
            Some(q) if q.draining => FlipState::Draining,
            Some(q) if !q.entries.is_empty() => FlipState::Armed,
            _ => FlipState::Idle,
        }
    }

    pub fn pending(&self, window: WindowIndex) -> usize {
        self.inner.lock().queues.get(&window).map_or(0, |q| q.entries.len())
    }

    pub fn stats(&self) -> FlipStats {
        self.inner.lock().stats.clone()
    }

    /// Run the callbacks that were queued for `window` before this swap.
    ///
    /// Returns how many were invoked.
    pub fn on_swap(&self, window: WindowIndex, info: &FlipInfo) -> usize {
        let cutoff = {
            let mut inner = self.inner.lock();
            let next_seq = inner.next_seq;
            match inner.queues.get_mut(&window) {
                Some(queue) if !queue.entries.is_empty() && !queue.draining => {
                    queue.draining = true;
                    next_seq
                }
                _ => return 0,
            }
        };
        let _guard = DrainGuard {
            inner: &self.inner,
            window,
        };

        let mut invoked = 0;
        loop {
            let entry = {
                let mut inner = self.inner.lock();
                let next = inner
                    .queues
                    .get_mut(&window)
                    .filter(|q| q.entries.front().is_some_and(|e| e.seq < cutoff))
                    .and_then(|q| q.entries.pop_front());
                if next.is_some() {
                    inner.stats.invoked += 1;
                }
                next
            };
            let Some(entry) = entry else {
                break;
            };

            invoked += 1;
            if let Err(e) = (entry.callback)(info) {
                self.inner.lock().stats.failed += 1;
                error!("Flip callback {} of window {} failed: {:#}", entry.seq, window, e);
            }
        }

        debug!("Ran {} flip callbacks for window {}", invoked, window);
        invoked
    }
}
