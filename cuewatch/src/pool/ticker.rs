//! Per-tree update heartbeat.
//!
//! Every monitor tree owns a [`TickScheduler`] advanced once per second by
//! the event loop's 1 Hz crossbeam tick channel. The scheduler decides,
//! per tick, whether the tree should fetch a fresh snapshot, merely
//! repaint derived values (runtimes, LLUs), or do nothing.

use std::time::{Duration, Instant};

/// Seconds of scroll quiet required before an update may proceed.
pub const SCROLL_DEBOUNCE_SECS: u64 = 1;

/// Consecutive updates that scrolling may suppress before one proceeds
/// regardless.
pub const MAX_SCROLL_SKIPS: u32 = 1;

/// Forces the next tick to be eligible. Large enough to clear any interval,
/// far from the saturation point.
const FORCE_SENTINEL: u32 = u32::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Idle,
    /// Refresh derived values in running rows without refetching.
    Repaint,
    /// Interval elapsed and nothing suppresses the fetch.
    Update,
}

#[derive(Debug)]
pub struct TickScheduler {
    update_interval: u32,
    ticks_without_update: u32,
    max_update_interval: Option<u32>,
    update_when_minimized: bool,
    total_ticks: u64,
    last_scroll: Option<Instant>,
    scroll_skips: u32,
    pending: bool,
}

impl TickScheduler {
    pub fn new(update_interval: u32) -> TickScheduler {
        TickScheduler {
            update_interval,
            ticks_without_update: 0,
            max_update_interval: None,
            update_when_minimized: false,
            total_ticks: 0,
            last_scroll: None,
            scroll_skips: 0,
            pending: false,
        }
    }

    /// Allow updates while minimized once this many ticks have accumulated.
    pub fn with_minimized_cap(mut self, max_update_interval: u32) -> TickScheduler {
        self.max_update_interval = Some(max_update_interval);
        self
    }

    pub fn update_when_minimized(mut self, yes: bool) -> TickScheduler {
        self.update_when_minimized = yes;
        self
    }

    /// Advance one second and report what the tree should do.
    pub fn tick(&mut self, minimized: bool) -> TickAction {
        self.total_ticks += 1;
        self.ticks_without_update = self.ticks_without_update.saturating_add(1);

        if self.ticks_without_update < self.update_interval {
            return self.idle_action();
        }

        if minimized && !self.update_when_minimized {
            let past_cap = self
                .max_update_interval
                .map(|cap| self.ticks_without_update >= cap)
                .unwrap_or(false);
            if !past_cap {
                return self.idle_action();
            }
        }

        if self.pending {
            // A fetch is already in flight. If it has been silent for two
            // full intervals the worker lost it; let the next one through.
            if self.ticks_without_update >= self.update_interval.saturating_mul(2) {
                self.pending = false;
            }
            return self.idle_action();
        }

        if let Some(at) = self.last_scroll {
            if at.elapsed() < Duration::from_secs(SCROLL_DEBOUNCE_SECS)
                && self.scroll_skips < MAX_SCROLL_SKIPS
            {
                self.scroll_skips += 1;
                return self.idle_action();
            }
        }
        self.scroll_skips = 0;
        TickAction::Update
    }

    fn idle_action(&self) -> TickAction {
        if self.total_ticks % 2 == 0 {
            TickAction::Repaint
        } else {
            TickAction::Idle
        }
    }

    /// The tree enqueued a fetch; hold further updates until it lands.
    pub fn fetch_started(&mut self) {
        self.pending = true;
    }

    /// A snapshot merged; restart the interval.
    pub fn updated(&mut self) {
        self.ticks_without_update = 0;
        self.pending = false;
    }

    /// Make the very next tick eligible (after-action refresh, filter edit).
    pub fn force_next(&mut self) {
        self.ticks_without_update = FORCE_SENTINEL;
    }

    /// Record a vertical scrollbar change.
    pub fn note_scroll(&mut self) {
        self.last_scroll = Some(Instant::now());
    }

    /// Apply a configured interval (seconds).
    pub fn set_interval(&mut self, update_interval: u32) {
        self.update_interval = update_interval.max(1);
    }

    pub fn ticks_without_update(&self) -> u32 {
        self.ticks_without_update
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Reset all accumulated suppression state (clear-filters path).
    pub fn clear(&mut self) {
        self.ticks_without_update = 0;
        self.last_scroll = None;
        self.scroll_skips = 0;
        self.pending = false;
    }
}
