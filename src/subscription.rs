//! Subscription handles and the host-driven timer scheduler
//!
//! Every listener and timer the tracker registers is represented by a
//! [`Subscription`] holding a live flag captured at registration time.
//! Cancelling flips the flag exactly once; dropping a handle cancels it. The
//! [`Scheduler`] only hands out timers whose flag is still live and whose
//! epoch matches the current one, so a callback that was already due when its
//! handle died is never delivered.

use crate::schema::SignalChannel;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellable handle for a timer or listener
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    live: Arc<AtomicBool>,
}

impl Subscription {
    fn new(id: u64) -> (Self, Arc<AtomicBool>) {
        let live = Arc::new(AtomicBool::new(true));
        (
            Self {
                id,
                live: Arc::clone(&live),
            },
            live,
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Cancel the subscription. Returns `true` only for the call that actually
    /// cancelled it; later calls are no-ops.
    pub fn cancel(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Threshold evaluator tick
    Poll,
    /// Exit-intent safety net; carries the arbiter generation at registration
    DwellTimeout { generation: u64 },
    /// End of the top-edge grace period; carries the arbiter generation
    TopEdgeGrace { generation: u64 },
}

/// A timer handed back by [`Scheduler::next_due`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: u64,
    pub kind: TimerKind,
    pub due: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingTimer {
    id: u64,
    kind: TimerKind,
    due: DateTime<Utc>,
    period: Option<Duration>,
    epoch: u64,
    live: Arc<AtomicBool>,
}

impl PendingTimer {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// When this timer runs if the host clock reads `now`. A repeating timer
    /// that fell behind runs once, at its latest period boundary not after
    /// `now`.
    fn effective_due(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.period {
            Some(period) if self.due < now => {
                let step = period.num_milliseconds().max(1);
                let behind = (now - self.due).num_milliseconds() / step;
                self.due + Duration::milliseconds(behind * step)
            }
            _ => self.due,
        }
    }
}

/// Deterministic timer queue advanced by the host clock
#[derive(Debug, Default)]
pub struct Scheduler {
    next_id: u64,
    epoch: u64,
    timers: Vec<PendingTimer>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch; bumped by [`Scheduler::cancel_all`]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Register a one-shot timer
    pub fn schedule_once(&mut self, kind: TimerKind, due: DateTime<Utc>) -> Subscription {
        self.schedule(kind, due, None)
    }

    /// Register a repeating timer; the first firing is at `first_due`
    pub fn schedule_repeating(
        &mut self,
        kind: TimerKind,
        first_due: DateTime<Utc>,
        period: Duration,
    ) -> Subscription {
        self.schedule(kind, first_due, Some(period))
    }

    fn schedule(
        &mut self,
        kind: TimerKind,
        due: DateTime<Utc>,
        period: Option<Duration>,
    ) -> Subscription {
        self.next_id += 1;
        let (subscription, live) = Subscription::new(self.next_id);
        self.timers.push(PendingTimer {
            id: self.next_id,
            kind,
            due,
            period,
            epoch: self.epoch,
            live,
        });
        subscription
    }

    /// Pop the earliest live timer due at or before `now`.
    ///
    /// Timers are ordered by the time they run at, ties broken by registration
    /// order. A repeating timer is re-queued one period after the firing it
    /// reports; if the host fell behind by more than a period the missed
    /// firings are coalesced into one at the latest boundary not after `now`.
    pub fn next_due(&mut self, now: DateTime<Utc>) -> Option<FiredTimer> {
        let epoch = self.epoch;
        self.timers.retain(|t| t.epoch == epoch && t.is_live());

        let index = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= now)
            .min_by_key(|(_, t)| (t.effective_due(now), t.id))
            .map(|(i, _)| i)?;

        let timer = &self.timers[index];
        let fired = FiredTimer {
            id: timer.id,
            kind: timer.kind,
            due: timer.effective_due(now),
        };

        match timer.period.and_then(|p| fired.due.checked_add_signed(p)) {
            Some(next) => self.timers[index].due = next,
            None => {
                let timer = self.timers.swap_remove(index);
                timer.live.store(false, Ordering::Release);
            }
        }

        Some(fired)
    }

    /// Cancel every pending timer and move to a new epoch. Returns how many
    /// live timers were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        self.epoch += 1;
        self.timers
            .drain(..)
            .filter(|t| t.live.swap(false, Ordering::AcqRel))
            .count()
    }

    /// Number of live timers in the current epoch
    pub fn pending(&self) -> usize {
        self.timers
            .iter()
            .filter(|t| t.epoch == self.epoch && t.is_live())
            .count()
    }
}

/// Listener registrations, one per signal channel the host provides
#[derive(Debug, Default)]
pub struct SignalSubscriptions {
    next_id: u64,
    channels: HashMap<SignalChannel, Subscription>,
}

impl SignalSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `channel`, replacing (and cancelling) any previous listener
    pub fn subscribe(&mut self, channel: SignalChannel) {
        self.next_id += 1;
        let (subscription, _) = Subscription::new(self.next_id);
        self.channels.insert(channel, subscription);
    }

    pub fn is_subscribed(&self, channel: SignalChannel) -> bool {
        self.channels
            .get(&channel)
            .map(Subscription::is_live)
            .unwrap_or(false)
    }

    /// Cancel every listener; returns how many were live
    pub fn cancel_all(&mut self) -> usize {
        self.channels
            .drain()
            .filter(|(_, subscription)| subscription.cancel())
            .count()
    }

    pub fn active(&self) -> usize {
        self.channels.values().filter(|s| s.is_live()).count()
    }
}
