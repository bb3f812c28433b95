//! Call-lifecycle deadlines.
//!
//! Four cancellable deadlines per session. The idle pair is rearmed as a unit
//! on every telephony inbound event; the max-duration pair is armed once at
//! negotiation start and never rearmed. Firings are delivered as events on
//! the session queue, stamped with the arming epoch so a firing that raced a
//! rearm can be recognized as stale.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::SessionEvent;
use crate::config::TimerConfig;

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Agent should check in on a quiet caller
    IdleWarning,
    /// Caller has been quiet too long; hang up
    IdleHangup,
    /// Agent should start wrapping up
    MaxDurationWarning,
    /// Call hit its hard ceiling; hang up
    MaxDurationHangup,
}

impl TimerKind {
    /// Whether this deadline belongs to the rearmable idle pair.
    pub fn is_idle(&self) -> bool {
        matches!(self, TimerKind::IdleWarning | TimerKind::IdleHangup)
    }
}

/// A deadline firing, stamped with the epoch it was armed under.
#[derive(Debug, Clone, Copy)]
pub struct TimerFire {
    /// Which deadline fired
    pub kind: TimerKind,
    /// Idle-pair arming epoch at spawn time
    pub epoch: u64,
}

/// The four deadlines of one call session.
pub struct TimerSet {
    tx: mpsc::Sender<SessionEvent>,
    idle_warning: Duration,
    idle_hangup: Duration,
    max_warning: Duration,
    max_hangup: Duration,
    epoch: u64,
    idle_handles: Vec<JoinHandle<()>>,
    max_handles: Vec<JoinHandle<()>>,
    armed: bool,
}

impl TimerSet {
    /// Build an unarmed timer set delivering firings on `tx`.
    ///
    /// The idle hangup deadline is measured beyond the warning: the hangup
    /// task sleeps `idle_warning_ms + idle_hangup_ms` from the same instant.
    pub fn new(config: &TimerConfig, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            tx,
            idle_warning: Duration::from_millis(config.idle_warning_ms),
            idle_hangup: Duration::from_millis(config.idle_warning_ms + config.idle_hangup_ms),
            max_warning: Duration::from_millis(config.max_call_warning_ms),
            max_hangup: Duration::from_millis(config.max_call_ms),
            epoch: 0,
            idle_handles: Vec::new(),
            max_handles: Vec::new(),
            armed: false,
        }
    }

    /// Arm all four deadlines. Called once, at negotiation start.
    pub fn arm(&mut self) {
        if self.armed {
            return;
        }
        self.armed = true;
        self.max_handles = vec![
            self.spawn(TimerKind::MaxDurationWarning, self.max_warning),
            self.spawn(TimerKind::MaxDurationHangup, self.max_hangup),
        ];
        self.spawn_idle_pair();
    }

    /// Cancel and reschedule both idle deadlines from "now".
    ///
    /// The epoch bump makes any already-queued idle firing stale.
    pub fn reset_idle(&mut self) {
        if !self.armed {
            return;
        }
        self.epoch += 1;
        for handle in self.idle_handles.drain(..) {
            handle.abort();
        }
        self.spawn_idle_pair();
    }

    /// Cancel all four deadlines.
    pub fn cancel_all(&mut self) {
        for handle in self.idle_handles.drain(..) {
            handle.abort();
        }
        for handle in self.max_handles.drain(..) {
            handle.abort();
        }
    }

    /// Whether a firing is still current. Max-duration deadlines are never
    /// rearmed, so they are always current while armed.
    pub fn is_current(&self, fire: &TimerFire) -> bool {
        if fire.kind.is_idle() {
            fire.epoch == self.epoch
        } else {
            true
        }
    }

    fn spawn_idle_pair(&mut self) {
        self.idle_handles = vec![
            self.spawn(TimerKind::IdleWarning, self.idle_warning),
            self.spawn(TimerKind::IdleHangup, self.idle_hangup),
        ];
    }

    fn spawn(&self, kind: TimerKind, delay: Duration) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionEvent::Timer(TimerFire { kind, epoch })).await;
        })
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
