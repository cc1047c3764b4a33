//! Event-flag coordinator.
//!
//! A process-wide 32-bit flag register shared by every task.  Tasks either
//! block in [`EventCoordinator::wait`] on a subset of bits, or subscribe a
//! [`TaskNotifier`] that is poked whenever a bit they care about is set or
//! cleared.
//!
//! ```text
//! ┌─────────────┐  set/clear   ┌──────────────────┐  notify   ┌──────────────┐
//! │ Scheduler   │─────────────▶│                  │──────────▶│ display task │
//! │ BLE / cloud │─────────────▶│ EventCoordinator │──────────▶│ main task    │
//! │ Measurement │─────────────▶│  bits + subs     │           └──────────────┘
//! │ Feeding     │─────────────▶│                  │  wait()   ┌──────────────┐
//! └─────────────┘              └──────────────────┘◀──────────│ worker tasks │
//!                                                             └──────────────┘
//! ```
//!
//! Notification happens on *every* set/clear call whose bits intersect a
//! subscriber's mask, not only on edges.  Redundant wakeups are cheap; a
//! missed one would stall a task until its next timeout.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, warn};

/// Subscription table capacity.
pub const MAX_SUBSCRIPTIONS: usize = 8;

// ═══════════════════════════════════════════════════════════════
//  Flag set
// ═══════════════════════════════════════════════════════════════

/// A set of named event bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventFlags(u32);

impl EventFlags {
    pub const NONE: Self = Self(0);

    // ── Configuration / provisioning ──────────────────────────
    pub const CONFIG_BUTTON: Self = Self(1 << 0);
    pub const CONFIG_MODE: Self = Self(1 << 1);
    pub const PASSKEY_DISPLAY: Self = Self(1 << 2);
    pub const PROVISION_TRIGGER: Self = Self(1 << 3);
    pub const WIFI_CONFIG_SAVED: Self = Self(1 << 4);
    pub const WIFI_CLEARED: Self = Self(1 << 5);

    // ── Connectivity ──────────────────────────────────────────
    pub const WIFI_UP: Self = Self(1 << 6);
    pub const MQTT_UP: Self = Self(1 << 7);
    pub const SHADOW_SYNCED: Self = Self(1 << 8);
    pub const SYNC_SCHEDULED: Self = Self(1 << 9);

    // ── Display navigation ────────────────────────────────────
    pub const DISPLAY_NEXT: Self = Self(1 << 10);
    pub const DISPLAY_PREV: Self = Self(1 << 11);
    pub const DISPLAY_CONFIRM: Self = Self(1 << 12);

    // ── Work items ────────────────────────────────────────────
    pub const FEED_SCHEDULED: Self = Self(1 << 13);
    pub const FEED_UPDATED: Self = Self(1 << 14);
    pub const TEMP_SCHEDULED: Self = Self(1 << 15);
    pub const TEMP_UPDATED: Self = Self(1 << 16);
    pub const PH_SCHEDULED: Self = Self(1 << 17);
    pub const PH_UPDATED: Self = Self(1 << 18);
    pub const PH_CONFIRMED: Self = Self(1 << 19);
    pub const THRESHOLD_ALERT: Self = Self(1 << 20);

    // ── Runtime reconfiguration ───────────────────────────────
    pub const TEMP_INTERVAL_CHANGED: Self = Self(1 << 21);
    pub const PH_INTERVAL_CHANGED: Self = Self(1 << 22);
    pub const FEED_INTERVAL_CHANGED: Self = Self(1 << 23);
    pub const PUBLISH_INTERVAL_CHANGED: Self = Self(1 << 24);

    /// Any "interval changed" bit.
    pub const INTERVALS_CHANGED: Self = Self(
        Self::TEMP_INTERVAL_CHANGED.0
            | Self::PH_INTERVAL_CHANGED.0
            | Self::FEED_INTERVAL_CHANGED.0
            | Self::PUBLISH_INTERVAL_CHANGED.0,
    );

    const NAMES: [(Self, &'static str); 25] = [
        (Self::CONFIG_BUTTON, "CONFIG_BUTTON"),
        (Self::CONFIG_MODE, "CONFIG_MODE"),
        (Self::PASSKEY_DISPLAY, "PASSKEY_DISPLAY"),
        (Self::PROVISION_TRIGGER, "PROVISION_TRIGGER"),
        (Self::WIFI_CONFIG_SAVED, "WIFI_CONFIG_SAVED"),
        (Self::WIFI_CLEARED, "WIFI_CLEARED"),
        (Self::WIFI_UP, "WIFI_UP"),
        (Self::MQTT_UP, "MQTT_UP"),
        (Self::SHADOW_SYNCED, "SHADOW_SYNCED"),
        (Self::SYNC_SCHEDULED, "SYNC_SCHEDULED"),
        (Self::DISPLAY_NEXT, "DISPLAY_NEXT"),
        (Self::DISPLAY_PREV, "DISPLAY_PREV"),
        (Self::DISPLAY_CONFIRM, "DISPLAY_CONFIRM"),
        (Self::FEED_SCHEDULED, "FEED_SCHEDULED"),
        (Self::FEED_UPDATED, "FEED_UPDATED"),
        (Self::TEMP_SCHEDULED, "TEMP_SCHEDULED"),
        (Self::TEMP_UPDATED, "TEMP_UPDATED"),
        (Self::PH_SCHEDULED, "PH_SCHEDULED"),
        (Self::PH_UPDATED, "PH_UPDATED"),
        (Self::PH_CONFIRMED, "PH_CONFIRMED"),
        (Self::THRESHOLD_ALERT, "THRESHOLD_ALERT"),
        (Self::TEMP_INTERVAL_CHANGED, "TEMP_INTERVAL_CHANGED"),
        (Self::PH_INTERVAL_CHANGED, "PH_INTERVAL_CHANGED"),
        (Self::FEED_INTERVAL_CHANGED, "FEED_INTERVAL_CHANGED"),
        (Self::PUBLISH_INTERVAL_CHANGED, "PUBLISH_INTERVAL_CHANGED"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All bits of `other` are set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl core::ops::BitOr for EventFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for EventFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl core::ops::BitAnd for EventFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl core::fmt::Debug for EventFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut rest = *self;
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                rest = rest.difference(flag);
                first = false;
            }
        }
        if !rest.is_empty() {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{:#x}", rest.0)?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Task notification
// ═══════════════════════════════════════════════════════════════

/// Overwrite-style notification slot, one per subscribed task.
///
/// Any number of `notify` calls before a `wait` collapse into a single
/// pending notification.
#[derive(Debug, Default)]
pub struct TaskNotifier {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl TaskNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.cv.notify_all();
    }

    /// Block until notified or `timeout` elapses.  Consumes the pending
    /// notification; returns `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self
            .cv
            .wait_timeout_while(pending, timeout, |p| !*p)
            .unwrap_or_else(PoisonError::into_inner);
        let notified = *pending;
        *pending = false;
        notified
    }
}

// ═══════════════════════════════════════════════════════════════
//  Coordinator
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventError {
    /// All [`MAX_SUBSCRIPTIONS`] slots are taken.
    TableFull,
}

impl core::fmt::Display for EventError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TableFull => write!(f, "subscription table full"),
        }
    }
}

struct Subscription {
    task: &'static str,
    mask: EventFlags,
    notifier: Arc<TaskNotifier>,
}

struct Inner {
    bits: EventFlags,
    subscriptions: heapless::Vec<Subscription, MAX_SUBSCRIPTIONS>,
}

/// The shared flag register.  Construct once and share through `Arc`.
pub struct EventCoordinator {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Default for EventCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                bits: EventFlags::NONE,
                subscriptions: heapless::Vec::new(),
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current bits.
    pub fn get(&self) -> EventFlags {
        self.lock().bits
    }

    /// Set `flags`; returns the bits as they were before the call.
    pub fn set(&self, flags: EventFlags) -> EventFlags {
        self.update(flags, |bits| bits | flags)
    }

    /// Clear `flags`; returns the bits as they were before the call.
    pub fn clear(&self, flags: EventFlags) -> EventFlags {
        self.update(flags, |bits| bits.difference(flags))
    }

    fn update(&self, flags: EventFlags, op: impl FnOnce(EventFlags) -> EventFlags) -> EventFlags {
        let mut to_notify: heapless::Vec<Arc<TaskNotifier>, MAX_SUBSCRIPTIONS> =
            heapless::Vec::new();
        let previous = {
            let mut inner = self.lock();
            let previous = inner.bits;
            inner.bits = op(previous);
            for sub in inner.subscriptions.iter().filter(|s| s.mask.intersects(flags)) {
                // Capacity equals the table size.
                let _ = to_notify.push(Arc::clone(&sub.notifier));
            }
            self.changed.notify_all();
            previous
        };
        for notifier in &to_notify {
            notifier.notify();
        }
        previous
    }

    /// Block until the bits in `mask` are set (all of them when
    /// `require_all`, any of them otherwise) or `timeout` elapses
    /// (`None` waits forever).
    ///
    /// Returns the observed subset of `mask`; an empty result means the
    /// wait timed out.  With `clear_on_exit` exactly the observed bits are
    /// cleared under the same lock as the observation.
    pub fn wait(
        &self,
        mask: EventFlags,
        clear_on_exit: bool,
        require_all: bool,
        timeout: Option<Duration>,
    ) -> EventFlags {
        if mask.is_empty() {
            return EventFlags::NONE;
        }
        let satisfied = |bits: EventFlags| {
            if require_all {
                bits.contains(mask)
            } else {
                bits.intersects(mask)
            }
        };
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        let mut inner = self.lock();
        loop {
            if satisfied(inner.bits) {
                let observed = inner.bits & mask;
                if clear_on_exit {
                    inner.bits = inner.bits.difference(observed);
                }
                return observed;
            }
            match (timeout, deadline) {
                (None, _) | (Some(_), None) => {
                    inner = self.changed.wait(inner).unwrap_or_else(PoisonError::into_inner);
                }
                (Some(_), Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return EventFlags::NONE;
                    }
                    inner = self
                        .changed
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Register interest of `task` in `mask`.  Subscribing an already
    /// registered task merges the masks and returns the same notifier.
    pub fn subscribe(
        &self,
        task: &'static str,
        mask: EventFlags,
    ) -> Result<Arc<TaskNotifier>, EventError> {
        let mut inner = self.lock();
        if let Some(sub) = inner.subscriptions.iter_mut().find(|s| s.task == task) {
            sub.mask |= mask;
            debug!("Events: '{task}' mask now {:?}", sub.mask);
            return Ok(Arc::clone(&sub.notifier));
        }
        let notifier = Arc::new(TaskNotifier::new());
        inner
            .subscriptions
            .push(Subscription {
                task,
                mask,
                notifier: Arc::clone(&notifier),
            })
            .map_err(|_| {
                warn!("Events: subscription table full, '{task}' not registered");
                EventError::TableFull
            })?;
        debug!("Events: '{task}' subscribed to {mask:?}");
        Ok(notifier)
    }

    /// Remove `mask` from the interest of `task`.  A task left with no
    /// bits is removed from the table.
    pub fn unsubscribe(&self, task: &'static str, mask: EventFlags) {
        let mut inner = self.lock();
        if let Some(pos) = inner.subscriptions.iter().position(|s| s.task == task) {
            let remaining = inner.subscriptions[pos].mask.difference(mask);
            if remaining.is_empty() {
                inner.subscriptions.swap_remove(pos);
                debug!("Events: '{task}' unsubscribed");
            } else {
                inner.subscriptions[pos].mask = remaining;
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscriptions.len()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
