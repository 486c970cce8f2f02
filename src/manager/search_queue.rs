//! Sequential remote device search queue with per-device retry credits.

use crate::devices::DeviceId;
use std::collections::{HashMap, VecDeque};

/// What happened to a device whose search attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put back at the tail with this many tries left
    Requeued { remaining: u32 },
    /// Out of tries
    Exhausted,
}

/// FIFO of devices waiting to be searched plus the single device currently
/// being searched for.
///
/// Remaining tries are tracked from enqueue until the device is forgotten,
/// including while it is the current search.
#[derive(Debug, Default)]
pub struct SearchQueue {
    queue: VecDeque<DeviceId>,
    tries: HashMap<DeviceId, u32>,
    current: Option<DeviceId>,
}

impl SearchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a device with the given number of attempts.
    ///
    /// A device that is already known keeps its place and its credits.
    pub fn enqueue(&mut self, device_id: DeviceId, tries: u32) -> bool {
        if self.tries.contains_key(&device_id) {
            return false;
        }
        self.tries.insert(device_id, tries.max(1));
        self.queue.push_back(device_id);
        true
    }

    /// Pop the head and make it the current search.
    pub fn pop_next(&mut self) -> Option<DeviceId> {
        let next = self.queue.pop_front();
        self.current = next;
        next
    }

    pub fn current(&self) -> Option<DeviceId> {
        self.current
    }

    pub fn is_current(&self, device_id: DeviceId) -> bool {
        self.current == Some(device_id)
    }

    /// An attempt for `device_id` failed.
    ///
    /// With at most one try left the device is forgotten; otherwise it loses
    /// one credit and goes to the tail.
    pub fn record_failure(&mut self, device_id: DeviceId) -> RetryDecision {
        if self.is_current(device_id) {
            self.current = None;
        }
        self.queue.retain(|id| *id != device_id);

        let remaining = self.tries.get(&device_id).copied().unwrap_or(0);
        if remaining <= 1 {
            self.tries.remove(&device_id);
            return RetryDecision::Exhausted;
        }

        let remaining = remaining - 1;
        self.tries.insert(device_id, remaining);
        self.queue.push_back(device_id);
        RetryDecision::Requeued { remaining }
    }

    /// Drop every trace of a device. Returns true if it was the current search.
    pub fn forget(&mut self, device_id: DeviceId) -> bool {
        self.queue.retain(|id| *id != device_id);
        self.tries.remove(&device_id);
        if self.is_current(device_id) {
            self.current = None;
            true
        } else {
            false
        }
    }

    /// Whether the device is waiting or currently searched.
    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.tries.contains_key(&device_id) || self.is_current(device_id)
    }

    pub fn remaining_tries(&self, device_id: DeviceId) -> Option<u32> {
        self.tries.get(&device_id).copied()
    }

    /// Devices waiting behind the current search, in order.
    pub fn pending(&self) -> Vec<DeviceId> {
        self.queue.iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.tries.clear();
        self.current = None;
    }
}
