//! Hashed timing wheel with O(1) schedule/cancel and bounded per-tick work.
//!
//! Single level, power-of-two slots. A timer whose deadline is more than one
//! lap away simply stays in its slot until the cursor comes round with the
//! deadline due, so delays are not capped by the slot count.

use core::num::NonZeroUsize;

use thiserror::Error;

use super::slab::{Slab, SlabIndex};
use super::tick::{TickInstant, TickSpan};

/// Errors from scheduling on the wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WheelError {
    /// Every slab entry is occupied.
    #[error("timer wheel is at capacity ({capacity} timers)")]
    Capacity { capacity: usize },
}

/// Handle to a scheduled timer. Goes stale once the timer fires or is cancelled.
pub struct TimerHandle<T> {
    idx: SlabIndex<T>,
    generation: u32,
}

impl<T> Copy for TimerHandle<T> {}

impl<T> Clone for TimerHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for TimerHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx && self.generation == other.generation
    }
}

impl<T> Eq for TimerHandle<T> {}

impl<T> core::fmt::Debug for TimerHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("idx", &self.idx)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Witness for a power-of-two slot count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerOfTwo(usize);

impl PowerOfTwo {
    #[must_use]
    pub const fn new(val: usize) -> Option<Self> {
        if val.is_power_of_two() {
            Some(Self(val))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// Hashed timing wheel.
pub struct Wheel<T> {
    slots: Vec<Option<SlabIndex<T>>>,
    slab: Slab<T>,
    mask: usize,
    cursor: TickInstant,
}

impl<T> Wheel<T> {
    #[must_use]
    pub fn new(slots: PowerOfTwo, capacity: NonZeroUsize) -> Self {
        Self {
            slots: vec![None; slots.get()],
            slab: Slab::with_capacity(capacity),
            mask: slots.get() - 1,
            cursor: TickInstant::default(),
        }
    }

    /// Number of pending timers.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.slab.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    /// Earliest deadline among pending timers. Walks every slot; only used
    /// when the caller is about to sleep.
    #[must_use]
    pub fn next_deadline(&self) -> Option<TickInstant> {
        let mut earliest: Option<TickInstant> = None;
        for head in &self.slots {
            let mut cur = *head;
            while let Some(idx) = cur {
                let Some(node) = self.slab.get(idx) else { break };
                earliest = Some(earliest.map_or(node.deadline, |e| e.min(node.deadline)));
                cur = node.next;
            }
        }
        earliest
    }

    /// Schedules `payload` to fire `delay` ticks after `now`.
    ///
    /// Deadlines are taken relative to the later of `now` and the cursor, plus
    /// one: a zero delay fires on the next tick, never the current one.
    pub fn schedule(
        &mut self,
        now: TickInstant,
        delay: TickSpan,
        payload: T,
    ) -> Result<TimerHandle<T>, WheelError> {
        let base = now.max(self.cursor);
        let deadline = base + TickSpan::new(1) + delay;
        let (idx, generation) =
            self.slab
                .insert(payload, deadline)
                .ok_or(WheelError::Capacity {
                    capacity: self.slab.capacity(),
                })?;

        let slot = self.slot_of(deadline);
        let head = self.slots[slot];
        if let Some(node) = self.slab.get_mut(idx) {
            node.next = head;
        }
        if let Some(head_node) = head.and_then(|h| self.slab.get_mut(h)) {
            head_node.prev = Some(idx);
        }
        self.slots[slot] = Some(idx);

        Ok(TimerHandle { idx, generation })
    }

    /// Cancels a pending timer and returns its payload; `None` for stale handles.
    pub fn cancel(&mut self, handle: TimerHandle<T>) -> Option<T> {
        let node = self.slab.get(handle.idx)?;
        if node.generation != handle.generation {
            return None;
        }
        let (prev, next, deadline) = (node.prev, node.next, node.deadline);
        self.unlink(handle.idx, prev, next, deadline);
        self.slab.remove(handle.idx)
    }

    /// Advances to `now`, handing every due timer to `on_fire`.
    ///
    /// Visits at most one full lap of slots regardless of how far `now` is
    /// ahead of the cursor: a lap touches every slot, and every due node in a
    /// touched slot fires.
    pub fn tick(&mut self, now: TickInstant, mut on_fire: impl FnMut(TimerHandle<T>, T)) {
        if now <= self.cursor {
            return;
        }
        let lap = self.slots.len() as u64;
        let steps = now.since(self.cursor).get().min(lap);
        let first = now.get() - steps + 1;

        for tick in first..=now.get() {
            let slot = self.slot_of(TickInstant::new(tick));
            let mut cur = self.slots[slot];
            while let Some(idx) = cur {
                let Some(node) = self.slab.get(idx) else { break };
                cur = node.next;
                if node.deadline > now {
                    continue;
                }
                let (prev, next, deadline, generation) =
                    (node.prev, node.next, node.deadline, node.generation);
                self.unlink(idx, prev, next, deadline);
                if let Some(payload) = self.slab.remove(idx) {
                    on_fire(TimerHandle { idx, generation }, payload);
                }
            }
        }
        self.cursor = now;
    }

    #[inline]
    fn slot_of(&self, deadline: TickInstant) -> usize {
        // Truncation is the hash: only the low bits select the slot.
        #[allow(clippy::cast_possible_truncation)]
        let raw = deadline.get() as usize;
        raw & self.mask
    }

    fn unlink(
        &mut self,
        idx: SlabIndex<T>,
        prev: Option<SlabIndex<T>>,
        next: Option<SlabIndex<T>>,
        deadline: TickInstant,
    ) {
        match prev.and_then(|p| self.slab.get_mut(p)) {
            Some(prev_node) => prev_node.next = next,
            None => {
                let slot = self.slot_of(deadline);
                if self.slots[slot] == Some(idx) {
                    self.slots[slot] = next;
                }
            }
        }
        if let Some(next_node) = next.and_then(|n| self.slab.get_mut(n)) {
            next_node.prev = prev;
        }
    }
}
