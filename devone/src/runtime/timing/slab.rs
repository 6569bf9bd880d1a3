//! Fixed-capacity generational slab backing the timer nodes.
//!
//! Capacity is decided once at construction; the timer service sizes it from
//! the device's session limit so that a full slab means "too many sessions",
//! never "lost timer".

use core::marker::PhantomData;
use core::num::NonZeroUsize;

use super::tick::TickInstant;

/// Index into a [`Slab`]; typed by payload so indices cannot cross slabs of different kinds.
pub struct SlabIndex<T>(u32, PhantomData<fn() -> T>);

// Manual impls: derives would demand the same traits from `T`.
impl<T> Copy for SlabIndex<T> {}

impl<T> Clone for SlabIndex<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for SlabIndex<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for SlabIndex<T> {}

impl<T> core::fmt::Debug for SlabIndex<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SlabIndex({})", self.0)
    }
}

impl<T> SlabIndex<T> {
    const fn new(raw: u32) -> Self {
        Self(raw, PhantomData)
    }

    #[inline]
    const fn slot(self) -> usize {
        self.0 as usize
    }
}

/// An occupied timer node.
pub struct Node<T> {
    pub payload: T,
    pub generation: u32,
    pub next: Option<SlabIndex<T>>,
    pub prev: Option<SlabIndex<T>>,
    pub deadline: TickInstant,
}

enum Entry<T> {
    Occupied(Node<T>),
    Free {
        next: Option<SlabIndex<T>>,
        generation: u32,
    },
}

/// Slab with an intrusive free list threaded through the vacant entries.
pub struct Slab<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<SlabIndex<T>>,
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a slab with every entry vacant.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds `u32::MAX`.
    #[must_use]
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        let cap = u32::try_from(capacity.get()).expect("slab capacity fits in u32");
        let entries = (0..cap)
            .map(|i| Entry::Free {
                next: (i + 1 < cap).then(|| SlabIndex::new(i + 1)),
                generation: 0,
            })
            .collect();
        Self {
            entries,
            free_head: Some(SlabIndex::new(0)),
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of occupied entries.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Takes a vacant entry; `None` when the slab is full.
    pub fn insert(&mut self, payload: T, deadline: TickInstant) -> Option<(SlabIndex<T>, u32)> {
        let idx = self.free_head?;
        let Entry::Free { next, generation } = self.entries[idx.slot()] else {
            unreachable!("free list points at an occupied entry");
        };
        self.free_head = next;
        self.entries[idx.slot()] = Entry::Occupied(Node {
            payload,
            generation,
            next: None,
            prev: None,
            deadline,
        });
        self.len += 1;
        Some((idx, generation))
    }

    /// Vacates an entry and hands back its payload. Bumps the generation so
    /// outstanding handles to this entry go stale.
    pub fn remove(&mut self, idx: SlabIndex<T>) -> Option<T> {
        let entry = self.entries.get_mut(idx.slot())?;
        let generation = match entry {
            Entry::Occupied(node) => node.generation,
            Entry::Free { .. } => return None,
        };
        let vacated = core::mem::replace(
            entry,
            Entry::Free {
                next: self.free_head,
                generation: generation.wrapping_add(1),
            },
        );
        self.free_head = Some(idx);
        self.len -= 1;
        match vacated {
            Entry::Occupied(node) => Some(node.payload),
            Entry::Free { .. } => None,
        }
    }

    #[must_use]
    pub fn get(&self, idx: SlabIndex<T>) -> Option<&Node<T>> {
        match self.entries.get(idx.slot())? {
            Entry::Occupied(node) => Some(node),
            Entry::Free { .. } => None,
        }
    }

    pub fn get_mut(&mut self, idx: SlabIndex<T>) -> Option<&mut Node<T>> {
        match self.entries.get_mut(idx.slot())? {
            Entry::Occupied(node) => Some(node),
            Entry::Free { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slab(cap: usize) -> Slab<&'static str> {
        Slab::with_capacity(NonZeroUsize::new(cap).unwrap())
    }

    #[test]
    fn fills_to_capacity_then_refuses() {
        let mut s = slab(2);
        assert!(s.insert("a", TickInstant::new(1)).is_some());
        assert!(s.insert("b", TickInstant::new(1)).is_some());
        assert!(s.insert("c", TickInstant::new(1)).is_none());
        assert_eq!(s.len(), 2);
        assert_eq!(s.capacity(), 2);
    }

    #[test]
    fn removal_recycles_entry_with_new_generation() {
        let mut s = slab(1);
        let (idx, generation) = s.insert("a", TickInstant::new(3)).unwrap();
        assert_eq!(s.get(idx).map(|n| n.deadline), Some(TickInstant::new(3)));
        assert_eq!(s.remove(idx), Some("a"));
        assert!(s.is_empty());
        assert_eq!(s.remove(idx), None, "double remove is a no-op");

        let (again, next_generation) = s.insert("b", TickInstant::new(4)).unwrap();
        assert_eq!(again, idx);
        assert_ne!(generation, next_generation);
    }
}
