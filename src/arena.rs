//! Fixed-capacity record storage.
//!
//! Every record kind lives in an [`Arena`]: a slab of recyclable slots with a
//! free list and a per-slot generation, so a stale [`ArenaKey`] can never
//! reach a record that reused its slot. [`Table`] pairs an arena with an
//! ordered key index for keyed and range lookups.

use std::collections::BTreeMap;
use std::ops::RangeBounds;
use thiserror::Error;

/// Generation-checked handle into an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaKey {
    index: u32,
    generation: u32,
}

impl ArenaKey {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Errors surfaced by arena allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("arena exhausted at capacity {capacity}")]
    Exhausted { capacity: usize },
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

impl<T> Slot<T> {
    fn generation(&self) -> u32 {
        match self {
            Slot::Occupied { generation, .. } | Slot::Vacant { generation } => *generation,
        }
    }
}

/// Slab of records with a free list and bounded capacity.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    capacity: usize,
    recycled: u64,
}

impl<T> Arena<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            capacity: capacity.min(u32::MAX as usize),
            recycled: 0,
        }
    }

    /// Stores `value`, reusing a freed slot when one is available.
    pub fn insert(&mut self, value: T) -> Result<ArenaKey, ArenaError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            let generation = slot.generation().wrapping_add(1);
            *slot = Slot::Occupied { generation, value };
            self.len += 1;
            self.recycled = self.recycled.saturating_add(1);
            return Ok(ArenaKey { index, generation });
        }
        if self.slots.len() >= self.capacity {
            return Err(ArenaError::Exhausted {
                capacity: self.capacity,
            });
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        self.len += 1;
        Ok(ArenaKey {
            index,
            generation: 0,
        })
    }

    pub fn get(&self, key: ArenaKey) -> Option<&T> {
        match self.slots.get(key.index as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: ArenaKey) -> Option<&mut T> {
        match self.slots.get_mut(key.index as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Frees the slot behind `key`; stale keys return `None`.
    pub fn remove(&mut self, key: ArenaKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if !matches!(slot, Slot::Occupied { generation, .. } if *generation == key.generation) {
            return None;
        }
        let vacated = std::mem::replace(
            slot,
            Slot::Vacant {
                generation: key.generation,
            },
        );
        self.free.push(key.index);
        self.len -= 1;
        match vacated {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots still available before the arena is exhausted.
    pub fn headroom(&self) -> usize {
        self.capacity.saturating_sub(self.len)
    }

    /// Number of inserts that were served from the free list.
    pub fn recycled(&self) -> u64 {
        self.recycled
    }
}

/// Arena plus an ordered index from `K` to the record's slot.
pub struct Table<K: Ord + Clone, T> {
    arena: Arena<T>,
    index: BTreeMap<K, ArenaKey>,
}

impl<K: Ord + Clone, T> Table<K, T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            arena: Arena::new(capacity),
            index: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&T> {
        self.index.get(key).and_then(|slot| self.arena.get(*slot))
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut T> {
        let slot = *self.index.get(key)?;
        self.arena.get_mut(slot)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Inserts or replaces the record under `key`, returning the previous one.
    pub fn insert(&mut self, key: K, value: T) -> Result<Option<T>, ArenaError> {
        if let Some(existing) = self.get_mut(&key) {
            return Ok(Some(std::mem::replace(existing, value)));
        }
        let slot = self.arena.insert(value)?;
        self.index.insert(key, slot);
        Ok(None)
    }

    /// Returns the record under `key`, creating it with `seed` when absent.
    pub fn get_or_insert_with<F>(&mut self, key: K, seed: F) -> Result<&mut T, ArenaError>
    where
        F: FnOnce() -> T,
    {
        let existing = self.index.get(&key).copied();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let slot = self.arena.insert(seed())?;
                self.index.insert(key, slot);
                slot
            }
        };
        let capacity = self.arena.capacity();
        self.arena
            .get_mut(slot)
            .ok_or(ArenaError::Exhausted { capacity })
    }

    pub fn remove(&mut self, key: &K) -> Option<T> {
        let slot = self.index.remove(key)?;
        self.arena.remove(slot)
    }

    /// Ordered scan of the records whose keys fall inside `range`.
    pub fn range<R>(&self, range: R) -> impl Iterator<Item = (&K, &T)> + '_
    where
        R: RangeBounds<K>,
    {
        self.index
            .range(range)
            .filter_map(|(key, slot)| self.arena.get(*slot).map(|value| (key, value)))
    }

    /// Keys inside `range`, collected so the caller may mutate afterwards.
    pub fn keys_in<R>(&self, range: R) -> Vec<K>
    where
        R: RangeBounds<K>,
    {
        self.index.range(range).map(|(key, _)| key.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &T)> + '_ {
        self.range(..)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Slots still free in the backing arena.
    pub fn headroom(&self) -> usize {
        self.arena.headroom()
    }

    pub fn recycled(&self) -> u64 {
        self.arena.recycled()
    }
}
