//! Sparse block index
//!
//! Open-addressed, linear-probed map from [`BlockIndex`] to pool slot.
//! Deletion uses backward shifting instead of tombstones so probe chains
//! stay intact, and a stable insertion-order key list drives every scan
//! (meshing, eviction) for reproducible output across runs and platforms.

use tracing::debug;

use crate::constants::{HASH_INITIAL_CAPACITY, HASH_LOAD_FACTOR_MAX, HASH_MAX_PROBE};
use crate::voxel::{BlockIndex, BlockPool};
use crate::EngineError;

/// Sentinel pool index marking a vacant slot.
const EMPTY_SLOT: i32 = -1;

#[derive(Debug, Clone, Copy)]
struct Slot {
    key: BlockIndex,
    pool_index: i32,
}

impl Slot {
    const VACANT: Slot = Slot {
        key: BlockIndex::new(0, 0, 0),
        pool_index: EMPTY_SLOT,
    };

    #[inline]
    fn is_vacant(&self) -> bool {
        self.pool_index == EMPTY_SLOT
    }
}

pub struct BlockTable {
    slots: Vec<Slot>,
    count: usize,
    /// Keys in first-insertion order. Scans iterate this, never the slots.
    key_order: Vec<BlockIndex>,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::with_capacity(HASH_INITIAL_CAPACITY)
    }

    /// Capacity must be a power of two (doubling keeps it that way).
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "table capacity must be a power of two");
        Self {
            slots: vec![Slot::VACANT; capacity],
            count: 0,
            key_order: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn load_factor(&self) -> f32 {
        self.count as f32 / self.slots.len() as f32
    }

    /// Keys in stable insertion order.
    pub fn live_keys(&self) -> &[BlockIndex] {
        &self.key_order
    }

    /// Visit every live (key, pool slot) pair in stable insertion order.
    /// Scans built on this are reproducible across runs and platforms,
    /// unlike a slot-order walk.
    pub fn for_each_block<F>(&self, mut visit: F)
    where
        F: FnMut(&BlockIndex, u32),
    {
        for key in &self.key_order {
            if let Some(slot) = self.lookup(*key) {
                visit(key, slot);
            }
        }
    }

    /// Return the pool slot for `key`, allocating a fresh block with the
    /// given voxel size on first sight. Probe-bound exhaustion is reported
    /// to the caller, which may force a rehash and retry.
    pub fn insert_or_get(
        &mut self,
        key: BlockIndex,
        voxel_size: f32,
        pool: &mut BlockPool,
    ) -> Result<u32, EngineError> {
        let capacity = self.slots.len();
        let mut pos = key.home_slot(capacity);
        for _ in 0..HASH_MAX_PROBE {
            let slot = self.slots[pos];
            if slot.is_vacant() {
                let pool_index = pool
                    .allocate(voxel_size)
                    .ok_or(EngineError::PoolExhausted { capacity: pool.capacity() })?;
                self.slots[pos] = Slot { key, pool_index: pool_index as i32 };
                self.count += 1;
                self.key_order.push(key);
                return Ok(pool_index);
            }
            if slot.key == key {
                return Ok(slot.pool_index as u32);
            }
            pos = (pos + 1) % capacity;
        }
        Err(EngineError::ProbeBoundExhausted(HASH_MAX_PROBE))
    }

    /// Probe for `key`. Exhausting the probe bound is treated as a miss.
    pub fn lookup(&self, key: BlockIndex) -> Option<u32> {
        let capacity = self.slots.len();
        let mut pos = key.home_slot(capacity);
        for _ in 0..HASH_MAX_PROBE {
            let slot = self.slots[pos];
            if slot.is_vacant() {
                return None;
            }
            if slot.key == key {
                return Some(slot.pool_index as u32);
            }
            pos = (pos + 1) % capacity;
        }
        None
    }

    /// Remove `key`, freeing its pool slot. Removal of an absent key is a
    /// silent no-op. Probe chains through the vacated slot are repaired by
    /// backward shifting, so no tombstones exist.
    pub fn remove(&mut self, key: BlockIndex, pool: &mut BlockPool) {
        let capacity = self.slots.len();
        let mut pos = key.home_slot(capacity);
        let mut found = None;
        for _ in 0..HASH_MAX_PROBE {
            let slot = self.slots[pos];
            if slot.is_vacant() {
                break;
            }
            if slot.key == key {
                found = Some(pos);
                break;
            }
            pos = (pos + 1) % capacity;
        }
        let Some(mut vacated) = found else { return };

        pool.deallocate(self.slots[vacated].pool_index as u32);
        self.slots[vacated] = Slot::VACANT;
        self.count -= 1;
        if let Some(order_pos) = self.key_order.iter().position(|k| *k == key) {
            self.key_order.remove(order_pos);
        }

        // Backward shift: walk the chain after the vacancy and pull back
        // every entry whose home slot cannot reach it past the hole.
        let mut probe = (vacated + 1) % capacity;
        loop {
            let slot = self.slots[probe];
            if slot.is_vacant() {
                break;
            }
            let home = slot.key.home_slot(capacity);
            // `home` cyclically in (vacated, probe] means the entry still
            // sits on its own probe chain; leave it alone.
            let reachable = if vacated <= probe {
                vacated < home && home <= probe
            } else {
                vacated < home || home <= probe
            };
            if !reachable {
                self.slots[vacated] = slot;
                self.slots[probe] = Slot::VACANT;
                vacated = probe;
            }
            probe = (probe + 1) % capacity;
        }
    }

    /// Double the table when the load factor crosses the threshold. Only
    /// keys are remapped; pool slots are untouched, so stored indices stay
    /// valid. Returns true when a rehash happened.
    pub fn rehash_if_needed(&mut self) -> bool {
        if self.load_factor() < HASH_LOAD_FACTOR_MAX {
            return false;
        }
        self.grow();
        true
    }

    /// Unconditional doubling rehash, the remedy for probe-bound
    /// exhaustion on insertion.
    pub fn force_rehash(&mut self) {
        self.grow();
    }

    fn grow(&mut self) {
        let mut new_capacity = self.slots.len() * 2;
        loop {
            if self.try_rebuild(new_capacity) {
                debug!(
                    target: "scanfuse::volume",
                    capacity = new_capacity,
                    live = self.count,
                    "block table rehashed"
                );
                return;
            }
            // A clustered key set can still exceed the probe bound after
            // one doubling; keep doubling until placement succeeds.
            new_capacity *= 2;
        }
    }

    /// Rebuild into `new_capacity` slots, re-inserting live pairs in
    /// stable key order. Returns false if any key exceeds the probe bound.
    fn try_rebuild(&mut self, new_capacity: usize) -> bool {
        let mut new_slots = vec![Slot::VACANT; new_capacity];
        for key in &self.key_order {
            let pool_index = self
                .lookup(*key)
                .expect("stable key list desynced from slots") as i32;
            let mut pos = key.home_slot(new_capacity);
            let mut placed = false;
            for _ in 0..HASH_MAX_PROBE {
                if new_slots[pos].is_vacant() {
                    new_slots[pos] = Slot { key: *key, pool_index };
                    placed = true;
                    break;
                }
                pos = (pos + 1) % new_capacity;
            }
            if !placed {
                return false;
            }
        }
        self.slots = new_slots;
        true
    }
}

impl Default for BlockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Brute-force a key whose home slot equals `home` for `capacity`.
    fn key_with_home(capacity: usize, home: usize, salt: i32) -> BlockIndex {
        let mut x = salt;
        loop {
            let key = BlockIndex::new(x, 7, -3);
            if key.home_slot(capacity) == home {
                return key;
            }
            x += 1;
        }
    }

    #[test]
    fn test_insert_then_lookup_roundtrip() {
        let mut pool = BlockPool::new(64);
        let mut table = BlockTable::with_capacity(64);
        let key = BlockIndex::new(4, -2, 9);
        let slot = table.insert_or_get(key, 0.01, &mut pool).unwrap();
        assert_eq!(table.lookup(key), Some(slot));
        // Second insert of the same key returns the existing slot.
        assert_eq!(table.insert_or_get(key, 0.02, &mut pool).unwrap(), slot);
        assert_eq!(table.len(), 1);
        assert_eq!(pool.allocated_count(), 1);
    }

    #[test]
    fn test_lookup_missing_is_none() {
        let table = BlockTable::with_capacity(64);
        assert_eq!(table.lookup(BlockIndex::new(1, 1, 1)), None);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut pool = BlockPool::new(8);
        let mut table = BlockTable::with_capacity(64);
        table.remove(BlockIndex::new(5, 5, 5), &mut pool);
        assert_eq!(table.len(), 0);
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_backward_shift_preserves_chain() {
        // Three keys colliding on the same home slot, then remove the
        // middle one; the chain must stay intact for the tail key.
        let capacity = 64;
        let mut pool = BlockPool::new(8);
        let mut table = BlockTable::with_capacity(capacity);
        let a = key_with_home(capacity, 5, 0);
        let b = key_with_home(capacity, 5, a.x + 1);
        let c = key_with_home(capacity, 5, b.x + 1);

        let pa = table.insert_or_get(a, 0.01, &mut pool).unwrap();
        let pb = table.insert_or_get(b, 0.01, &mut pool).unwrap();
        let pc = table.insert_or_get(c, 0.01, &mut pool).unwrap();

        table.remove(b, &mut pool);

        assert_eq!(table.lookup(a), Some(pa));
        assert_eq!(table.lookup(c), Some(pc), "backward shift broke the probe chain");
        assert_eq!(table.lookup(b), None);
        assert_eq!(pool.allocated_count(), 2);
        let _ = pb;
    }

    #[test]
    fn test_backward_shift_random_churn() {
        // Deterministic pseudo-random insert/remove churn; every live key
        // must stay reachable with its original pool index.
        let mut pool = BlockPool::new(512);
        let mut table = BlockTable::with_capacity(1024);
        let mut live: Vec<(BlockIndex, u32)> = Vec::new();
        let mut seed = 0x2545_F491u32;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        };
        for round in 0..400u32 {
            let k = BlockIndex::new((next() % 97) as i32, (next() % 89) as i32, round as i32 % 11);
            if next() % 3 == 0 {
                if let Some(pos) = live.iter().position(|(key, _)| *key == k) {
                    table.remove(k, &mut pool);
                    live.remove(pos);
                }
            } else if live.iter().all(|(key, _)| *key != k) {
                let slot = table.insert_or_get(k, 0.01, &mut pool).unwrap();
                live.push((k, slot));
            }
            for (key, slot) in &live {
                assert_eq!(table.lookup(*key), Some(*slot));
            }
        }
    }

    #[test]
    fn test_rehash_preserves_pairs_and_order() {
        let mut pool = BlockPool::new(256);
        let mut table = BlockTable::with_capacity(64);
        let mut inserted = Vec::new();
        // 64 * 0.7 = 44.8, so the 45th insertion triggers a doubling.
        for i in 0..50 {
            let key = BlockIndex::new(i, -i, i * 3);
            let slot = table.insert_or_get(key, 0.01, &mut pool).unwrap();
            inserted.push((key, slot));
            table.rehash_if_needed();
        }
        assert!(table.capacity() > 64);
        for (key, slot) in &inserted {
            assert_eq!(table.lookup(*key), Some(*slot));
        }
        let order: Vec<BlockIndex> = inserted.iter().map(|(k, _)| *k).collect();
        assert_eq!(table.live_keys(), order.as_slice());
    }

    #[test]
    fn test_probe_bound_reported_then_rehash_recovers() {
        // Jam one home slot with more collisions than a tiny table can
        // absorb within the probe bound.
        let capacity = 128;
        let mut pool = BlockPool::new(256);
        let mut table = BlockTable::with_capacity(capacity);
        let mut salt = 0;
        let mut last_err = None;
        for _ in 0..129 {
            let key = key_with_home(capacity, 3, salt);
            salt = key.x + 1;
            match table.insert_or_get(key, 0.01, &mut pool) {
                Ok(_) => {}
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }
        assert!(matches!(last_err, Some(EngineError::ProbeBoundExhausted(_))));
        let before: Vec<(BlockIndex, Option<u32>)> =
            table.live_keys().iter().map(|k| (*k, table.lookup(*k))).collect();
        table.force_rehash();
        for (key, slot) in before {
            assert_eq!(table.lookup(key), slot);
        }
    }
}
