//! Open-addressed hash table using Robin Hood probing.
//!
//! Ported from `hashmap.c` (the home bucket / PSL / backward-shift-on-delete
//! invariants are identical); scratch slots live on the stack here instead of
//! inside the struct, and buckets are keyed directly by `K` rather than by an
//! indirection through a stored pointer.

use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

const MIN_CAPACITY: usize = 16;
const HASH_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

struct Bucket<K, V> {
    hash: u64,
    /// Probe sequence length. 0 means the bucket is empty; 1 means the
    /// entry sits in its home bucket.
    psl: u32,
    entry: Option<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    const fn empty() -> Self {
        Self { hash: 0, psl: 0, entry: None }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.psl == 0
    }
}

/// Robin Hood open-addressed hash map, generic over any `K: Hash + Eq`.
///
/// Load factor is kept in (0, 0.75]; it grows by doubling when it would
/// cross that ceiling and optionally shrinks by halving after a delete
/// drops it to <= 0.10, as long as capacity stays above the configured
/// minimum.
pub struct HashMap<K, V> {
    buckets: Vec<Bucket<K, V>>,
    mask: usize,
    count: usize,
    min_capacity: usize,
    oom: bool,
}

impl<K: Hash + Eq, V> HashMap<K, V> {
    /// `min_capacity` is rounded up to the next power of two with a floor of
    /// 16, matching `hashmap_new`'s `cap` parameter.
    pub fn with_capacity(min_capacity: usize) -> Self {
        let cap = min_capacity.max(MIN_CAPACITY).next_power_of_two();
        let mut buckets = Vec::new();
        buckets.resize_with(cap, Bucket::empty);
        Self { buckets, mask: cap - 1, count: 0, min_capacity: cap, oom: false }
    }

    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    /// Fallible form of [`HashMap::with_capacity`], for callers that treat
    /// the table's initial allocation as a fatal startup condition rather
    /// than letting the allocator abort the process.
    pub fn try_with_capacity(min_capacity: usize) -> Result<Self, ()> {
        let cap = min_capacity.max(MIN_CAPACITY).next_power_of_two();
        let mut buckets = Vec::new();
        buckets.try_reserve_exact(cap).map_err(|_| ())?;
        buckets.resize_with(cap, Bucket::empty);
        Ok(Self { buckets, mask: cap - 1, count: 0, min_capacity: cap, oom: false })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True if the most recent [`HashMap::set`] failed to allocate the
    /// larger table it needed. The map stays usable at its previous
    /// capacity.
    #[inline]
    pub fn oom(&self) -> bool {
        self.oom
    }

    fn growat(&self) -> usize {
        self.buckets.len() * 3 / 4
    }

    fn shrinkat(&self) -> usize {
        self.buckets.len() / 10
    }

    fn hash_of(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() & HASH_MASK
    }

    fn home(&self, hash: u64) -> usize {
        (hash as usize) & self.mask
    }

    /// Rebuilds the table at `new_cap` (rounded to a power of two, floored at
    /// the original minimum). Uses a fallible reservation so a grow that
    /// can't get memory reports `false` instead of aborting the process,
    /// mirroring `hashmap_set`'s malloc-failure branch.
    fn try_grow(&mut self, new_cap: usize) -> bool {
        let cap = new_cap.max(self.min_capacity).next_power_of_two();
        let mut buckets: Vec<Bucket<K, V>> = Vec::new();
        if buckets.try_reserve_exact(cap).is_err() {
            return false;
        }
        buckets.resize_with(cap, Bucket::empty);
        let mut new =
            Self { buckets, mask: cap - 1, count: 0, min_capacity: self.min_capacity, oom: false };
        for bucket in &mut self.buckets {
            if let Some((k, v)) = bucket.entry.take() {
                let hash = bucket.hash;
                new.raw_insert(hash, k, v);
            }
        }
        *self = new;
        true
    }

    /// Robin Hood insertion loop shared by `set` and table resizing.
    fn raw_insert(&mut self, hash: u64, key: K, value: V) -> Option<V> {
        let mut entry_hash = hash;
        let mut entry_psl: u32 = 1;
        let mut entry_key = key;
        let mut entry_val = value;
        let mut i = self.home(hash);
        loop {
            let bucket = &mut self.buckets[i];
            if bucket.is_empty() {
                bucket.hash = entry_hash;
                bucket.psl = entry_psl;
                bucket.entry = Some((entry_key, entry_val));
                self.count += 1;
                return None;
            }
            if bucket.hash == entry_hash {
                if let Some((bk, _)) = &bucket.entry {
                    if *bk == entry_key {
                        let (_, old_val) = bucket.entry.replace((entry_key, entry_val)).unwrap();
                        return Some(old_val);
                    }
                }
            }
            if bucket.psl < entry_psl {
                let displaced_hash = bucket.hash;
                let displaced_psl = bucket.psl;
                let (displaced_key, displaced_val) = bucket.entry.take().unwrap();
                bucket.hash = entry_hash;
                bucket.psl = entry_psl;
                bucket.entry = Some((entry_key, entry_val));
                entry_hash = displaced_hash;
                entry_psl = displaced_psl;
                entry_key = displaced_key;
                entry_val = displaced_val;
            }
            i = (i + 1) & self.mask;
            entry_psl += 1;
        }
    }

    /// Inserts or replaces `key`'s value, returning the displaced value if
    /// one was present. Returns `None` with [`HashMap::oom`] set if growth
    /// was needed and allocation failed; the table is left unmodified.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        self.oom = false;
        if self.count == self.growat() && !self.try_grow(self.buckets.len() * 2) {
            self.oom = true;
            return None;
        }
        let hash = Self::hash_of(&key);
        self.raw_insert(hash, key, value)
    }

    fn find_index(&self, key: &K) -> Option<usize> {
        let hash = Self::hash_of(key);
        let mut i = self.home(hash);
        loop {
            let bucket = &self.buckets[i];
            if bucket.is_empty() {
                return None;
            }
            if bucket.hash == hash {
                if let Some((bk, _)) = &bucket.entry {
                    if bk == key {
                        return Some(i);
                    }
                }
            }
            i = (i + 1) & self.mask;
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.find_index(key).map(|i| &self.buckets[i].entry.as_ref().unwrap().1)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.find_index(key) {
            Some(i) => Some(&mut self.buckets[i].entry.as_mut().unwrap().1),
            None => None,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find_index(key).is_some()
    }

    /// Returns the item stored at raw bucket position `position & mask`, or
    /// `None` if that bucket is empty. Mirrors `hashmap_probe`.
    pub fn probe(&self, position: u64) -> Option<(&K, &V)> {
        let i = (position as usize) & self.mask;
        self.buckets[i].entry.as_ref().map(|(k, v)| (k, v))
    }

    /// Removes `key`, shifting back every entry in the following run whose
    /// PSL is greater than one, per the Robin Hood deletion invariant.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        self.oom = false;
        let mut i = self.find_index(key)?;
        let (_, removed) = self.buckets[i].entry.take().unwrap();
        self.buckets[i].psl = 0;
        loop {
            let next = (i + 1) & self.mask;
            if self.buckets[next].psl <= 1 {
                self.buckets[i].psl = 0;
                break;
            }
            let (nh, npsl, nentry) = {
                let b = &mut self.buckets[next];
                (b.hash, b.psl - 1, b.entry.take())
            };
            self.buckets[i].hash = nh;
            self.buckets[i].psl = npsl;
            self.buckets[i].entry = nentry;
            self.buckets[next].psl = 0;
            i = next;
        }
        self.count -= 1;
        if self.buckets.len() > self.min_capacity && self.count <= self.shrinkat() {
            // A failed shrink just leaves the table oversized; it doesn't
            // lose data, so the result is intentionally ignored.
            let _ = self.try_grow(self.buckets.len() / 2);
        }
        Some(removed)
    }

    /// Visits every occupied bucket in storage order. Stops early if `iter`
    /// returns `false`, and reports whether iteration ran to completion.
    pub fn scan(&self, mut iter: impl FnMut(&K, &V) -> bool) -> bool {
        for bucket in &self.buckets {
            if let Some((k, v)) = &bucket.entry {
                if !iter(k, v) {
                    return false;
                }
            }
        }
        true
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        for (i, bucket) in self.buckets.iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let home = self.home(bucket.hash);
            let expected_psl = ((i + self.buckets.len() - home) % self.buckets.len()) as u32 + 1;
            assert_eq!(bucket.psl, expected_psl, "psl invariant broken at bucket {i}");
        }
        assert!(self.count <= self.growat(), "load factor exceeded 0.75");
    }
}

impl<K: Hash + Eq, V> Default for HashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete_roundtrip() {
        let mut map = HashMap::new();
        assert_eq!(map.set("a", 1), None);
        assert_eq!(map.set("b", 2), None);
        assert_eq!(map.get(&"a"), Some(&1));
        assert_eq!(map.set("a", 10), Some(1));
        assert_eq!(map.get(&"a"), Some(&10));
        assert_eq!(map.delete(&"a"), Some(10));
        assert_eq!(map.get(&"a"), None);
        assert_eq!(map.len(), 1);
        map.assert_invariants();
    }

    #[test]
    fn grows_past_load_factor_and_keeps_all_keys() {
        let mut map = HashMap::new();
        for i in 0..10_000i64 {
            map.set(i, i * 2);
        }
        assert_eq!(map.len(), 10_000);
        for i in 0..10_000i64 {
            assert_eq!(map.get(&i), Some(&(i * 2)));
        }
        map.assert_invariants();
    }

    #[test]
    fn delete_then_get_is_absent_for_every_key() {
        let mut map = HashMap::new();
        let keys: Vec<i32> = (0..500).collect();
        for &k in &keys {
            map.set(k, k);
        }
        for &k in &keys {
            assert_eq!(map.delete(&k), Some(k));
            assert_eq!(map.get(&k), None);
        }
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn shrinks_after_bulk_delete_without_losing_survivors() {
        let mut map = HashMap::new();
        for i in 0..2000i32 {
            map.set(i, i);
        }
        for i in 0..1990i32 {
            map.delete(&i);
        }
        for i in 1990..2000i32 {
            assert_eq!(map.get(&i), Some(&i));
        }
        map.assert_invariants();
    }

    #[test]
    fn scan_visits_every_entry_and_can_stop_early() {
        let mut map = HashMap::new();
        for i in 0..50i32 {
            map.set(i, i);
        }
        let mut seen = 0;
        map.scan(|_, _| {
            seen += 1;
            true
        });
        assert_eq!(seen, 50);

        let mut stopped_at = 0;
        map.scan(|_, _| {
            stopped_at += 1;
            stopped_at < 5
        });
        assert_eq!(stopped_at, 5);
    }
}
