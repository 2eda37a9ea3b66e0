//! The [`SnapMap`][crate::SnapMap] type and its helpers.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::hash::{BuildHasher, Hash};
use std::iter::FromIterator;
use std::marker::PhantomData;

#[cfg(feature = "rayon")]
use rayon::iter::{FromParallelIterator, IntoParallelIterator, ParallelExtend, ParallelIterator};

use crate::raw::config::Config;
use crate::raw::{self, Raw};

struct MapPayload<K, V>((K, V));

impl<K: Clone, V: Clone> Clone for MapPayload<K, V> {
    fn clone(&self) -> Self {
        MapPayload(self.0.clone())
    }
}

impl<K, V> Borrow<K> for MapPayload<K, V> {
    fn borrow(&self) -> &K {
        let &(ref k, _) = &self.0;
        k
    }
}

struct MapConfig<K, V>(PhantomData<(K, V)>);

impl<K, V> Config for MapConfig<K, V>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
{
    type Payload = MapPayload<K, V>;
    type Key = K;
}

/// The iterator of the [`SnapMap`].
///
/// See the [`iter`][SnapMap::iter] method for details.
pub struct Iter<K, V, S = RandomState>
where
    // TODO: It would be great if the bounds wouldn't have to be on the struct, only on the impls
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
{
    inner: raw::iterator::RawIter<MapConfig<K, V>, S>,
}

impl<K, V, S> Iterator for Iter<K, V, S>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
    S: BuildHasher + Clone,
{
    type Item = (K, V);
    fn next(&mut self) -> Option<(K, V)> {
        self.inner.next().map(|p| p.0)
    }
}

/// A concurrent lock-free map with constant-time snapshots.
///
/// Any number of threads can insert, look up and remove entries through a
/// shared reference; no operation ever blocks. On top of the usual map
/// surface there is [`snapshot`][SnapMap::snapshot]: an O(1), linearizable,
/// point-in-time copy. The two handles share the whole tree and unshare
/// lazily, path by path, as they are written to afterwards; taking a
/// snapshot of a map with a million entries costs the same as of an empty
/// one.
///
/// The map stores the data as `(K, V)` tuples and hands out clones of them,
/// which makes it best suited for types that are cheap to clone. Wrap
/// expensive values in an [`Arc`][std::sync::Arc] otherwise.
///
/// A handle is either read-write or read-only
/// ([`read_snapshot`][SnapMap::read_snapshot]); calling a mutating method
/// on a read-only handle is a programming error and panics without
/// touching the tree.
///
/// Iteration observes the state of the map at the point
/// [`iter`][SnapMap::iter] was called, courtesy of an internal read-only
/// snapshot; yield order is unspecified.
///
/// # Examples
///
/// ```rust
/// use snaptrie::SnapMap;
/// use crossbeam_utils::thread;
///
/// let map = SnapMap::new();
///
/// thread::scope(|s| {
///     s.spawn(|_| {
///         map.insert("hello", 1);
///     });
///     s.spawn(|_| {
///         map.insert("world", 2);
///     });
/// }).unwrap();
/// assert_eq!(Some(1), map.get("hello"));
/// assert_eq!(Some(2), map.get("world"));
/// ```
///
/// ```rust
/// use snaptrie::SnapMap;
///
/// let map = SnapMap::new();
/// map.insert("answer", 42);
///
/// let frozen = map.read_snapshot();
/// map.remove("answer");
///
/// assert_eq!(None, map.get("answer"));
/// assert_eq!(Some(42), frozen.get("answer"));
/// ```
pub struct SnapMap<K, V, S = RandomState>
where
    // TODO: It would be great if the bounds wouldn't have to be on the struct, only on the impls
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
{
    raw: Raw<MapConfig<K, V>, S>,
}

impl<K, V> SnapMap<K, V>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
{
    /// Creates a new empty map.
    ///
    /// The hasher is a fresh [`RandomState`], so hashes deliberately do not
    /// agree between maps or processes.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::default())
    }
}

impl<K, V, S> SnapMap<K, V, S>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
    S: BuildHasher,
{
    /// Creates a new empty map, but with the provided hasher implementation.
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            raw: Raw::with_hasher(hasher),
        }
    }

    /// Inserts a new entry.
    ///
    /// Any previous value under the same key is replaced and returned.
    ///
    /// # Panics
    ///
    /// If the handle is a read-only snapshot.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let pin = crossbeam_epoch::pin();
        self.raw
            .insert(MapPayload((key, value)), &pin)
            .map(|p| (p.0).1)
    }

    /// Looks up the value under a key, returning a clone of it.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        Q: ?Sized + Eq + Hash,
        K: Borrow<Q>,
    {
        let pin = crossbeam_epoch::pin();
        self.raw.get(key, &pin).map(|p| (p.0).1)
    }

    /// Removes the entry under a key, returning its value.
    ///
    /// # Panics
    ///
    /// If the handle is a read-only snapshot.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        Q: ?Sized + Eq + Hash,
        K: Borrow<Q>,
    {
        let pin = crossbeam_epoch::pin();
        self.raw.remove(key, &pin).map(|p| (p.0).1)
    }

    /// Removes all entries.
    ///
    /// Concurrent snapshots keep whatever they already observed; only this
    /// handle starts over empty.
    ///
    /// # Panics
    ///
    /// If the handle is a read-only snapshot.
    pub fn clear(&self) {
        let pin = crossbeam_epoch::pin();
        self.raw.clear(&pin);
    }

    /// Checks if the map is currently empty.
    ///
    /// Note that due to the nature of concurrent map, this is inherently racy ‒ another thread may
    /// add or remove elements between you call this method and act based on the result.
    pub fn is_empty(&self) -> bool {
        let pin = crossbeam_epoch::pin();
        self.raw.is_empty(&pin)
    }

    /// Is this handle a read-only snapshot?
    pub fn is_read_only(&self) -> bool {
        self.raw.is_read_only()
    }
}

impl<K, V, S> SnapMap<K, V, S>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
    S: BuildHasher + Clone,
{
    /// An O(1) point-in-time snapshot with the same read-only-ness as this
    /// handle.
    ///
    /// The snapshot observes exactly the entries committed before the call
    /// linearizes; afterwards the two handles evolve independently. Note
    /// that [`Clone`] for the map does the same thing: cloning *is*
    /// snapshotting here.
    pub fn snapshot(&self) -> Self {
        let pin = crossbeam_epoch::pin();
        SnapMap {
            raw: self.raw.snapshot(self.raw.is_read_only(), &pin),
        }
    }

    /// An O(1) point-in-time snapshot that refuses writes.
    ///
    /// Mutating methods on the returned handle panic. Taking a read-only
    /// snapshot of a read-only handle is free (the root is shared).
    pub fn read_snapshot(&self) -> Self {
        let pin = crossbeam_epoch::pin();
        SnapMap {
            raw: self.raw.snapshot(true, &pin),
        }
    }

    /// The number of entries.
    ///
    /// This walks a fresh snapshot, so it is O(n) and observes one
    /// consistent point in time.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns an iterator through the entries of the map, as of now.
    pub fn iter(&self) -> Iter<K, V, S> {
        Iter {
            inner: raw::iterator::RawIter::new(&self.raw),
        }
    }
}

impl<K, V> Default for SnapMap<K, V>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Debug for SnapMap<K, V, S>
where
    K: Debug + Clone + Hash + Eq + 'static,
    V: Debug + Clone + 'static,
    S: BuildHasher + Clone,
{
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let mut d = fmt.debug_map();
        for (key, value) in self.iter() {
            d.entry(&key, &value);
        }
        d.finish()
    }
}

impl<K, V, S> Clone for SnapMap<K, V, S>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
    S: BuildHasher + Clone,
{
    /// An O(1) snapshot, not a deep copy; see
    /// [`snapshot`][SnapMap::snapshot].
    fn clone(&self) -> Self {
        self.snapshot()
    }
}

impl<'a, K, V, S> IntoIterator for &'a SnapMap<K, V, S>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
    S: BuildHasher + Clone,
{
    type Item = (K, V);
    type IntoIter = Iter<K, V, S>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> Extend<(K, V)> for &'a SnapMap<K, V, S>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
    S: BuildHasher,
{
    fn extend<T>(&mut self, iter: T)
    where
        T: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V, S> Extend<(K, V)> for SnapMap<K, V, S>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
    S: BuildHasher,
{
    fn extend<T>(&mut self, iter: T)
    where
        T: IntoIterator<Item = (K, V)>,
    {
        let mut me: &SnapMap<_, _, _> = self;
        me.extend(iter);
    }
}

impl<K, V> FromIterator<(K, V)> for SnapMap<K, V>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
{
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (K, V)>,
    {
        let mut me = SnapMap::new();
        me.extend(iter);
        me
    }
}

#[cfg(feature = "rayon")]
impl<'a, K, V, S> ParallelExtend<(K, V)> for &'a SnapMap<K, V, S>
where
    K: Clone + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Sync,
{
    fn par_extend<T>(&mut self, par_iter: T)
    where
        T: IntoParallelIterator<Item = (K, V)>,
    {
        par_iter.into_par_iter().for_each(|(key, value)| {
            self.insert(key, value);
        });
    }
}

#[cfg(feature = "rayon")]
impl<K, V, S> ParallelExtend<(K, V)> for SnapMap<K, V, S>
where
    K: Clone + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Sync,
{
    fn par_extend<T>(&mut self, par_iter: T)
    where
        T: IntoParallelIterator<Item = (K, V)>,
    {
        let mut me: &SnapMap<_, _, _> = self;
        me.par_extend(par_iter);
    }
}

#[cfg(feature = "rayon")]
impl<K, V> FromParallelIterator<(K, V)> for SnapMap<K, V>
where
    K: Clone + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn from_par_iter<T>(par_iter: T) -> Self
    where
        T: IntoParallelIterator<Item = (K, V)>,
    {
        let mut me = SnapMap::new();
        me.par_extend(par_iter);
        me
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_utils::thread;

    use super::*;
    use crate::raw::tests::{ConstHasher, NoHasher};

    const TEST_THREADS: usize = 4;
    const TEST_BATCH: usize = 10000;
    const TEST_BATCH_SMALL: usize = 100;
    const TEST_REP: usize = 20;

    #[test]
    fn create_destroy() {
        let map: SnapMap<String, usize> = SnapMap::new();
        drop(map);
    }

    #[test]
    fn lookup_empty() {
        let map: SnapMap<String, usize> = SnapMap::new();
        assert!(map.get("hello").is_none());
    }

    #[test]
    fn insert_lookup() {
        let map = SnapMap::new();
        assert!(map.insert("hello", "world").is_none());
        assert!(map.get("world").is_none());
        assert_eq!(Some("world"), map.get("hello"));
    }

    #[test]
    fn insert_overwrite_lookup() {
        let map = SnapMap::new();
        assert!(map.insert("hello", "world").is_none());
        assert_eq!(Some("world"), map.insert("hello", "universe"));
        assert_eq!(Some("universe"), map.get("hello"));
    }

    // Full single-threaded life cycle of one key.
    #[test]
    fn roundtrip() {
        let map = SnapMap::new();
        map.insert("foo", "bar");
        assert_eq!(Some("bar"), map.get("foo"));
        map.insert("foo", "qux");
        assert_eq!(Some("qux"), map.get("foo"));
        assert_eq!(Some("qux"), map.remove("foo"));
        assert_eq!(None, map.get("foo"));
        assert_eq!(None, map.remove("foo"));
    }

    // Insert a lot of things, to make sure we have multiple levels.
    #[test]
    fn insert_many() {
        let map = SnapMap::new();
        for i in 0..TEST_BATCH {
            assert!(map.insert(i, i).is_none());
        }

        for i in 0..TEST_BATCH {
            assert_eq!(Some(i), map.get(&i));
        }
    }

    #[test]
    fn par_insert_many() {
        for _ in 0..TEST_REP {
            let map: SnapMap<usize, usize> = SnapMap::new();
            thread::scope(|s| {
                for t in 0..TEST_THREADS {
                    let map = &map;
                    s.spawn(move |_| {
                        for i in 0..TEST_BATCH {
                            let num = t * TEST_BATCH + i;
                            assert!(map.insert(num, num).is_none());
                        }
                    });
                }
            })
            .unwrap();

            for i in 0..TEST_BATCH * TEST_THREADS {
                assert_eq!(Some(i), map.get(&i));
            }
        }
    }

    #[test]
    fn par_get_many() {
        for _ in 0..TEST_REP {
            let map = SnapMap::new();
            for i in 0..TEST_BATCH * TEST_THREADS {
                assert!(map.insert(i, i).is_none());
            }
            thread::scope(|s| {
                for t in 0..TEST_THREADS {
                    let map = &map;
                    s.spawn(move |_| {
                        for i in 0..TEST_BATCH {
                            let num = t * TEST_BATCH + i;
                            assert_eq!(Some(num), map.get(&num));
                        }
                    });
                }
            })
            .unwrap();
        }
    }

    #[test]
    fn collisions() {
        let map = SnapMap::with_hasher(NoHasher);
        // While their hash is the same under the hasher, they don't kick each other out.
        for i in 0..TEST_BATCH_SMALL {
            assert!(map.insert(i, i).is_none());
        }
        // And all are present.
        for i in 0..TEST_BATCH_SMALL {
            assert_eq!(Some(i), map.get(&i));
        }
        // But reusing the key kicks the other one out.
        for i in 0..TEST_BATCH_SMALL {
            assert_eq!(Some(i), map.insert(i, i + 1));
            assert_eq!(Some(i + 1), map.get(&i));
        }
    }

    // Entries whose hashes fully collide coexist and are removed
    // independently.
    #[test]
    fn collision_coexistence() {
        let map = SnapMap::with_hasher(ConstHasher(42));
        map.insert("foobar", 1);
        map.insert("zogzog", 2);
        map.insert("foobar", 3);
        assert_eq!(Some(3), map.get("foobar"));
        assert_eq!(Some(3), map.remove("foobar"));
        assert_eq!(None, map.get("foobar"));
        assert_eq!(Some(2), map.get("zogzog"));
    }

    #[test]
    fn simple_remove() {
        let map = SnapMap::new();
        assert!(map.remove(&42).is_none());
        assert!(map.insert(42, "hello").is_none());
        assert_eq!(Some("hello"), map.get(&42));
        assert_eq!(Some("hello"), map.remove(&42));
        assert!(map.get(&42).is_none());
        assert!(map.is_empty());
        assert!(map.remove(&42).is_none());
        assert!(map.is_empty());
    }

    fn remove_many_inner<H: BuildHasher + Clone>(map: SnapMap<usize, usize, H>, len: usize) {
        for i in 0..len {
            assert!(map.insert(i, i).is_none());
        }
        for i in 0..len {
            assert_eq!(Some(i), map.get(&i));
            assert_eq!(Some(i), map.remove(&i));
            assert!(map.get(&i).is_none());
        }

        assert!(map.is_empty());
        assert_eq!(0, map.len());
    }

    #[test]
    fn remove_many() {
        remove_many_inner(SnapMap::new(), TEST_BATCH);
    }

    #[test]
    fn remove_many_collision() {
        remove_many_inner(SnapMap::with_hasher(NoHasher), TEST_BATCH_SMALL);
    }

    #[test]
    fn remove_par() {
        let map = SnapMap::new();
        for i in 0..TEST_THREADS * TEST_BATCH {
            map.insert(i, i);
        }

        thread::scope(|s| {
            for t in 0..TEST_THREADS {
                let map = &map;
                s.spawn(move |_| {
                    for i in 0..TEST_BATCH {
                        let num = t * TEST_BATCH + i;
                        assert_eq!(Some(num), map.remove(&num));
                    }
                });
            }
        })
        .unwrap();

        assert!(map.is_empty());
    }

    fn iter_test_inner<S: BuildHasher + Clone>(map: SnapMap<usize, usize, S>) {
        for i in 0..TEST_BATCH_SMALL {
            assert!(map.insert(i, i).is_none());
        }

        let mut extracted = map.iter().map(|(_, v)| v).collect::<Vec<_>>();
        extracted.sort();
        let expected = (0..TEST_BATCH_SMALL).collect::<Vec<_>>();
        assert_eq!(expected, extracted);
    }

    #[test]
    fn iter() {
        iter_test_inner(SnapMap::new());
    }

    #[test]
    fn iter_collision() {
        iter_test_inner(SnapMap::with_hasher(NoHasher));
    }

    // Tombstones left by a removal in a collision bucket still show up in
    // iteration.
    #[test]
    fn iter_covers_tombstones() {
        let map = SnapMap::with_hasher(NoHasher);
        map.insert("a", true);
        map.insert("b", true);
        map.remove("b");

        let seen = map.iter().collect::<Vec<_>>();
        assert_eq!(vec![("a", true)], seen);
        assert_eq!(1, map.len());
    }

    #[test]
    fn len_counts_entries() {
        let map = SnapMap::new();
        for i in 0..10 {
            map.insert(i, i);
        }
        assert_eq!(10, map.len());
        map.remove(&3);
        assert_eq!(9, map.len());
    }

    #[test]
    fn collect() {
        let map = (0..TEST_BATCH_SMALL)
            .map(|i| (i, i))
            .collect::<SnapMap<_, _>>();

        let mut extracted = map
            .iter()
            .map(|(k, v)| {
                assert_eq!(k, v);
                v
            })
            .collect::<Vec<_>>();

        extracted.sort();
        let expected = (0..TEST_BATCH_SMALL).collect::<Vec<_>>();
        assert_eq!(expected, extracted);
    }

    #[test]
    fn par_extend() {
        let map = SnapMap::new();
        thread::scope(|s| {
            for t in 0..TEST_THREADS {
                let mut map = &map;
                s.spawn(move |_| {
                    let start = t * TEST_BATCH_SMALL;
                    let iter = (start..start + TEST_BATCH_SMALL).map(|i| (i, i));
                    map.extend(iter);
                });
            }
        })
        .unwrap();

        let mut extracted = map.iter().map(|(_, v)| v).collect::<Vec<_>>();
        extracted.sort();
        let expected = (0..TEST_THREADS * TEST_BATCH_SMALL).collect::<Vec<_>>();
        assert_eq!(expected, extracted);
    }

    // Removals in the source do not reach an earlier snapshot.
    #[test]
    fn snapshot_independence() {
        let map = SnapMap::new();
        for i in 0..100 {
            map.insert(i, i);
        }

        let snap = map.snapshot();
        for i in 0..100 {
            assert_eq!(Some(i), map.remove(&i));
        }

        for i in 0..100 {
            assert_eq!(Some(i), snap.get(&i));
            assert_eq!(None, map.get(&i));
        }
    }

    // Snapshots of snapshots diverge just like first-level ones.
    #[test]
    fn nested_snapshots() {
        let map = SnapMap::new();
        for i in 0..100 {
            map.insert(i, i);
        }

        let s1 = map.snapshot();
        for i in 0..100 {
            s1.remove(&i);
        }
        s1.insert(5000, 5000);

        // The source is untouched by writes to the snapshot.
        for i in 0..100 {
            assert_eq!(Some(i), map.get(&i));
        }
        assert_eq!(None, map.get(&5000));

        let s2 = s1.snapshot();
        assert_eq!(Some(5000), s2.get(&5000));
        assert_eq!(Some(5000), s2.remove(&5000));
        assert_eq!(None, s2.get(&5000));
        assert_eq!(Some(5000), s1.get(&5000));
    }

    #[test]
    fn snapshot_via_clone() {
        let map = SnapMap::new();
        map.insert(1, 1);
        let copy = map.clone();
        map.insert(2, 2);
        assert_eq!(None, copy.get(&2));
        assert_eq!(Some(1), copy.get(&1));
        assert!(!copy.is_read_only());
    }

    // Every mutating call on a read-only handle panics and the tree is
    // untouched.
    #[test]
    fn read_snapshot_rejects_writes() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let map = SnapMap::new();
        for i in 0..100 {
            map.insert(i, i);
        }
        let frozen = map.read_snapshot();
        assert!(frozen.is_read_only());

        assert!(catch_unwind(AssertUnwindSafe(|| frozen.remove(&7))).is_err());
        assert!(catch_unwind(AssertUnwindSafe(|| frozen.insert(1000, 1000))).is_err());
        assert!(catch_unwind(AssertUnwindSafe(|| frozen.clear())).is_err());

        // Everything still there, iteration included.
        assert_eq!(100, frozen.len());
        for i in 0..100 {
            assert_eq!(Some(i), frozen.get(&i));
        }

        // Snapshots of read-only snapshots are read-only too.
        let again = frozen.snapshot();
        assert!(again.is_read_only());
        assert!(catch_unwind(AssertUnwindSafe(|| again.remove(&7))).is_err());
    }

    #[test]
    fn read_snapshot_sees_tombstoned_entries() {
        // A removal in a collision bucket leaves a tombstone; a read-only
        // handle cannot clean it and must read through it instead.
        let map = SnapMap::with_hasher(NoHasher);
        map.insert(1, 1);
        map.insert(2, 2);
        map.remove(&2);

        let frozen = map.read_snapshot();
        assert_eq!(Some(1), frozen.get(&1));
        assert_eq!(None, frozen.get(&2));
    }

    #[test]
    fn clear_leaves_snapshots_alone() {
        let map = SnapMap::new();
        for i in 0..10 {
            map.insert(i, i);
        }
        assert_eq!(10, map.len());
        let snap = map.snapshot();

        map.clear();

        assert_eq!(0, map.len());
        assert!(map.is_empty());
        assert_eq!(10, snap.len());
    }

    // Two writers inserting the same range while a third thread snapshots
    // continuously. Nothing may be lost and nothing may deadlock.
    #[test]
    fn concurrent_writers_and_snapshots() {
        let map: SnapMap<usize, usize> = SnapMap::new();
        thread::scope(|s| {
            for _ in 0..2 {
                let map = &map;
                s.spawn(move |_| {
                    for i in 0..TEST_BATCH {
                        map.insert(i, i);
                    }
                });
            }
            let map = &map;
            s.spawn(move |_| {
                for _ in 0..1000 {
                    drop(map.snapshot());
                    drop(map.read_snapshot());
                }
            });
        })
        .unwrap();

        assert_eq!(TEST_BATCH, map.len());
        for i in 0..TEST_BATCH {
            assert_eq!(Some(i), map.get(&i));
        }
    }

    #[test]
    fn concurrent_snapshot_isolation() {
        // Writers keep inserting; each snapshot taken in between must be a
        // consistent prefix-closed set under the per-thread insert order.
        let map: SnapMap<usize, usize> = SnapMap::new();
        thread::scope(|s| {
            let writer = &map;
            s.spawn(move |_| {
                for i in 0..TEST_BATCH {
                    writer.insert(i, i);
                }
            });
            let reader = &map;
            s.spawn(move |_| {
                for _ in 0..100 {
                    let snap = reader.read_snapshot();
                    let len = snap.len();
                    // The writer inserts in order, so a snapshot holding n
                    // entries holds exactly 0..n.
                    for i in 0..len {
                        assert_eq!(Some(i), snap.get(&i));
                    }
                }
            });
        })
        .unwrap();
    }

    #[test]
    fn debug_format() {
        let map = SnapMap::new();
        map.insert("hello", 1);
        assert_eq!("{\"hello\": 1}", format!("{:?}", map));
    }
}
