//! The [`SnapSet`] and other related structures.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::hash::{BuildHasher, Hash};
use std::iter::FromIterator;

use crate::raw::config::Trivial as TrivialConfig;
use crate::raw::{self, Raw};

/// A concurrent lock-free set with constant-time snapshots.
///
/// Note that due to the limitations described in the crate level docs, values returned by looking
/// up (or removing) are always copied using the `Clone` trait. Therefore, the set is more suitable
/// for types that are cheap to copy (eg. `u64` or `IpAddr`).
///
/// If you intend to store types that are more expensive to make copies of or are not `Clone`, you
/// can wrap them in an `Arc` (eg. `Arc<str>`).
///
/// Like [`SnapMap`][crate::SnapMap], the set supports
/// [`snapshot`][SnapSet::snapshot] and [`read_snapshot`][SnapSet::read_snapshot],
/// and mutating a read-only handle panics.
///
/// ```rust
/// use snaptrie::SnapSet;
/// use crossbeam_utils::thread;
///
/// let set = SnapSet::new();
///
/// thread::scope(|s| {
///     s.spawn(|_| {
///         set.insert("hello");
///     });
///     s.spawn(|_| {
///         set.insert("world");
///     });
/// }).unwrap();
///
/// assert!(set.contains("hello"));
/// assert!(set.contains("world"));
/// assert!(!set.contains("universe"));
/// set.remove("world");
/// assert!(!set.contains("world"));
/// ```
pub struct SnapSet<T, S = RandomState>
where
    T: Clone + Hash + Eq + 'static,
{
    raw: Raw<TrivialConfig<T>, S>,
}

impl<T> SnapSet<T>
where
    T: Clone + Hash + Eq + 'static,
{
    /// Creates a new empty set.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::default())
    }
}

impl<T, S> SnapSet<T, S>
where
    T: Clone + Hash + Eq + 'static,
    S: BuildHasher,
{
    /// Creates a new empty set with the provided hasher implementation.
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            raw: Raw::with_hasher(hasher),
        }
    }

    /// Inserts a value, returning the displaced equal value if there was
    /// one.
    ///
    /// # Panics
    ///
    /// If the handle is a read-only snapshot.
    pub fn insert(&self, value: T) -> Option<T> {
        let pin = crossbeam_epoch::pin();
        self.raw.insert(value, &pin)
    }

    /// Looks up a value equal to the given one, returning a clone of it.
    pub fn get<Q>(&self, value: &Q) -> Option<T>
    where
        Q: ?Sized + Eq + Hash,
        T: Borrow<Q>,
    {
        let pin = crossbeam_epoch::pin();
        self.raw.get(value, &pin)
    }

    /// Checks for the presence of a value.
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        Q: ?Sized + Eq + Hash,
        T: Borrow<Q>,
    {
        self.get(value).is_some()
    }

    /// Removes a value equal to the given one, returning it.
    ///
    /// # Panics
    ///
    /// If the handle is a read-only snapshot.
    pub fn remove<Q>(&self, value: &Q) -> Option<T>
    where
        Q: ?Sized + Eq + Hash,
        T: Borrow<Q>,
    {
        let pin = crossbeam_epoch::pin();
        self.raw.remove(value, &pin)
    }

    /// Removes all values.
    ///
    /// # Panics
    ///
    /// If the handle is a read-only snapshot.
    pub fn clear(&self) {
        let pin = crossbeam_epoch::pin();
        self.raw.clear(&pin);
    }

    /// Checks if the set is currently empty.
    ///
    /// Inherently racy on a read-write handle, so mostly useful for tests
    /// and statistics.
    pub fn is_empty(&self) -> bool {
        let pin = crossbeam_epoch::pin();
        self.raw.is_empty(&pin)
    }

    /// Is this handle a read-only snapshot?
    pub fn is_read_only(&self) -> bool {
        self.raw.is_read_only()
    }
}

impl<T, S> SnapSet<T, S>
where
    T: Clone + Hash + Eq + 'static,
    S: BuildHasher + Clone,
{
    /// An O(1) point-in-time snapshot with the same read-only-ness as this
    /// handle.
    pub fn snapshot(&self) -> Self {
        let pin = crossbeam_epoch::pin();
        SnapSet {
            raw: self.raw.snapshot(self.raw.is_read_only(), &pin),
        }
    }

    /// An O(1) read-only point-in-time snapshot.
    pub fn read_snapshot(&self) -> Self {
        let pin = crossbeam_epoch::pin();
        SnapSet {
            raw: self.raw.snapshot(true, &pin),
        }
    }

    /// The number of values, counted on a fresh snapshot; O(n).
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns an iterator over the values, as of now.
    pub fn iter(&self) -> Iter<T, S> {
        Iter {
            inner: raw::iterator::RawIter::new(&self.raw),
        }
    }
}

/// The iterator of the [`SnapSet`].
///
/// See the [`iter`][SnapSet::iter] method for details.
pub struct Iter<T, S = RandomState>
where
    T: Clone + Hash + Eq + 'static,
{
    inner: raw::iterator::RawIter<TrivialConfig<T>, S>,
}

impl<T, S> Iterator for Iter<T, S>
where
    T: Clone + Hash + Eq + 'static,
    S: BuildHasher + Clone,
{
    type Item = T;
    fn next(&mut self) -> Option<T> {
        self.inner.next()
    }
}

impl<T> Default for SnapSet<T>
where
    T: Clone + Hash + Eq + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> Debug for SnapSet<T, S>
where
    T: Debug + Clone + Hash + Eq + 'static,
    S: BuildHasher + Clone,
{
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let mut d = fmt.debug_set();
        for value in self.iter() {
            d.entry(&value);
        }
        d.finish()
    }
}

impl<T, S> Clone for SnapSet<T, S>
where
    T: Clone + Hash + Eq + 'static,
    S: BuildHasher + Clone,
{
    /// An O(1) snapshot, not a deep copy.
    fn clone(&self) -> Self {
        self.snapshot()
    }
}

impl<'a, T, S> IntoIterator for &'a SnapSet<T, S>
where
    T: Clone + Hash + Eq + 'static,
    S: BuildHasher + Clone,
{
    type Item = T;
    type IntoIter = Iter<T, S>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T, S> Extend<T> for &'a SnapSet<T, S>
where
    T: Clone + Hash + Eq + 'static,
    S: BuildHasher,
{
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = T>,
    {
        for value in iter {
            self.insert(value);
        }
    }
}

impl<T, S> Extend<T> for SnapSet<T, S>
where
    T: Clone + Hash + Eq + 'static,
    S: BuildHasher,
{
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut me: &SnapSet<_, _> = self;
        me.extend(iter);
    }
}

impl<T> FromIterator<T> for SnapSet<T>
where
    T: Clone + Hash + Eq + 'static,
{
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let mut me = SnapSet::new();
        me.extend(iter);
        me
    }
}
