//! Traversal of the trie.
//!
//! The iterator works on a read-only snapshot taken at construction, so it
//! observes exactly the entries committed at that point no matter what the
//! source handle does afterwards. Traversal keeps an explicit stack of
//! small frames instead of recursing; the stack is bounded by the trie
//! depth, which the 32-bit hash space caps at a handful of levels.

use std::hash::BuildHasher;
use std::sync::Arc;

use arrayvec::ArrayVec;
use crossbeam_epoch::Guard;

use super::cell::arc_from_shared;
use super::config::Config;
use super::node::{Branch, INode, LNode, MainKind, MainNode, MAX_FRAMES};
use super::Raw;

/// One pending piece of traversal work.
enum Frame<C: Config> {
    /// Read this I-node's main and expand it.
    Main(Arc<INode<C>>),
    /// Walk the branches of the C-node inside `main`, next one at `at`.
    Branches { main: Arc<MainNode<C>>, at: usize },
    /// Walk a collision list.
    List(Arc<LNode<C>>),
}

/// An iterator over a point-in-time snapshot of a [`Raw`] trie.
///
/// Yield order is unspecified. Entries are yielded as payload clones; the
/// wrappers in [`map`][crate::map] and [`set`][crate::set] unpack them.
pub struct RawIter<C, S>
where
    C: Config,
{
    snap: Raw<C, S>,
    guard: Guard,
    stack: ArrayVec<Frame<C>, MAX_FRAMES>,
}

impl<C, S> RawIter<C, S>
where
    C: Config,
    S: BuildHasher + Clone,
{
    /// Creates an iterator over the state of `map` as of this call.
    pub fn new(map: &Raw<C, S>) -> Self {
        let guard = crossbeam_epoch::pin();
        let snap = map.snapshot(true, &guard);
        let root = unsafe { arc_from_shared(snap.read_root(&guard)) };
        let mut stack = ArrayVec::new();
        stack.push(Frame::Main(root));
        RawIter { snap, guard, stack }
    }

    /// The next payload, if any.
    // Not the Iterator trait: the payload type would leak `Config`
    // internals into bounds the wrappers are better at expressing.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<C::Payload> {
        let RawIter { snap, guard, stack } = self;
        loop {
            match stack.pop()? {
                Frame::Main(inode) => {
                    let main = snap.gcas_read(&inode, guard);
                    match &unsafe { main.deref() }.kind {
                        MainKind::Container(_) => stack.push(Frame::Branches {
                            main: unsafe { arc_from_shared(main) },
                            at: 0,
                        }),
                        MainKind::List(list) => stack.push(Frame::List(Arc::clone(list))),
                        // A tombstone is a single not-yet-compacted entry.
                        MainKind::Tomb(snode) => return Some(snode.payload.clone()),
                        MainKind::Failed => {
                            unreachable!("uncommitted main observed through gcas_read")
                        }
                    }
                }
                Frame::Branches { main, at } => {
                    let branch = match &main.kind {
                        MainKind::Container(cn) => cn.branches.get(at).cloned(),
                        _ => unreachable!("branch frame over a non-container"),
                    };
                    if let Some(branch) = branch {
                        stack.push(Frame::Branches { main, at: at + 1 });
                        match branch {
                            Branch::Indirect(inode) => stack.push(Frame::Main(inode)),
                            Branch::Single(snode) => return Some(snode.payload.clone()),
                        }
                    }
                    // An exhausted C-node frame simply stays popped.
                }
                Frame::List(node) => {
                    if let Some(tail) = node.tail.clone() {
                        stack.push(Frame::List(tail));
                    }
                    return Some(node.head.payload.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::super::config::Trivial;
    use super::super::tests::NoHasher;
    use super::*;

    #[test]
    fn yields_every_entry_once() {
        let map = Raw::<Trivial<usize>, _>::with_hasher(
            std::collections::hash_map::RandomState::default(),
        );
        let pin = crossbeam_epoch::pin();
        for i in 0..1_000 {
            map.insert(i, &pin);
        }

        let mut iter = RawIter::new(&map);
        let mut seen = HashSet::new();
        while let Some(value) = iter.next() {
            assert!(seen.insert(value), "duplicate entry {}", value);
        }
        assert_eq!(1_000, seen.len());
    }

    #[test]
    fn empty_trie_yields_nothing() {
        let map = Raw::<Trivial<usize>, _>::with_hasher(
            std::collections::hash_map::RandomState::default(),
        );
        let mut iter = RawIter::new(&map);
        assert!(iter.next().is_none());
    }

    #[test]
    fn covers_collision_lists_and_tombstones() {
        let map = Raw::<Trivial<usize>, _>::with_hasher(NoHasher);
        let pin = crossbeam_epoch::pin();
        map.insert(1, &pin);
        map.insert(2, &pin);
        // Deleting one of two colliding entries entombs the survivor; the
        // iterator must still find it.
        map.remove(&2, &pin);

        let mut iter = RawIter::new(&map);
        assert_eq!(Some(1), iter.next());
        assert_eq!(None, iter.next());
    }

    #[test]
    fn ignores_later_writes() {
        let map = Raw::<Trivial<usize>, _>::with_hasher(
            std::collections::hash_map::RandomState::default(),
        );
        let pin = crossbeam_epoch::pin();
        for i in 0..100 {
            map.insert(i, &pin);
        }
        let mut iter = RawIter::new(&map);
        for i in 0..100 {
            map.remove(&i, &pin);
        }
        let mut count = 0;
        while iter.next().is_some() {
            count += 1;
        }
        assert_eq!(100, count);
    }
}
