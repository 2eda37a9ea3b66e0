//! The node types of the trie and the pure (side-effect free) node algebra.
//!
//! Every type here is immutable once published; "modifying" a C-node or an
//! L-node means building a copy that shares the unchanged branches. The only
//! mutable fields in the whole structure are the [`Slot`]s on [`INode`] and
//! [`MainNode`], which are driven by the GCAS/RDCSS protocols in the parent
//! module.

use std::borrow::Borrow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use super::cell::Slot;
use super::config::Config;

/// Bits of hash consumed per level.
pub(crate) const LEVEL_BITS: u32 = 5;
pub(crate) const LEVEL_MASK: u32 = 0b1_1111;
/// Branching factor of a C-node.
pub(crate) const LEVEL_CELLS: usize = 32;
/// Size of the active hash space; past this depth keys have fully collided.
pub(crate) const HASH_BITS: u32 = 32;
/// C-node levels in a maximal path (0, 5, .., 30).
pub(crate) const MAX_DEPTH: usize = (HASH_BITS / LEVEL_BITS + 1) as usize;
/// Upper bound on the iterator's frame stack: one branch frame per level,
/// plus the I-node or list frame currently being expanded below it.
pub(crate) const MAX_FRAMES: usize = MAX_DEPTH + 2;

/// Generation token stamped on I-nodes and C-nodes at creation.
///
/// Generations demarcate snapshots and are compared by value only; the
/// process-global counter guarantees a token is never reused, which is all
/// the protocol needs from them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Gen(u64);

impl Gen {
    pub fn fresh() -> Gen {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Gen(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Singleton leaf: one payload together with its (truncated, 32-bit) hash.
pub(crate) struct SNode<C: Config> {
    pub payload: C::Payload,
    pub hash: u32,
}

impl<C: Config> SNode<C> {
    pub fn new(payload: C::Payload, hash: u32) -> Self {
        SNode { payload, hash }
    }

    pub fn key(&self) -> &C::Key {
        self.payload.borrow()
    }
}

/// A C-node branch: either a level below or a single entry.
pub(crate) enum Branch<C: Config> {
    Indirect(Arc<INode<C>>),
    Single(Arc<SNode<C>>),
}

// Derived Clone would put bounds on C.
impl<C: Config> Clone for Branch<C> {
    fn clone(&self) -> Self {
        match self {
            Branch::Indirect(inode) => Branch::Indirect(Arc::clone(inode)),
            Branch::Single(snode) => Branch::Single(Arc::clone(snode)),
        }
    }
}

pub(crate) type Branches<C> = SmallVec<[Branch<C>; 4]>;

/// Container node: a 32-bit occupancy bitmap and one branch per set bit,
/// in ascending bit order.
pub(crate) struct CNode<C: Config> {
    pub bmp: u32,
    pub branches: Branches<C>,
    pub gen: Gen,
}

impl<C: Config> CNode<C> {
    pub fn empty(gen: Gen) -> Self {
        CNode {
            bmp: 0,
            branches: SmallVec::new(),
            gen,
        }
    }

    /// Copy with `branch` spliced in at `pos` and `flag` set in the bitmap.
    pub fn inserted(&self, pos: usize, flag: u32, branch: Branch<C>, gen: Gen) -> Self {
        let mut branches = Branches::with_capacity(self.branches.len() + 1);
        branches.extend(self.branches[..pos].iter().cloned());
        branches.push(branch);
        branches.extend(self.branches[pos..].iter().cloned());
        CNode {
            bmp: self.bmp | flag,
            branches,
            gen,
        }
    }

    /// Copy with the branch at `pos` replaced.
    pub fn updated(&self, pos: usize, branch: Branch<C>, gen: Gen) -> Self {
        let mut branches: Branches<C> = self.branches.iter().cloned().collect();
        branches[pos] = branch;
        CNode {
            bmp: self.bmp,
            branches,
            gen,
        }
    }

    /// Copy with the branch at `pos` dropped and `flag` cleared.
    pub fn removed(&self, pos: usize, flag: u32, gen: Gen) -> Self {
        let mut branches = Branches::with_capacity(self.branches.len() - 1);
        branches.extend(self.branches[..pos].iter().cloned());
        branches.extend(self.branches[pos + 1..].iter().cloned());
        CNode {
            bmp: self.bmp ^ flag,
            branches,
            gen,
        }
    }
}

/// The bit for `hash` at level `lev` and the branch index it selects in a
/// C-node with occupancy `bmp`.
pub(crate) fn flag_pos(hash: u32, lev: u32, bmp: u32) -> (u32, usize) {
    let idx = (hash >> lev) & LEVEL_MASK;
    debug_assert!((idx as usize) < LEVEL_CELLS);
    let flag = 1u32 << idx;
    let pos = (bmp & (flag - 1)).count_ones() as usize;
    (flag, pos)
}

/// Persistent list of fully-colliding singletons; lives only below level 32
/// and never holds fewer than two entries once published.
pub(crate) struct LNode<C: Config> {
    pub head: Arc<SNode<C>>,
    pub tail: Option<Arc<LNode<C>>>,
}

impl<C: Config> LNode<C> {
    pub fn lookup<'a, Q>(list: &'a Arc<LNode<C>>, key: &Q) -> Option<&'a Arc<SNode<C>>>
    where
        Q: ?Sized + Eq,
        C::Key: Borrow<Q>,
    {
        let mut node = list;
        loop {
            if node.head.key().borrow() == key {
                return Some(&node.head);
            }
            node = node.tail.as_ref()?;
        }
    }

    /// A copy with `snode` prepended; any entry with an equal key is dropped.
    pub fn inserted(list: &Arc<LNode<C>>, snode: Arc<SNode<C>>) -> Arc<LNode<C>> {
        let tail = match Self::removed(list, snode.key()) {
            Some((rest, _)) => rest,
            None => Some(Arc::clone(list)),
        };
        Arc::new(LNode { head: snode, tail })
    }

    /// A copy without the entry matching `key`, along with the removed
    /// payload, or `None` if no entry matches. The suffix past the removed
    /// entry is shared with the original.
    pub fn removed<Q>(
        list: &Arc<LNode<C>>,
        key: &Q,
    ) -> Option<(Option<Arc<LNode<C>>>, C::Payload)>
    where
        Q: ?Sized + Eq,
        C::Key: Borrow<Q>,
    {
        if list.head.key().borrow() == key {
            return Some((list.tail.clone(), list.head.payload.clone()));
        }
        let (rest, payload) = Self::removed(list.tail.as_ref()?, key)?;
        let prefix = Arc::new(LNode {
            head: Arc::clone(&list.head),
            tail: rest,
        });
        Some((Some(prefix), payload))
    }
}

impl<C: Config> Drop for LNode<C> {
    fn drop(&mut self) {
        // Unlink the tail chain iteratively; the default recursive drop
        // would be stack-bounded by the collision count.
        let mut tail = self.tail.take();
        while let Some(node) = tail {
            match Arc::try_unwrap(node) {
                Ok(mut node) => tail = node.tail.take(),
                Err(_) => break,
            }
        }
    }
}

/// What an I-node's main pointer refers to.
pub(crate) enum MainKind<C: Config> {
    Container(CNode<C>),
    /// Tombstone: the subtree shrank to one entry and the parent should
    /// compact it away.
    Tomb(Arc<SNode<C>>),
    List(Arc<LNode<C>>),
    /// Marker installed on a `prev` pointer when a GCAS loses its
    /// generation check; its own `prev` holds the rollback target. Never
    /// installed as a committed main.
    Failed,
}

/// A main node plus the GCAS bookkeeping pointer.
pub(crate) struct MainNode<C: Config> {
    pub kind: MainKind<C>,
    /// Null in steady state; points at the displaced main while a GCAS on
    /// the owning I-node is in flight.
    pub prev: Slot<MainNode<C>>,
}

impl<C: Config> MainNode<C> {
    pub fn new(kind: MainKind<C>) -> Self {
        MainNode {
            kind,
            prev: Slot::null(),
        }
    }
}

/// Indirection node: the only mutable location in the tree proper.
///
/// An I-node doubles as the RDCSS descriptor wrapper so that the root
/// pointer always holds a single type; a wrapper has `rdcss` set and a null
/// main pointer.
pub(crate) struct INode<C: Config> {
    pub main: Slot<MainNode<C>>,
    pub gen: Gen,
    pub rdcss: Option<Descriptor<C>>,
}

impl<C: Config> INode<C> {
    pub fn new(main: MainNode<C>, gen: Gen) -> Self {
        Self::from_main(Arc::new(main), gen)
    }

    pub fn from_main(main: Arc<MainNode<C>>, gen: Gen) -> Self {
        INode {
            main: Slot::new(Some(main)),
            gen,
            rdcss: None,
        }
    }

    /// A root I-node over an empty C-node.
    pub fn empty_root(gen: Gen) -> Self {
        Self::new(MainNode::new(MainKind::Container(CNode::empty(gen))), gen)
    }

    pub fn wrapper(descriptor: Descriptor<C>) -> Self {
        INode {
            main: Slot::null(),
            gen: Gen::fresh(),
            rdcss: Some(descriptor),
        }
    }
}

/// State of an in-flight RDCSS on the root pointer.
pub(crate) struct Descriptor<C: Config> {
    pub old: Arc<INode<C>>,
    pub expected: Arc<MainNode<C>>,
    pub nv: Arc<INode<C>>,
    pub committed: AtomicBool,
}

/// Wraps a singleton in a tombstone.
pub(crate) fn entomb<C: Config>(snode: Arc<SNode<C>>) -> MainNode<C> {
    MainNode::new(MainKind::Tomb(snode))
}

/// Contraction rule: a non-root C-node must not keep a lone singleton; it
/// collapses into a tombstone for the parent to pick up.
pub(crate) fn to_contracted<C: Config>(cn: CNode<C>, lev: u32) -> MainNode<C> {
    if lev > 0 && cn.branches.len() == 1 {
        if let Branch::Single(snode) = &cn.branches[0] {
            return entomb(Arc::clone(snode));
        }
    }
    MainNode::new(MainKind::Container(cn))
}

/// Builds the main node holding two distinct entries whose hashes agree on
/// all chunks below `lev`, adding levels while the chunks keep colliding
/// and falling back to a collision list once the hash is exhausted.
pub(crate) fn new_main_node<C: Config>(
    x: Arc<SNode<C>>,
    y: Arc<SNode<C>>,
    lev: u32,
    gen: Gen,
) -> MainNode<C> {
    if lev >= HASH_BITS {
        let tail = Arc::new(LNode { head: x, tail: None });
        let list = Arc::new(LNode {
            head: y,
            tail: Some(tail),
        });
        return MainNode::new(MainKind::List(list));
    }
    let xidx = (x.hash >> lev) & LEVEL_MASK;
    let yidx = (y.hash >> lev) & LEVEL_MASK;
    let bmp = (1u32 << xidx) | (1u32 << yidx);
    let mut branches = Branches::new();
    if xidx == yidx {
        let below = new_main_node(x, y, lev + LEVEL_BITS, gen);
        branches.push(Branch::Indirect(Arc::new(INode::new(below, gen))));
    } else if xidx < yidx {
        branches.push(Branch::Single(x));
        branches.push(Branch::Single(y));
    } else {
        branches.push(Branch::Single(y));
        branches.push(Branch::Single(x));
    }
    MainNode::new(MainKind::Container(CNode { bmp, branches, gen }))
}

#[cfg(test)]
mod tests {
    use super::super::config::Trivial;
    use super::*;

    type Cfg = Trivial<u32>;

    fn snode(value: u32, hash: u32) -> Arc<SNode<Cfg>> {
        Arc::new(SNode::new(value, hash))
    }

    #[test]
    fn consts_consistent() {
        assert!(LEVEL_CELLS.is_power_of_two());
        assert_eq!(LEVEL_BITS, LEVEL_MASK.count_ones());
        assert_eq!(LEVEL_CELLS, 1 << LEVEL_BITS);
        assert!(MAX_DEPTH * LEVEL_BITS as usize >= HASH_BITS as usize);
    }

    #[test]
    fn gens_are_unique() {
        let a = Gen::fresh();
        let b = Gen::fresh();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn flag_pos_counts_lower_bits() {
        let (flag, pos) = flag_pos(0, 0, 0);
        assert_eq!(1, flag);
        assert_eq!(0, pos);

        // Hash chunk 3 at level 0, with bits 0 and 2 already occupied.
        let (flag, pos) = flag_pos(3, 0, 0b101);
        assert_eq!(0b1000, flag);
        assert_eq!(2, pos);

        // The same hash indexes by a different chunk one level down.
        let (flag, _) = flag_pos(0b100_00011, LEVEL_BITS, 0);
        assert_eq!(0b10000, flag);
    }

    #[test]
    fn cnode_algebra_keeps_bitmap_in_sync() {
        let gen = Gen::fresh();
        let cn = CNode::<Cfg>::empty(gen);

        let (flag_a, pos_a) = flag_pos(5, 0, cn.bmp);
        let cn = cn.inserted(pos_a, flag_a, Branch::Single(snode(1, 5)), gen);
        let (flag_b, pos_b) = flag_pos(2, 0, cn.bmp);
        let cn = cn.inserted(pos_b, flag_b, Branch::Single(snode(2, 2)), gen);

        assert_eq!(cn.bmp.count_ones() as usize, cn.branches.len());
        // Ascending bit order: hash 2 sorts before hash 5.
        match &cn.branches[0] {
            Branch::Single(sn) => assert_eq!(2, sn.payload),
            Branch::Indirect(_) => panic!("expected a singleton"),
        }

        let updated = cn.updated(0, Branch::Single(snode(7, 2)), gen);
        assert_eq!(cn.bmp, updated.bmp);

        let (flag, pos) = flag_pos(2, 0, updated.bmp);
        let removed = updated.removed(pos, flag, gen);
        assert_eq!(removed.bmp.count_ones() as usize, removed.branches.len());
        assert_eq!(1, removed.branches.len());
    }

    #[test]
    fn contraction_entombs_single_singleton() {
        let gen = Gen::fresh();
        let cn = CNode::<Cfg>::empty(gen);
        let (flag, pos) = flag_pos(9, LEVEL_BITS, cn.bmp);
        let cn = cn.inserted(pos, flag, Branch::Single(snode(9, 9)), gen);

        match to_contracted(cn, LEVEL_BITS).kind {
            MainKind::Tomb(sn) => assert_eq!(9, sn.payload),
            _ => panic!("single-branch C-node should contract"),
        }

        // The root level never contracts.
        let cn = CNode::<Cfg>::empty(gen);
        let (flag, pos) = flag_pos(9, 0, cn.bmp);
        let cn = cn.inserted(pos, flag, Branch::Single(snode(9, 9)), gen);
        assert!(matches!(
            to_contracted(cn, 0).kind,
            MainKind::Container(_)
        ));
    }

    #[test]
    fn colliding_entries_build_a_list() {
        // Equal hashes collide on every level, so a chain of single-branch
        // C-nodes leads down to the collision list.
        fn depth_to_list(main: &MainNode<Cfg>, guard: &crossbeam_epoch::Guard) -> usize {
            match &main.kind {
                MainKind::Container(cn) => {
                    assert_eq!(1, cn.branches.len());
                    match &cn.branches[0] {
                        Branch::Indirect(inode) => {
                            let below = inode.main.load(guard);
                            1 + depth_to_list(unsafe { below.deref() }, guard)
                        }
                        Branch::Single(_) => {
                            panic!("colliding singletons must not share a slot")
                        }
                    }
                }
                MainKind::List(list) => {
                    assert!(list.tail.is_some());
                    0
                }
                _ => panic!("unexpected main node"),
            }
        }

        let x = snode(1, 0xdead_beef);
        let y = snode(2, 0xdead_beef);
        let main = new_main_node::<Cfg>(x, y, 0, Gen::fresh());
        let guard = crossbeam_epoch::pin();
        assert_eq!(MAX_DEPTH, depth_to_list(&main, &guard));
    }

    #[test]
    fn lnode_algebra() {
        let list = Arc::new(LNode::<Cfg> {
            head: snode(1, 42),
            tail: Some(Arc::new(LNode {
                head: snode(2, 42),
                tail: None,
            })),
        });

        assert_eq!(1, LNode::lookup(&list, &1).unwrap().payload);
        assert_eq!(2, LNode::lookup(&list, &2).unwrap().payload);
        assert!(LNode::lookup(&list, &3).is_none());

        // Inserting an existing key replaces it instead of duplicating.
        let replaced = LNode::inserted(&list, snode(1, 42));
        assert_eq!(1, replaced.head.payload);
        assert!(replaced.tail.as_ref().unwrap().tail.is_none());

        let (rest, payload) = LNode::removed(&list, &1).unwrap();
        assert_eq!(1, payload);
        let rest = rest.unwrap();
        assert_eq!(2, rest.head.payload);
        assert!(rest.tail.is_none());

        assert!(LNode::removed(&list, &9).is_none());
    }

    #[test]
    fn long_list_drops_without_recursion() {
        let mut list = Arc::new(LNode::<Cfg> {
            head: snode(0, 0),
            tail: None,
        });
        for i in 1..100_000 {
            list = Arc::new(LNode {
                head: snode(i, 0),
                tail: Some(list),
            });
        }
        drop(list);
    }
}
