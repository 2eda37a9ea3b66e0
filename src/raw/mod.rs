//! The core implementation of the concurrent trie data structure.
//!
//! This module contains the [`Raw`][crate::raw::Raw] type, which is the engine of all the data
//! structures in this crate. This is exposed to allow wrapping it into further APIs, but is
//! probably not the best thing for general use.
//!
//! The structure is a hash-array-mapped trie of *indirection nodes* (I-nodes)
//! pointing to *main nodes* (container, tombstone or collision-list nodes).
//! All mutation happens by CAS on an I-node's main pointer, wrapped in two
//! protocols:
//!
//! * **GCAS** commits a main-pointer swap only if the root's generation
//!   still matches the I-node's, so a writer can never mutate a subtree
//!   that a concurrent snapshot has already frozen.
//! * **RDCSS** swings the root pointer to a fresh-generation copy only if
//!   the old root's main node is unchanged, which makes snapshots
//!   linearizable without stopping other threads.
//!
//! Snapshots therefore cost one root swap; the two handles share the whole
//! tree and lazily re-stamp (and thereby unshare) just the paths they write
//! afterwards.
//!
//! For the detailed correctness argument see the comments on the individual
//! protocol methods; they follow the ctries snapshot paper quite closely.

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash, Hasher};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_epoch::{Guard, Shared};

pub mod config;
pub mod debug;
pub mod iterator;

mod cell;
mod node;

use self::cell::{arc_from_shared, shared_from_arc, Slot};
use self::config::Config;
use self::node::{
    entomb, flag_pos, new_main_node, to_contracted, Branch, CNode, Descriptor, Gen, INode, LNode,
    MainKind, MainNode, SNode, LEVEL_BITS,
};

/// Signal that the whole operation must be retried from the root, because a
/// CAS along the path lost a race or the path crossed into a stale
/// generation.
struct Restart;

type Attempt<T> = Result<T, Restart>;

/// The raw snapshottable hash trie.
///
/// This provides the low level data structure. It does provide the lock-free
/// operations and constant-time snapshots, but not a user friendly
/// interface. It is designed to separate the single implementation of the
/// core algorithm and provide a way to wrap it into different interfaces for
/// different use cases.
///
/// The types stored inside and general behaviour are described by the
/// [`Config`] type parameter.
///
/// As a general rule, this data structure takes the [`crossbeam_epoch`]
/// [`Guard`] and returns cloned payloads. Cloning is unavoidable here: once
/// the caller unpins, any node the result was read from may be reclaimed.
///
/// A handle is either read-write or read-only (see
/// [`snapshot`][Raw::snapshot]); every mutating method panics on a
/// read-only handle before touching the tree.
pub struct Raw<C: Config, S> {
    root: Slot<INode<C>>,
    read_only: bool,
    hash_builder: S,
}

impl<C, S> Raw<C, S>
where
    C: Config,
    S: BuildHasher,
{
    /// Constructs an empty read-write instance from the given hasher.
    pub fn with_hasher(hash_builder: S) -> Self {
        let gen = Gen::fresh();
        Raw {
            root: Slot::new(Some(Arc::new(INode::empty_root(gen)))),
            read_only: false,
            hash_builder,
        }
    }

    /// Access to the hasher.
    pub fn hash_builder(&self) -> &S {
        &self.hash_builder
    }

    /// Is this handle a read-only snapshot?
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Computes the active hash of a key: the low 32 bits of the 64-bit
    /// hash produced by the stored hasher.
    fn hash<Q>(&self, key: &Q) -> u32
    where
        Q: ?Sized + Hash,
    {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }

    fn assert_read_write(&self) {
        assert!(
            !self.read_only,
            "attempt to modify a read-only snapshot of the trie"
        );
    }

    /// Inserts a new payload, replacing and returning any previously held
    /// payload with an equal key.
    pub fn insert(&self, payload: C::Payload, guard: &Guard) -> Option<C::Payload> {
        self.assert_read_write();
        let hash = {
            let key: &C::Key = payload.borrow();
            self.hash(key)
        };
        let snode = Arc::new(SNode::new(payload, hash));
        loop {
            let root = self.read_root(guard);
            let root = unsafe { root.deref() };
            match self.insert_at(root, &snode, 0, None, root.gen, guard) {
                Ok(previous) => return previous,
                Err(Restart) => (),
            }
        }
    }

    /// Looks a payload up by key, returning a clone of it.
    pub fn get<Q>(&self, key: &Q, guard: &Guard) -> Option<C::Payload>
    where
        Q: ?Sized + Eq + Hash,
        C::Key: Borrow<Q>,
    {
        let hash = self.hash(key);
        loop {
            let root = self.read_root(guard);
            let root = unsafe { root.deref() };
            match self.lookup_at(root, key, hash, 0, None, root.gen, guard) {
                Ok(found) => return found,
                Err(Restart) => (),
            }
        }
    }

    /// Removes the payload with the given key, returning it.
    pub fn remove<Q>(&self, key: &Q, guard: &Guard) -> Option<C::Payload>
    where
        Q: ?Sized + Eq + Hash,
        C::Key: Borrow<Q>,
    {
        self.assert_read_write();
        let hash = self.hash(key);
        loop {
            let root = self.read_root(guard);
            let root = unsafe { root.deref() };
            match self.remove_at(root, key, hash, 0, None, root.gen, guard) {
                Ok(removed) => return removed,
                Err(Restart) => (),
            }
        }
    }

    /// Checks for emptiness.
    ///
    /// Inherently racy on a read-write handle, of course; by the time the
    /// caller looks at the result another thread may have inserted.
    pub fn is_empty(&self, guard: &Guard) -> bool {
        let root = self.read_root(guard);
        let main = self.gcas_read(unsafe { root.deref() }, guard);
        match unsafe { &main.deref().kind } {
            MainKind::Container(cn) => cn.bmp == 0,
            _ => false,
        }
    }

    /// Removes all entries by swinging the root to a fresh empty one under
    /// a brand new generation.
    pub fn clear(&self, guard: &Guard) {
        self.assert_read_write();
        loop {
            let root = self.read_root(guard);
            let expected = self.gcas_read(unsafe { root.deref() }, guard);
            let fresh = Arc::new(INode::empty_root(Gen::fresh()));
            if self.rdcss_root(root, expected, fresh, guard) {
                return;
            }
        }
    }

    /// A constant-time, point-in-time snapshot.
    ///
    /// The snapshot observes exactly the entries committed before the root
    /// swap linearizes; later writes to either handle are invisible to the
    /// other. A read-write snapshot is produced by giving both handles
    /// fresh generations, so each lazily unshares the paths it touches. A
    /// read-only snapshot keeps the now-frozen old root; taking a
    /// read-only snapshot of a read-only handle just shares the root
    /// outright.
    pub fn snapshot(&self, read_only: bool, guard: &Guard) -> Self
    where
        S: Clone,
    {
        if read_only && self.read_only {
            let root = unsafe { arc_from_shared(self.read_root(guard)) };
            return self.handle(root, true);
        }
        loop {
            let root = self.read_root(guard);
            let root_ref = unsafe { root.deref() };
            let expected = self.gcas_read(root_ref, guard);
            let renewed = self.copy_to_gen(root_ref, Gen::fresh(), guard);
            if self.rdcss_root(root, expected, renewed, guard) {
                if read_only {
                    // The old-generation root is frozen now; share it.
                    let old = unsafe { arc_from_shared(root) };
                    return self.handle(old, true);
                }
                // This handle just moved to a fresh generation; the writable
                // snapshot takes a second one, so that no handle is left
                // holding a pre-snapshot generation and every later write
                // renews its path.
                let root = self.read_root(guard);
                let copied = self.copy_to_gen(unsafe { root.deref() }, Gen::fresh(), guard);
                return self.handle(copied, false);
            }
        }
    }

    fn handle(&self, root: Arc<INode<C>>, read_only: bool) -> Self
    where
        S: Clone,
    {
        Raw {
            root: Slot::new(Some(root)),
            read_only,
            hash_builder: self.hash_builder.clone(),
        }
    }

    // ------ The RDCSS protocol on the root pointer ------
    //
    // Swapping the root for a snapshot must atomically check *two* locations:
    // the root pointer itself and the main node under it (otherwise a
    // concurrent insert between reading the main and swapping the root would
    // be silently dropped from one of the handles). The classic RDCSS
    // construction does this with a descriptor published in the root slot;
    // anyone who finds the descriptor helps finish the operation before
    // proceeding.

    /// Linearizable read of the live root I-node; helps complete any
    /// in-flight RDCSS first.
    fn read_root<'g>(&self, guard: &'g Guard) -> Shared<'g, INode<C>> {
        self.rdcss_read_root(false, guard)
    }

    /// Like [`read_root`][Raw::read_root], but in abort mode an encountered
    /// descriptor is rolled back rather than helped forward. Used from the
    /// GCAS commit path, which only needs *a* settled root and must not
    /// wait on the snapshot to finish.
    fn rdcss_read_root<'g>(&self, abort: bool, guard: &'g Guard) -> Shared<'g, INode<C>> {
        let root = self.root.load(guard);
        if unsafe { root.deref() }.rdcss.is_some() {
            return self.rdcss_complete(abort, guard);
        }
        root
    }

    /// Installs `nv` as the root, provided the root is still `old` *and*
    /// `old`'s main node is still `expected`. Returns whether the swap
    /// committed.
    fn rdcss_root<'g>(
        &self,
        old: Shared<'g, INode<C>>,
        expected: Shared<'g, MainNode<C>>,
        nv: Arc<INode<C>>,
        guard: &'g Guard,
    ) -> bool {
        let wrapper = Arc::new(INode::wrapper(Descriptor {
            old: unsafe { arc_from_shared(old) },
            expected: unsafe { arc_from_shared(expected) },
            nv,
            committed: AtomicBool::new(false),
        }));
        let published = Arc::clone(&wrapper);
        if self.cas_root(old, published, guard) {
            self.rdcss_complete(false, guard);
            let descriptor = wrapper.rdcss.as_ref().expect("wrapper lost its descriptor");
            return descriptor.committed.load(Ordering::SeqCst);
        }
        false
    }

    /// Drives the RDCSS published in the root slot to completion (or rolls
    /// it back in abort mode) and returns the settled root.
    fn rdcss_complete<'g>(&self, abort: bool, guard: &'g Guard) -> Shared<'g, INode<C>> {
        loop {
            let root = self.root.load(guard);
            let descriptor = match &unsafe { root.deref() }.rdcss {
                Some(descriptor) => descriptor,
                None => return root,
            };
            let old = shared_from_arc(&descriptor.old);
            if abort {
                if self.cas_root(root, Arc::clone(&descriptor.old), guard) {
                    return old;
                }
                continue;
            }
            let old_main = self.gcas_read(unsafe { old.deref() }, guard);
            if old_main.as_raw() == Arc::as_ptr(&descriptor.expected) {
                // The main under the old root is untouched; commit.
                let nv = shared_from_arc(&descriptor.nv);
                if self.cas_root(root, Arc::clone(&descriptor.nv), guard) {
                    descriptor.committed.store(true, Ordering::SeqCst);
                    return nv;
                }
                continue;
            }
            // Someone wrote under the old root in the meantime; roll back
            // and let the snapshotting thread retry.
            if self.cas_root(root, Arc::clone(&descriptor.old), guard) {
                return old;
            }
        }
    }

    fn cas_root<'g>(
        &self,
        current: Shared<'g, INode<C>>,
        new: Arc<INode<C>>,
        guard: &'g Guard,
    ) -> bool {
        self.assert_read_write();
        unsafe { self.root.compare_exchange(current, Some(new), guard) }
    }

    // ------ The GCAS protocol on I-node main pointers ------
    //
    // A plain CAS on `i.main` would let a writer holding an old-generation
    // I-node mutate a subtree that a snapshot has already frozen. GCAS
    // publishes the new main with its `prev` pointing at the displaced one,
    // then checks the root generation: only if it still matches is `prev`
    // nulled (commit); otherwise the I-node is swung back (rollback).
    // Readers that encounter a non-null `prev` help finish the decision, so
    // nobody ever acts on an uncommitted value.

    /// Generation-checked CAS of `i`'s main from `old` to `new`. On failure
    /// the caller restarts from the root.
    fn gcas<'g>(
        &self,
        i: &INode<C>,
        old: Shared<'g, MainNode<C>>,
        mut new: MainNode<C>,
        guard: &'g Guard,
    ) -> bool {
        new.prev = Slot::new(Some(unsafe { arc_from_shared(old) }));
        let new = Arc::new(new);
        let published = shared_from_arc(&new);
        if unsafe { i.main.compare_exchange(old, Some(new), guard) } {
            self.gcas_complete(i, published, guard);
            unsafe { published.deref() }.prev.load(guard).is_null()
        } else {
            false
        }
    }

    /// A GCAS-linearizable read of `i`'s main node: the returned main was
    /// committed at some point during the call.
    fn gcas_read<'g>(&self, i: &INode<C>, guard: &'g Guard) -> Shared<'g, MainNode<C>> {
        let main = i.main.load(guard);
        if unsafe { main.deref() }.prev.load(guard).is_null() {
            return main;
        }
        self.gcas_complete(i, main, guard)
    }

    /// Drives an in-flight GCAS on `i` to its commit-or-rollback decision
    /// and returns the committed main.
    fn gcas_complete<'g>(
        &self,
        i: &INode<C>,
        mut main: Shared<'g, MainNode<C>>,
        guard: &'g Guard,
    ) -> Shared<'g, MainNode<C>> {
        loop {
            if main.is_null() {
                return main;
            }
            let main_ref = unsafe { main.deref() };
            let prev = main_ref.prev.load(guard);
            // Read the root with abort priority so a GCAS racing a snapshot
            // cannot deadlock against the RDCSS helping protocol.
            let root = self.rdcss_read_root(true, guard);
            if prev.is_null() {
                return main;
            }
            let prev_ref = unsafe { prev.deref() };
            if let MainKind::Failed = prev_ref.kind {
                // A failed GCAS: swing the I-node back to the displaced
                // main, which the failure marker kept on its own prev.
                let rollback = prev_ref.prev.load(guard);
                let restored = unsafe { arc_from_shared(rollback) };
                if unsafe { i.main.compare_exchange(main, Some(restored), guard) } {
                    return rollback;
                }
                main = i.main.load(guard);
                continue;
            }
            if unsafe { root.deref() }.gen == i.gen && !self.read_only {
                // Generation check passed: commit by clearing prev.
                if unsafe { main_ref.prev.compare_exchange(prev, None, guard) } {
                    return main;
                }
                continue;
            }
            // Generation check failed (or this is a read-only helper, which
            // must not commit someone else's write). Mark the GCAS as
            // failed; the next pass around the loop rolls it back.
            let failed = MainNode {
                kind: MainKind::Failed,
                prev: Slot::new(Some(unsafe { arc_from_shared(prev) })),
            };
            let _ = unsafe { main_ref.prev.compare_exchange(prev, Some(Arc::new(failed)), guard) };
            main = i.main.load(guard);
        }
    }

    // ------ Generation bookkeeping ------

    /// A copy of `i` stamped with `gen`. The main node is read through GCAS
    /// but shared, not descended into: renewal of the levels below stays
    /// lazy and happens only when a write actually reaches them.
    fn copy_to_gen(&self, i: &INode<C>, gen: Gen, guard: &Guard) -> Arc<INode<C>> {
        let main = self.gcas_read(i, guard);
        Arc::new(INode::from_main(unsafe { arc_from_shared(main) }, gen))
    }

    /// A copy of `cn` with every I-node branch re-stamped to `gen`;
    /// singleton branches stay shared.
    fn renewed(&self, cn: &CNode<C>, gen: Gen, guard: &Guard) -> CNode<C> {
        let branches = cn
            .branches
            .iter()
            .map(|branch| match branch {
                Branch::Indirect(inode) => Branch::Indirect(self.copy_to_gen(inode, gen, guard)),
                Branch::Single(_) => branch.clone(),
            })
            .collect();
        CNode {
            bmp: cn.bmp,
            branches,
            gen,
        }
    }

    // ------ Tree-shape maintenance ------

    /// If the I-node holds a tombstone, the resurrected singleton; the
    /// branch itself otherwise. A plain (non-GCAS) read suffices:
    /// compression is opportunistic and the final swap is still protected.
    fn resurrect(&self, inode: &Arc<INode<C>>, guard: &Guard) -> Branch<C> {
        let main = inode.main.load(guard);
        match &unsafe { main.deref() }.kind {
            MainKind::Tomb(snode) => Branch::Single(Arc::clone(snode)),
            _ => Branch::Indirect(Arc::clone(inode)),
        }
    }

    /// A copy of `cn` with tombstoned I-node branches resurrected, then
    /// contracted.
    fn to_compressed(&self, cn: &CNode<C>, lev: u32, guard: &Guard) -> MainNode<C> {
        let branches = cn
            .branches
            .iter()
            .map(|branch| match branch {
                Branch::Indirect(inode) => self.resurrect(inode, guard),
                Branch::Single(_) => branch.clone(),
            })
            .collect();
        to_contracted(
            CNode {
                bmp: cn.bmp,
                branches,
                gen: cn.gen,
            },
            lev,
        )
    }

    /// Compresses the C-node under `i`. Losing the CAS is fine; whoever
    /// touches the node next cleans again.
    fn clean(&self, i: &INode<C>, lev: u32, guard: &Guard) {
        let main = self.gcas_read(i, guard);
        if let MainKind::Container(cn) = &unsafe { main.deref() }.kind {
            let compressed = self.to_compressed(cn, lev, guard);
            let _ = self.gcas(i, main, compressed, guard);
        }
    }

    /// After a removal left `i` holding a tombstone, replaces the branch to
    /// `i` in `parent` by the resurrected singleton, retrying until the
    /// tombstone is gone or the world has moved on (the branch no longer
    /// points here, or the root generation changed under us).
    fn clean_parent(
        &self,
        parent: &INode<C>,
        i: &INode<C>,
        hash: u32,
        lev: u32,
        start_gen: Gen,
        guard: &Guard,
    ) {
        loop {
            let main = i.main.load(guard);
            let parent_main = parent.main.load(guard);
            let cn = match &unsafe { parent_main.deref() }.kind {
                MainKind::Container(cn) => cn,
                _ => return,
            };
            let (flag, pos) = flag_pos(hash, lev, cn.bmp);
            if cn.bmp & flag == 0 {
                return;
            }
            let points_here = match &cn.branches[pos] {
                Branch::Indirect(sub) => ptr::eq(sub.as_ref(), i),
                Branch::Single(_) => false,
            };
            let tomb = match &unsafe { main.deref() }.kind {
                MainKind::Tomb(snode) => Some(Arc::clone(snode)),
                _ => None,
            };
            let snode = match (points_here, tomb) {
                (true, Some(snode)) => snode,
                _ => return,
            };
            let ncn = cn.updated(pos, Branch::Single(snode), i.gen);
            if self.gcas(parent, parent_main, to_contracted(ncn, lev), guard) {
                return;
            }
            if unsafe { self.read_root(guard).deref() }.gen != start_gen {
                return;
            }
        }
    }

    // ------ The per-node operations ------

    fn insert_at(
        &self,
        i: &INode<C>,
        snode: &Arc<SNode<C>>,
        lev: u32,
        parent: Option<&INode<C>>,
        start_gen: Gen,
        guard: &Guard,
    ) -> Attempt<Option<C::Payload>> {
        let main = self.gcas_read(i, guard);
        match &unsafe { main.deref() }.kind {
            MainKind::Container(cn) => {
                let (flag, pos) = flag_pos(snode.hash, lev, cn.bmp);
                if cn.bmp & flag == 0 {
                    // The slot is free: extend the C-node with the new
                    // singleton, re-stamping it first if it was created
                    // under an older generation.
                    let renewed;
                    let cn = if cn.gen != i.gen {
                        renewed = self.renewed(cn, i.gen, guard);
                        &renewed
                    } else {
                        cn
                    };
                    let ncn = cn.inserted(pos, flag, Branch::Single(Arc::clone(snode)), i.gen);
                    return if self.gcas(i, main, MainNode::new(MainKind::Container(ncn)), guard) {
                        Ok(None)
                    } else {
                        Err(Restart)
                    };
                }
                match &cn.branches[pos] {
                    Branch::Indirect(sub) => {
                        if sub.gen == start_gen {
                            return self.insert_at(
                                sub,
                                snode,
                                lev + LEVEL_BITS,
                                Some(i),
                                start_gen,
                                guard,
                            );
                        }
                        // The level below was created by an older handle;
                        // renew this C-node and retry at the same spot.
                        let renewed = self.renewed(cn, start_gen, guard);
                        if self.gcas(i, main, MainNode::new(MainKind::Container(renewed)), guard) {
                            self.insert_at(i, snode, lev, parent, start_gen, guard)
                        } else {
                            Err(Restart)
                        }
                    }
                    Branch::Single(existing) => {
                        if existing.key() == snode.key() {
                            let previous = existing.payload.clone();
                            let ncn =
                                cn.updated(pos, Branch::Single(Arc::clone(snode)), i.gen);
                            return if self.gcas(
                                i,
                                main,
                                MainNode::new(MainKind::Container(ncn)),
                                guard,
                            ) {
                                Ok(Some(previous))
                            } else {
                                Err(Restart)
                            };
                        }
                        // Two distinct keys sharing the hash prefix so far:
                        // grow a level (or a collision list) holding both.
                        let renewed;
                        let cn = if cn.gen != i.gen {
                            renewed = self.renewed(cn, i.gen, guard);
                            &renewed
                        } else {
                            cn
                        };
                        let below = new_main_node(
                            Arc::clone(existing),
                            Arc::clone(snode),
                            lev + LEVEL_BITS,
                            i.gen,
                        );
                        let branch = Branch::Indirect(Arc::new(INode::new(below, i.gen)));
                        let ncn = cn.updated(pos, branch, i.gen);
                        if self.gcas(i, main, MainNode::new(MainKind::Container(ncn)), guard) {
                            Ok(None)
                        } else {
                            Err(Restart)
                        }
                    }
                }
            }
            MainKind::Tomb(_) => {
                self.clean(
                    parent.expect("tombstone directly under the root"),
                    lev - LEVEL_BITS,
                    guard,
                );
                Err(Restart)
            }
            MainKind::List(list) => {
                let previous = LNode::lookup(list, snode.key()).map(|sn| sn.payload.clone());
                let inserted = LNode::inserted(list, Arc::clone(snode));
                if self.gcas(i, main, MainNode::new(MainKind::List(inserted)), guard) {
                    Ok(previous)
                } else {
                    Err(Restart)
                }
            }
            MainKind::Failed => unreachable!("uncommitted main observed through gcas_read"),
        }
    }

    fn lookup_at<Q>(
        &self,
        i: &INode<C>,
        key: &Q,
        hash: u32,
        lev: u32,
        parent: Option<&INode<C>>,
        start_gen: Gen,
        guard: &Guard,
    ) -> Attempt<Option<C::Payload>>
    where
        Q: ?Sized + Eq,
        C::Key: Borrow<Q>,
    {
        let main = self.gcas_read(i, guard);
        match &unsafe { main.deref() }.kind {
            MainKind::Container(cn) => {
                let (flag, pos) = flag_pos(hash, lev, cn.bmp);
                if cn.bmp & flag == 0 {
                    return Ok(None);
                }
                match &cn.branches[pos] {
                    Branch::Indirect(sub) => {
                        // A read-only handle traverses foreign generations
                        // freely; it cannot renew anything, and its tree
                        // is frozen anyway.
                        if self.read_only || sub.gen == start_gen {
                            return self.lookup_at(
                                sub,
                                key,
                                hash,
                                lev + LEVEL_BITS,
                                Some(i),
                                start_gen,
                                guard,
                            );
                        }
                        let renewed = self.renewed(cn, start_gen, guard);
                        if self.gcas(i, main, MainNode::new(MainKind::Container(renewed)), guard) {
                            self.lookup_at(i, key, hash, lev, parent, start_gen, guard)
                        } else {
                            Err(Restart)
                        }
                    }
                    Branch::Single(snode) => {
                        if snode.key().borrow() == key {
                            Ok(Some(snode.payload.clone()))
                        } else {
                            Ok(None)
                        }
                    }
                }
            }
            MainKind::Tomb(snode) => {
                if !self.read_only {
                    self.clean(
                        parent.expect("tombstone directly under the root"),
                        lev - LEVEL_BITS,
                        guard,
                    );
                    return Err(Restart);
                }
                // A read-only snapshot cannot compact; the entombed
                // singleton is simply the effective content of this branch.
                if snode.hash == hash && snode.key().borrow() == key {
                    Ok(Some(snode.payload.clone()))
                } else {
                    Ok(None)
                }
            }
            MainKind::List(list) => Ok(LNode::lookup(list, key).map(|sn| sn.payload.clone())),
            MainKind::Failed => unreachable!("uncommitted main observed through gcas_read"),
        }
    }

    fn remove_at<Q>(
        &self,
        i: &INode<C>,
        key: &Q,
        hash: u32,
        lev: u32,
        parent: Option<&INode<C>>,
        start_gen: Gen,
        guard: &Guard,
    ) -> Attempt<Option<C::Payload>>
    where
        Q: ?Sized + Eq,
        C::Key: Borrow<Q>,
    {
        let main = self.gcas_read(i, guard);
        match &unsafe { main.deref() }.kind {
            MainKind::Container(cn) => {
                let (flag, pos) = flag_pos(hash, lev, cn.bmp);
                if cn.bmp & flag == 0 {
                    return Ok(None);
                }
                match &cn.branches[pos] {
                    Branch::Indirect(sub) => {
                        if sub.gen == start_gen {
                            return self.remove_at(
                                sub,
                                key,
                                hash,
                                lev + LEVEL_BITS,
                                Some(i),
                                start_gen,
                                guard,
                            );
                        }
                        let renewed = self.renewed(cn, start_gen, guard);
                        if self.gcas(i, main, MainNode::new(MainKind::Container(renewed)), guard) {
                            self.remove_at(i, key, hash, lev, parent, start_gen, guard)
                        } else {
                            Err(Restart)
                        }
                    }
                    Branch::Single(snode) => {
                        if snode.key().borrow() != key {
                            return Ok(None);
                        }
                        let removed = snode.payload.clone();
                        let ncn = cn.removed(pos, flag, i.gen);
                        if !self.gcas(i, main, to_contracted(ncn, lev), guard) {
                            return Err(Restart);
                        }
                        if let Some(parent) = parent {
                            // The removal may have left a tombstone here;
                            // propagate the compaction one level up.
                            let main = self.gcas_read(i, guard);
                            if let MainKind::Tomb(_) = &unsafe { main.deref() }.kind {
                                self.clean_parent(
                                    parent,
                                    i,
                                    hash,
                                    lev - LEVEL_BITS,
                                    start_gen,
                                    guard,
                                );
                            }
                        }
                        Ok(Some(removed))
                    }
                }
            }
            MainKind::Tomb(_) => {
                self.clean(
                    parent.expect("tombstone directly under the root"),
                    lev - LEVEL_BITS,
                    guard,
                );
                Err(Restart)
            }
            MainKind::List(list) => {
                let (rest, removed) = match LNode::removed(list, key) {
                    Some(found) => found,
                    // Nothing matched; the list stays as it is.
                    None => return Ok(None),
                };
                let rest = rest.expect("published collision list with a single entry");
                let new_main = if rest.tail.is_none() {
                    // One entry left: entomb it so the parent compacts it.
                    entomb(Arc::clone(&rest.head))
                } else {
                    MainNode::new(MainKind::List(rest))
                };
                if self.gcas(i, main, new_main, guard) {
                    Ok(Some(removed))
                } else {
                    Err(Restart)
                }
            }
            MainKind::Failed => unreachable!("uncommitted main observed through gcas_read"),
        }
    }
}
