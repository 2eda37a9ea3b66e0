//! A module containing few debug utilities.
//!
//! In general, they are meant for debugging the *trie itself*, but it is exposed as potentially
//! useful.

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

use crossbeam_epoch::Guard;

use super::config::Config;
use super::node::{Branch, INode, MainKind, MainNode};
use super::Raw;

impl<C, S> Raw<C, S>
where
    C: Config,
{
    // Hack: &mut to make sure it is not shared between threads and nobody is modifying the thing
    // right now.
    /// Panics if the quiescent trie violates its shape invariants.
    ///
    /// Checked: the root main is a C-node; bitmaps agree with branch
    /// counts; every singleton sits on the path its hash selects; no
    /// non-root C-node holds a lone singleton (those must contract into
    /// tombstones); collision lists appear only below the hash space and
    /// hold at least two fully-colliding entries; no GCAS is left half
    /// done.
    #[cfg(test)]
    pub(crate) fn assert_well_formed(&mut self) {
        use super::node::{HASH_BITS, LEVEL_BITS};

        fn check_prefix(hash: u32, prefix: u32, lev: u32) {
            if lev < HASH_BITS {
                let mask = (1u32 << lev) - 1;
                assert_eq!(
                    prefix,
                    hash & mask,
                    "entry hashed {:08x} sits on path {:08x}",
                    hash,
                    prefix,
                );
            }
        }

        fn check_main<C: Config>(main: &MainNode<C>, prefix: u32, lev: u32, pin: &Guard) {
            assert!(
                main.prev.load(pin).is_null(),
                "a GCAS was left in flight on a quiescent trie"
            );
            match &main.kind {
                MainKind::Container(cn) => {
                    assert_eq!(
                        cn.bmp.count_ones() as usize,
                        cn.branches.len(),
                        "bitmap does not match the branch array"
                    );
                    if lev > 0 && cn.branches.len() == 1 {
                        assert!(
                            !matches!(cn.branches[0], Branch::Single(_)),
                            "uncontracted C-node with a lone singleton"
                        );
                    }
                    let mut bits = cn.bmp;
                    for branch in &cn.branches {
                        let idx = bits.trailing_zeros();
                        bits &= bits - 1;
                        let prefix = prefix | (idx << lev);
                        match branch {
                            Branch::Single(snode) => {
                                check_prefix(snode.hash, prefix, lev + LEVEL_BITS)
                            }
                            Branch::Indirect(inode) => {
                                check_inode(inode, prefix, lev + LEVEL_BITS, pin)
                            }
                        }
                    }
                }
                MainKind::Tomb(snode) => check_prefix(snode.hash, prefix, lev),
                MainKind::List(list) => {
                    assert!(lev >= HASH_BITS, "collision list above the hash space");
                    assert!(list.tail.is_some(), "published collision list of one");
                    let hash = list.head.hash;
                    let mut node = list;
                    loop {
                        assert_eq!(hash, node.head.hash, "non-colliding entry in a list");
                        match &node.tail {
                            Some(tail) => node = tail,
                            None => break,
                        }
                    }
                }
                MainKind::Failed => panic!("failure marker reachable as a main node"),
            }
        }

        fn check_inode<C: Config>(inode: &INode<C>, prefix: u32, lev: u32, pin: &Guard) {
            assert!(inode.rdcss.is_none(), "descriptor wrapper inside the tree");
            let main = inode.main.load(pin);
            check_main(unsafe { main.deref() }, prefix, lev, pin);
        }

        // Unprotected is fine, we are &mut so nobody else is allowed to do
        // stuff to us at the moment.
        let pin = unsafe { crossbeam_epoch::unprotected() };
        let root = self.root.load(pin);
        let root = unsafe { root.deref() };
        assert!(root.rdcss.is_none(), "RDCSS left unfinished on the root");
        let main = root.main.load(pin);
        assert!(
            matches!(unsafe { &main.deref().kind }, MainKind::Container(_)),
            "the root must hold a C-node"
        );
        check_main(unsafe { main.deref() }, 0, 0, pin);
    }

    fn print_shape_main(main: &MainNode<C>, fmt: &mut Formatter, pin: &Guard) -> FmtResult
    where
        C::Payload: Debug,
    {
        match &main.kind {
            MainKind::Container(cn) => {
                write!(fmt, "C<{:08x}>(", cn.bmp)?;
                for branch in &cn.branches {
                    match branch {
                        Branch::Single(snode) => write!(fmt, " {:?}", snode.payload)?,
                        Branch::Indirect(inode) => {
                            write!(fmt, " ")?;
                            Self::print_shape_inode(inode, fmt, pin)?;
                        }
                    }
                }
                write!(fmt, " )")
            }
            MainKind::Tomb(snode) => write!(fmt, "T[{:?}]", snode.payload),
            MainKind::List(list) => {
                write!(fmt, "L[")?;
                let mut node = list;
                loop {
                    write!(fmt, " {:?}", node.head.payload)?;
                    match &node.tail {
                        Some(tail) => node = tail,
                        None => break,
                    }
                }
                write!(fmt, " ]")
            }
            MainKind::Failed => write!(fmt, "FAILED"),
        }
    }

    fn print_shape_inode(inode: &INode<C>, fmt: &mut Formatter, pin: &Guard) -> FmtResult
    where
        C::Payload: Debug,
    {
        let main = inode.main.load(pin);
        write!(fmt, "I{{")?;
        if main.is_null() {
            write!(fmt, "null")?;
        } else {
            Self::print_shape_main(unsafe { main.deref() }, fmt, pin)?;
        }
        write!(fmt, "}}")
    }

    fn print_shape(&self, fmt: &mut Formatter) -> FmtResult
    where
        C::Payload: Debug,
    {
        let pin = crossbeam_epoch::pin();
        let root = self.root.load(&pin);
        Self::print_shape_inode(unsafe { root.deref() }, fmt, &pin)
    }
}

/// A pretty-printing wrapper around the raw trie.
///
/// The structure, including bitmaps and node kinds, is printed if this is used to wrap the raw
/// trie.
pub struct PrintShape<'a, C, S>(pub &'a Raw<C, S>)
where
    C: Config;

impl<C, S> Display for PrintShape<'_, C, S>
where
    C: Config,
    C::Payload: Debug,
{
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        self.0.print_shape(fmt)
    }
}
