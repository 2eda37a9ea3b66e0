//! Customization of what the trie stores.

use std::borrow::Borrow;
use std::hash::Hash;
use std::marker::PhantomData;

/// Describes the payload stored in the [`Raw`][crate::raw::Raw] trie and
/// the key it is addressed by.
///
/// The payload must be able to lend the key out (`Borrow`) and must be
/// cheap enough to clone, because lookups and removals hand out clones
/// (in a concurrent structure the original may be reclaimed at any point
/// after the reader unpins). Wrapping payloads in an `Arc` is the usual
/// answer when cloning the data itself is too expensive.
pub trait Config {
    /// The stored value.
    type Payload: Clone + Borrow<Self::Key>;
    /// The key the payload is addressed by.
    type Key: Hash + Eq;
}

/// A configuration where the payload and the key are the same thing, for
/// set-like use.
pub struct Trivial<T>(PhantomData<T>);

impl<T> Config for Trivial<T>
where
    T: Clone + Hash + Eq,
{
    type Payload = T;
    type Key = T;
}
