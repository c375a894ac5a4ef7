//! A compact concurrent index of small integers.
//!
//! [`SmallIntSet`] is an open-addressed hash table whose slots hold indices into a dataset that
//! lives somewhere else, such as an append-only list of interned types or cached methods. The
//! set answers a single question: does an entry matching this key already exist, and if so,
//! at which index? Since only the indices are stored, every operation is given the dataset along
//! with the capabilities to hash an entry by index ([`HashIndex`]) and to compare an entry with
//! a lookup key ([`EqIndex`]). Plain closures implement both, and [`IndexHasher`] implements them
//! for slices using any [`BuildHasher`](std::hash::BuildHasher).
//!
//! # Readers and writers
//!
//! Any number of threads may call [`SmallIntSet::lookup`] at the same time, including while an
//! insert is running. Lookups never block, never allocate and never modify the set.
//!
//! Inserts are not synchronized internally: only one insert may run at a time. The set hands out
//! a single [`WriteGuard`] at a time through [`SmallIntSet::write`], and [`SmallIntSet::insert`]
//! requires one. Hold the guard across a lookup and the insert that follows a miss, or use
//! [`SmallIntSet::lookup_or_insert`], so that two writers do not both add the same entry. If the
//! surrounding code already makes sure that there is only ever one writer, the unsafe
//! [`SmallIntSet::insert_unchecked`] skips the lock.
//!
//! An index is visible to every lookup that starts after its insert has returned. If the
//! dataset entry it refers to was fully written before the insert, a lookup that finds the index
//! also observes the complete entry.
//!
//! # A note on `Guard` and memory use
//!
//! When the set grows, it builds a new table and swaps it in while readers may still be walking
//! the old one. The old table is therefore not freed right away; instead it is retired and freed
//! once no thread can still be reading it. Threads announce that they may be reading a table by
//! holding a [`Guard`], obtained with [`SmallIntSet::guard`], or implicitly through
//! [`SmallIntSet::pin`]. Holding a guard for a long time keeps every table retired after it was
//! obtained alive, so prefer short-lived guards on threads that rarely use the set.
//!
//! Guards are tied to the set they were obtained from; passing a guard to a different set
//! panics.
//!
//! # Table layout
//!
//! Tables have a power-of-two number of slots. A slot holding 0 is empty, and a slot holding
//! `v` refers to dataset index `v - 1`. Slots are 8, 16 or 32 bits wide, whichever is narrowest
//! for the largest stored value, so a set of a few hundred entries costs a few hundred bytes.
//! Inserting an index that does not fit the current width rebuilds the table with wider slots.
//!
//! Collisions are resolved by probing the following slots. A probe gives up after 16 extra
//! slots for tables of up to 1024 slots, and after `len / 64` extra slots for larger ones. When
//! an insert gives up, the table grows and every entry is reinserted; entries are never
//! removed, so there is no tombstone handling and a lookup stops at the first empty slot.
//!
//! # Resizing behavior
//!
//! An empty set has no slots. The first insert allocates 32 of them. From there, tables of up to
//! 256 slots and tables of at least 2^19 slots double when they fill up, while tables in between
//! quadruple. If the entries still do not fit once the table has been rebuilt (because their
//! hashes cluster), the new table is doubled until they do.
//!
//! Every published table is also passed to the set's [`Owner`], which lets the code that owns
//! the set account for the new table.
#![deny(
    missing_docs,
    missing_debug_implementations,
    unreachable_pub,
    rustdoc::broken_intra_doc_links
)]
#![warn(rust_2018_idioms)]

mod hasher;
mod iter;
mod raw;
mod reclaim;
mod set;
mod set_ref;

pub use hasher::{EqIndex, HashIndex, IndexFns, IndexHasher};
pub use iter::Indices;
pub use raw::{TableRef, Width};
pub use seize::Guard;
pub use set::{Owner, SmallIntSet, WriteGuard};
pub use set_ref::SmallIntSetRef;

/// Default hasher for [`IndexHasher`].
pub type DefaultHashBuilder = ahash::RandomState;
