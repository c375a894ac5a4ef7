use crate::hasher::{EqIndex, HashIndex};
use crate::iter::Indices;
use crate::raw::Width;
use crate::reclaim::{Guard, GuardRef};
use crate::set::{Owner, WriteGuard};
use crate::SmallIntSet;
use std::fmt::{self, Debug, Formatter};

/// A reference to a [`SmallIntSet`], constructed with [`SmallIntSet::pin`] or
/// [`SmallIntSet::with_guard`].
///
/// The current thread will be pinned for the duration of this reference.
/// Keep in mind that this prevents the collection of tables replaced by rehashing.
pub struct SmallIntSetRef<'set, O = ()> {
    set: &'set SmallIntSet<O>,
    guard: GuardRef<'set>,
}

impl<O> SmallIntSet<O> {
    /// Get a reference to this set with the current thread pinned.
    ///
    /// Keep in mind that for as long as you hold onto this, you are preventing the collection of
    /// tables replaced by rehashing.
    pub fn pin(&self) -> SmallIntSetRef<'_, O> {
        SmallIntSetRef {
            guard: GuardRef::Owned(self.guard()),
            set: self,
        }
    }

    /// Get a reference to this set with the given guard.
    pub fn with_guard<'g>(&'g self, guard: &'g Guard<'_>) -> SmallIntSetRef<'g, O> {
        SmallIntSetRef {
            set: self,
            guard: GuardRef::Ref(guard),
        }
    }
}

impl<O> SmallIntSetRef<'_, O> {
    /// Returns the number of slots in the current table.
    /// See also [`SmallIntSet::capacity`].
    pub fn capacity(&self) -> usize {
        self.set.capacity(&self.guard)
    }

    /// Returns the slot width of the current table.
    /// See also [`SmallIntSet::width`].
    pub fn width(&self) -> Width {
        self.set.width(&self.guard)
    }

    /// Returns the number of indices in the set.
    /// See also [`SmallIntSet::len`].
    pub fn len(&self) -> usize {
        self.set.len(&self.guard)
    }

    /// Returns `true` if the set holds no indices.
    /// See also [`SmallIntSet::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.set.is_empty(&self.guard)
    }

    /// An iterator visiting all stored indices in slot order.
    /// See also [`SmallIntSet::indices`].
    pub fn indices(&self) -> Indices<'_> {
        self.set.indices(&self.guard)
    }

    /// Searches the set for an index whose entry matches `key`.
    /// See also [`SmallIntSet::lookup`].
    pub fn lookup<Q, D, E>(&self, key: &Q, hash: u64, data: &D, eq: &E) -> Option<usize>
    where
        Q: ?Sized,
        D: ?Sized,
        E: ?Sized + EqIndex<Q, D>,
    {
        self.set.lookup(key, hash, data, eq, &self.guard)
    }
}

impl<O: Owner> SmallIntSetRef<'_, O> {
    /// Adds dataset index `value` to the set.
    /// See also [`SmallIntSet::insert`].
    pub fn insert<D, H>(&self, writer: &WriteGuard<'_>, value: usize, data: &D, hasher: &H)
    where
        D: ?Sized,
        H: ?Sized + HashIndex<D>,
    {
        self.set.insert(writer, value, data, hasher, &self.guard)
    }

    /// Returns the index of the entry matching `key`, inserting one if there is none.
    /// See also [`SmallIntSet::lookup_or_insert`].
    pub fn lookup_or_insert<Q, D, C, F>(
        &self,
        key: &Q,
        hash: u64,
        data: &D,
        cx: &C,
        make: F,
    ) -> usize
    where
        Q: ?Sized,
        D: ?Sized,
        C: ?Sized + HashIndex<D> + EqIndex<Q, D>,
        F: FnOnce(&D) -> usize,
    {
        self.set.lookup_or_insert(key, hash, data, cx, make, &self.guard)
    }
}

impl<O> Clone for SmallIntSetRef<'_, O> {
    fn clone(&self) -> Self {
        self.set.pin()
    }
}

impl<O> Debug for SmallIntSetRef<'_, O> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.indices()).finish()
    }
}
