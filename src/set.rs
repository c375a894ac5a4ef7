//! A concurrent index set.
//!
//! See `SmallIntSet` for details.

use crate::hasher::{EqIndex, HashIndex};
use crate::iter::Indices;
use crate::raw::{Table, TableRef, Width};
use crate::reclaim::{Atomic, Collector, Guard, RetireShared, Shared};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::Ordering;

/// The smallest non-empty table capacity.
///
/// Inserting into a set whose table is smaller than this grows the table straight to this size.
pub(crate) const INLINE_CAPACITY: usize = 32;

/// Tables at least this large only double when they grow.
const DOUBLING_THRESHOLD: usize = 1 << 19;

/// Tables at most this large only double when they grow.
const SMALL_TABLE_THRESHOLD: usize = 1 << 8;

/// Returns the number of slots to grow a full table of `len` slots to.
///
/// Mid-sized tables quadruple so that a set that is still being filled does not rehash all of
/// its entries over and over. Very small and very large tables double.
pub(crate) fn next_capacity(len: usize) -> usize {
    if len < INLINE_CAPACITY {
        INLINE_CAPACITY
    } else if len >= DOUBLING_THRESHOLD || len <= SMALL_TABLE_THRESHOLD {
        len << 1
    } else {
        len << 2
    }
}

/// Receives the tables a [`SmallIntSet`] publishes.
///
/// Whenever a rehash replaces the set's table, the set calls [`Owner::adopt`] with the new
/// table after it has become visible to readers. The replaced table is not freed until no
/// reader can still be using it.
pub trait Owner {
    /// Called once for every table the set publishes.
    fn adopt(&self, table: TableRef<'_>) {
        let _ = table;
    }
}

impl Owner for () {}

impl<T: ?Sized + Owner> Owner for &T {
    fn adopt(&self, table: TableRef<'_>) {
        (**self).adopt(table)
    }
}

impl<T: ?Sized + Owner> Owner for std::sync::Arc<T> {
    fn adopt(&self, table: TableRef<'_>) {
        (**self).adopt(table)
    }
}

/// Exclusive permission to insert into a [`SmallIntSet`], obtained with [`SmallIntSet::write`].
///
/// Hold on to it across a lookup and the insert that follows a miss to keep other writers from
/// inserting the same entry in between.
pub struct WriteGuard<'set> {
    lock: MutexGuard<'set, ()>,
}

impl fmt::Debug for WriteGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteGuard").finish_non_exhaustive()
    }
}

/// A concurrent set of small integers that index into a dataset stored elsewhere.
///
/// The set stores only indices. Hashing and comparing an index goes through a dataset and the
/// [`HashIndex`] and [`EqIndex`] capabilities passed to each operation, so the same dataset and
/// capabilities must be used for every call on a given set.
///
/// Lookups never block and may run on any number of threads while another thread inserts.
/// Inserts require the [`WriteGuard`] returned by [`SmallIntSet::write`], which serializes
/// writers. Callers that already serialize writers on their own can use
/// [`SmallIntSet::insert_unchecked`] instead.
///
/// The set does not check for duplicates: inserting an index whose entry is already present
/// adds it a second time. [`SmallIntSet::lookup_or_insert`] performs the lookup and the insert
/// under the writer lock.
///
/// Slots are 8, 16 or 32 bits wide, whichever is narrowest for the largest stored index.
/// Indices must be smaller than `u32::MAX`.
///
/// # Examples
///
/// ```
/// use smallintset::SmallIntSet;
///
/// let data = [10u64, 20, 30];
/// let hash = |i: usize, data: &[u64]| data[i];
/// let eq = |i: usize, key: &u64, data: &[u64], _: u64| data[i] == *key;
///
/// let set = SmallIntSet::new();
/// let guard = set.guard();
/// {
///     let writer = set.write();
///     for i in 0..data.len() {
///         set.insert(&writer, i, &data[..], &hash, &guard);
///     }
/// }
///
/// assert_eq!(set.lookup(&20, 20, &data[..], &eq, &guard), Some(1));
/// assert_eq!(set.lookup(&40, 40, &data[..], &eq, &guard), None);
/// ```
pub struct SmallIntSet<O = ()> {
    /// The current table. Never null, and replaced as a whole by rehashing.
    table: Atomic<Table>,

    /// Serializes writers.
    writer: Mutex<()>,

    /// Reclaims replaced tables once no guard can observe them.
    collector: Collector,

    owner: O,
}

impl SmallIntSet<()> {
    /// Creates an empty `SmallIntSet`.
    ///
    /// The set is initially created with a capacity of 0, so it will not allocate slots until it
    /// is first inserted into.
    ///
    /// # Examples
    ///
    /// ```
    /// use smallintset::SmallIntSet;
    /// let set = SmallIntSet::new();
    /// assert_eq!(set.pin().capacity(), 0);
    /// ```
    pub fn new() -> Self {
        Self::with_owner(())
    }

    /// Creates an empty `SmallIntSet` with room for at least `capacity` slots.
    ///
    /// The set will still grow before `capacity` entries are inserted if their hashes cluster.
    /// If `capacity` is 0, the set will not allocate.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_owner(capacity, ())
    }
}

impl<O: Default> Default for SmallIntSet<O> {
    fn default() -> Self {
        Self::with_owner(O::default())
    }
}

impl<O> SmallIntSet<O> {
    /// Creates an empty set that reports every table it publishes to `owner`.
    pub fn with_owner(owner: O) -> Self {
        Self::with_table(Table::zeroed(0, 0), owner)
    }

    /// Creates an empty set with room for at least `capacity` slots that reports every table it
    /// publishes to `owner`.
    pub fn with_capacity_and_owner(capacity: usize, owner: O) -> Self {
        if capacity == 0 {
            return Self::with_owner(owner);
        }

        let len = capacity.next_power_of_two().max(INLINE_CAPACITY);
        Self::with_table(Table::zeroed(0, len), owner)
    }

    fn with_table(table: Table, owner: O) -> Self {
        let collector = Collector::new();
        Self {
            table: Atomic::from(Shared::boxed(table, &collector)),
            writer: Mutex::new(()),
            collector,
            owner,
        }
    }

    /// Returns a reference to the owner that receives published tables.
    pub fn owner(&self) -> &O {
        &self.owner
    }

    /// Pin a `Guard` for use with this set.
    ///
    /// Keep in mind that for as long as you hold onto this `Guard`, you are preventing the
    /// collection of tables replaced by rehashing.
    pub fn guard(&self) -> Guard<'_> {
        self.collector.enter()
    }

    #[inline]
    fn check_guard(&self, guard: &Guard<'_>) {
        // guard.collector() may be `None` if it is unprotected
        if let Some(c) = guard.collector() {
            assert!(
                Collector::ptr_eq(c, &self.collector),
                "guard does not belong to this set"
            );
        }
    }

    /// Acquires the writer lock of this set, blocking until no other writer holds it.
    pub fn write(&self) -> WriteGuard<'_> {
        WriteGuard {
            lock: self.writer.lock(),
        }
    }

    #[inline]
    fn check_writer(&self, writer: &WriteGuard<'_>) {
        assert!(
            std::ptr::eq(MutexGuard::mutex(&writer.lock), &self.writer),
            "write guard does not belong to this set"
        );
    }

    fn table<'g>(&self, ordering: Ordering, guard: &'g Guard<'_>) -> &'g Table {
        let table = self.table.load(ordering, guard);
        debug_assert!(!table.is_null());
        // safety: the table is never null, and we loaded it under `guard`. a table is only
        // retired after it has been replaced, so it cannot be freed before `guard` is dropped.
        unsafe { table.deref() }
    }

    /// Returns the number of slots in the current table.
    pub fn capacity(&self, guard: &Guard<'_>) -> usize {
        self.check_guard(guard);
        self.table(Ordering::Acquire, guard).len()
    }

    /// Returns the slot width of the current table.
    pub fn width(&self, guard: &Guard<'_>) -> Width {
        self.check_guard(guard);
        self.table(Ordering::Acquire, guard).width()
    }

    /// Returns the number of indices in the set.
    ///
    /// This walks every slot of the current table.
    pub fn len(&self, guard: &Guard<'_>) -> usize {
        self.indices(guard).count()
    }

    /// Returns `true` if the set holds no indices.
    pub fn is_empty(&self, guard: &Guard<'_>) -> bool {
        self.indices(guard).next().is_none()
    }

    /// An iterator visiting all stored indices in slot order.
    ///
    /// The iterator walks the table that was current when it was created, so indices inserted
    /// after a later rehash are not observed.
    pub fn indices<'g>(&'g self, guard: &'g Guard<'_>) -> Indices<'g> {
        self.check_guard(guard);
        Indices::new(self.table(Ordering::Acquire, guard))
    }

    /// Searches the set for an index whose entry matches `key`.
    ///
    /// `hash` must be the hash that `hasher.hash_index` produces for a matching entry. Entries
    /// are compared with `eq`, which only ever sees indices that have been inserted.
    ///
    /// This never blocks and may run concurrently with inserts. An index whose insert finished
    /// before this call started is always found.
    pub fn lookup<Q, D, E>(
        &self,
        key: &Q,
        hash: u64,
        data: &D,
        eq: &E,
        guard: &Guard<'_>,
    ) -> Option<usize>
    where
        Q: ?Sized,
        D: ?Sized,
        E: ?Sized + EqIndex<Q, D>,
    {
        self.check_guard(guard);
        // the table is read once; a concurrent rehash leaves it intact
        self.table(Ordering::Acquire, guard).find(key, hash, data, eq)
    }
}

impl<O: Owner> SmallIntSet<O> {
    /// Adds dataset index `value` to the set.
    ///
    /// The set does not check whether an entry matching `value` is already present.
    ///
    /// # Panics
    ///
    /// Panics if `writer` was not obtained from this set, or if `value + 1` does not fit in 32
    /// bits.
    pub fn insert<D, H>(
        &self,
        writer: &WriteGuard<'_>,
        value: usize,
        data: &D,
        hasher: &H,
        guard: &Guard<'_>,
    ) where
        D: ?Sized,
        H: ?Sized + HashIndex<D>,
    {
        self.check_writer(writer);
        // safety: we hold this set's writer lock.
        unsafe { self.insert_unchecked(value, data, hasher, guard) }
    }

    /// Adds dataset index `value` to the set without taking the writer lock.
    ///
    /// # Safety
    ///
    /// No other insert may run on this set at the same time. Lookups may.
    pub unsafe fn insert_unchecked<D, H>(
        &self,
        value: usize,
        data: &D,
        hasher: &H,
        guard: &Guard<'_>,
    ) where
        D: ?Sized,
        H: ?Sized + HashIndex<D>,
    {
        self.check_guard(guard);
        let encoded = match value.checked_add(1) {
            Some(encoded) => encoded,
            None => panic!("{} does not fit in the widest supported slot", value),
        };

        let table = self.table(Ordering::Relaxed, guard);
        if encoded > table.width().max_value() {
            // widen the slots first, whatever the occupancy
            self.rehash(table.len(), encoded, data, hasher, guard);
        }

        let hash = hasher.hash_index(value, data);
        loop {
            // only the writer stores the table pointer, so a relaxed load sees the latest one
            let table = self.table(Ordering::Relaxed, guard);
            if table.try_insert(hash, encoded) {
                return;
            }

            // the table is full as far as this probe sequence is concerned.
            // grow quickly; otherwise we waste lots of time rehashing the same entries.
            self.rehash(next_capacity(table.len()), encoded, data, hasher, guard);
        }
    }

    /// Returns the index of the entry matching `key`, inserting one if there is none.
    ///
    /// The lookup is first attempted without locking. On a miss the writer lock is taken, the
    /// lookup is repeated, and if it misses again `make` is called to add the entry to `data`.
    /// `make` returns the index of the new entry, which is then inserted and returned.
    pub fn lookup_or_insert<Q, D, C, F>(
        &self,
        key: &Q,
        hash: u64,
        data: &D,
        cx: &C,
        make: F,
        guard: &Guard<'_>,
    ) -> usize
    where
        Q: ?Sized,
        D: ?Sized,
        C: ?Sized + HashIndex<D> + EqIndex<Q, D>,
        F: FnOnce(&D) -> usize,
    {
        if let Some(index) = self.lookup(key, hash, data, cx, guard) {
            return index;
        }

        let writer = self.write();
        // another writer may have added it while we waited for the lock
        if let Some(index) = self.lookup(key, hash, data, cx, guard) {
            return index;
        }
        let index = make(data);
        self.insert(&writer, index, data, cx, guard);
        index
    }

    /// Replaces the current table with one of at least `len` slots that is wide enough for
    /// `max_value`. The new table is never narrower than the current one.
    ///
    /// Only the writer may call this.
    fn rehash<D, H>(
        &self,
        mut len: usize,
        max_value: usize,
        data: &D,
        hasher: &H,
        guard: &Guard<'_>,
    ) where
        D: ?Sized,
        H: ?Sized + HashIndex<D>,
    {
        let old = self.table.load(Ordering::Relaxed, guard);
        // safety: see `SmallIntSet::table`.
        let old_table = unsafe { old.deref() };
        // every stored value fits the current width, and the width never shrinks
        let max_value = old_table.width().max_value().max(max_value);

        let table = loop {
            let table = Table::zeroed(max_value, len);
            let complete = Indices::new(old_table)
                .all(|i| table.try_insert(hasher.hash_index(i, data), i + 1));
            if complete {
                break table;
            }

            // a cluster exhausted the probe limit even at this size
            debug_assert!(len > 1);
            #[cfg(feature = "logging")]
            log::trace!("rehash into {} slots overflowed, retrying with {}", len, len << 1);
            len <<= 1;
        };

        #[cfg(feature = "logging")]
        log::debug!(
            "rehashed index set from {} {:?} slots to {} {:?} slots",
            old_table.len(),
            old_table.width(),
            table.len(),
            table.width()
        );

        let new = Shared::boxed(table, &self.collector);
        // every slot store above happens-before this, so readers that see the new table also
        // see its contents
        self.table.store(new, Ordering::Release);

        // safety: we just allocated the table, and only the writer (us) could retire it.
        self.owner.adopt(TableRef::new(unsafe { new.deref() }));

        // safety: `old` is no longer reachable through `self.table`. readers that loaded it
        // before the store above hold guards, which keep it alive until they are dropped.
        unsafe { guard.retire_shared(old) };
    }
}

impl<O> Drop for SmallIntSet<O> {
    fn drop(&mut self) {
        let table = std::mem::replace(&mut self.table, Atomic::null());
        // safety: we have &mut self, so there are no outstanding guards for this set. the current
        // table is never retired, so we are the only ones who can free it. retired tables are
        // freed when the collector is dropped.
        drop(unsafe { table.into_box() });
    }
}

impl<O> fmt::Debug for SmallIntSet<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.guard();
        f.debug_set().entries(self.indices(&guard)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::max_probe;
    use std::sync::atomic::AtomicUsize;

    fn identity(i: usize, _: &()) -> u64 {
        i as u64
    }

    fn same(i: usize, key: &usize, _: &(), _: u64) -> bool {
        i == *key
    }

    #[derive(Default)]
    struct Adoptions {
        count: AtomicUsize,
        last_len: AtomicUsize,
    }

    impl Owner for Adoptions {
        fn adopt(&self, table: TableRef<'_>) {
            self.count.fetch_add(1, Ordering::Relaxed);
            self.last_len.store(table.len(), Ordering::Relaxed);
        }
    }

    #[test]
    fn growth_policy() {
        assert_eq!(next_capacity(0), INLINE_CAPACITY);
        assert_eq!(next_capacity(1), INLINE_CAPACITY);
        assert_eq!(next_capacity(16), INLINE_CAPACITY);
        assert_eq!(next_capacity(32), 64);
        assert_eq!(next_capacity(256), 512);
        assert_eq!(next_capacity(512), 2048);
        assert_eq!(next_capacity(1 << 18), 1 << 20);
        assert_eq!(next_capacity(1 << 19), 1 << 20);
    }

    #[test]
    fn first_insert_grows_to_inline_capacity() {
        let set = SmallIntSet::new();
        let guard = set.guard();
        assert_eq!(set.capacity(&guard), 0);
        set.insert(&set.write(), 3, &(), &identity, &guard);
        assert_eq!(set.capacity(&guard), INLINE_CAPACITY);
        assert_eq!(set.width(&guard), Width::U8);
        assert_eq!(set.lookup(&3, 3, &(), &same, &guard), Some(3));
    }

    #[test]
    fn presized() {
        let set = SmallIntSet::with_capacity(100);
        let guard = set.guard();
        assert_eq!(set.capacity(&guard), 128);
        let small = SmallIntSet::with_capacity(3);
        let guard = small.guard();
        assert_eq!(small.capacity(&guard), INLINE_CAPACITY);
        let empty = SmallIntSet::with_capacity(0);
        let guard = empty.guard();
        assert_eq!(empty.capacity(&guard), 0);
    }

    #[test]
    fn wide_value_forces_rehash() {
        let set = SmallIntSet::with_owner(Adoptions::default());
        let guard = set.guard();
        let writer = set.write();
        for i in 0..10 {
            set.insert(&writer, i, &(), &identity, &guard);
        }
        let adopted = set.owner().count.load(Ordering::Relaxed);
        assert_eq!(set.width(&guard), Width::U8);

        set.insert(&writer, 70_000, &(), &identity, &guard);
        assert_eq!(set.width(&guard), Width::U32);
        // widening does not need a bigger table
        assert_eq!(set.capacity(&guard), INLINE_CAPACITY);
        assert_eq!(set.owner().count.load(Ordering::Relaxed), adopted + 1);
        for i in (0..10).chain(Some(70_000)) {
            assert_eq!(set.lookup(&i, i as u64, &(), &same, &guard), Some(i));
        }
    }

    #[test]
    fn wide_first_insert_keeps_width() {
        let set = SmallIntSet::new();
        let guard = set.guard();
        set.insert(&set.write(), 300, &(), &identity, &guard);
        assert_eq!(set.capacity(&guard), INLINE_CAPACITY);
        assert_eq!(set.width(&guard), Width::U16);
        assert_eq!(set.lookup(&300, 300, &(), &same, &guard), Some(300));
        assert_eq!(set.indices(&guard).collect::<Vec<_>>(), vec![300]);
    }

    #[test]
    fn widen_then_grow_keeps_width() {
        // every index hashes to the same slot, so the widened table is full for the new value
        let collide = |_: usize, _: &()| 0u64;
        let eq = |i: usize, key: &usize, _: &(), _: u64| i == *key;
        let set = SmallIntSet::with_capacity(INLINE_CAPACITY);
        let guard = set.guard();
        let writer = set.write();
        let mut width = set.width(&guard);
        for i in (0..=max_probe(INLINE_CAPACITY)).chain([1_000, 70_000, 7]) {
            set.insert(&writer, i, &(), &collide, &guard);
            assert!(set.width(&guard) >= width);
            width = set.width(&guard);
        }
        assert_eq!(width, Width::U32);
        assert!(set.capacity(&guard) > INLINE_CAPACITY);
        for i in (0..=max_probe(INLINE_CAPACITY)).chain([1_000, 70_000, 7]) {
            assert_eq!(set.lookup(&i, 0, &(), &eq, &guard), Some(i));
        }
    }

    #[test]
    #[should_panic(expected = "does not fit in the widest supported slot")]
    fn largest_index_is_rejected() {
        let set = SmallIntSet::new();
        let guard = set.guard();
        set.insert(&set.write(), usize::MAX, &(), &identity, &guard);
    }

    #[test]
    fn owner_adopts_every_published_table() {
        let set = SmallIntSet::with_owner(Adoptions::default());
        let guard = set.guard();
        let writer = set.write();
        let mut capacity = set.capacity(&guard);
        let mut rehashes = 0;
        for i in 0..1000 {
            set.insert(&writer, i, &(), &identity, &guard);
            let now = set.capacity(&guard);
            if now != capacity {
                rehashes += 1;
                capacity = now;
            }
        }
        // the 255 -> 16-bit widening happens at the same capacity
        assert_eq!(set.owner().count.load(Ordering::Relaxed), rehashes + 1);
        assert_eq!(set.owner().last_len.load(Ordering::Relaxed), capacity);
    }

    #[test]
    fn clustered_rehash_retries_larger() {
        // every index hashes to the same slot, so each rehash must fit the whole cluster
        let collide = |_: usize, _: &()| 0u64;
        let set = SmallIntSet::new();
        let guard = set.guard();
        let writer = set.write();
        for i in 0..40 {
            set.insert(&writer, i, &(), &collide, &guard);
        }
        assert_eq!(set.len(&guard), 40);
        let eq = |i: usize, key: &usize, _: &(), _: u64| i == *key;
        for i in 0..40 {
            assert_eq!(set.lookup(&i, 0, &(), &eq, &guard), Some(i));
        }
        // a cluster of 40 needs max_probe(len) >= 39, i.e. len >= 64 * 39
        assert!(set.capacity(&guard) >= 64 * 39);
    }

    #[test]
    #[should_panic(expected = "write guard does not belong to this set")]
    fn foreign_writer() {
        let a = SmallIntSet::new();
        let b = SmallIntSet::new();
        let guard = a.guard();
        let writer = b.write();
        a.insert(&writer, 0, &(), &identity, &guard);
    }

    #[test]
    #[should_panic(expected = "guard does not belong to this set")]
    fn foreign_guard() {
        let a = SmallIntSet::new();
        let b = SmallIntSet::new();
        let guard = b.guard();
        a.lookup(&0, 0, &(), &same, &guard);
    }

    #[test]
    fn debug_lists_indices() {
        let set = SmallIntSet::new();
        let guard = set.guard();
        set.insert(&set.write(), 2, &(), &identity, &guard);
        assert_eq!(format!("{:?}", set), "{2}");
    }
}
