use crate::hasher::EqIndex;
use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

/// Tables up to this many slots use a fixed probe limit.
const SMALL_TABLE: usize = 1024;

/// The probe limit for tables of at most [`SMALL_TABLE`] slots.
const SMALL_TABLE_PROBES: usize = 16;

/// Returns the largest number of steps a probe sequence may take in a table of `len` slots.
///
/// A probe visits at most `max_probe(len) + 1` slots. Large tables get proportionally fewer
/// probes since a long cluster at that scale means the table is effectively full.
#[inline]
pub(crate) fn max_probe(len: usize) -> usize {
    if len <= SMALL_TABLE {
        SMALL_TABLE_PROBES
    } else {
        len >> 6
    }
}

/// The width of the slots in a table.
///
/// A table always uses the narrowest width that can hold its largest stored value, which is
/// one more than the largest dataset index it contains.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Width {
    /// 8-bit slots, for dataset indices below `0xFF`.
    U8,
    /// 16-bit slots, for dataset indices below `0xFFFF`.
    U16,
    /// 32-bit slots, for dataset indices below `0xFFFF_FFFF`.
    U32,
}

impl Width {
    /// Returns the narrowest width whose slots can store `value`.
    ///
    /// # Panics
    ///
    /// Panics if `value` does not fit in 32 bits.
    pub fn for_value(value: usize) -> Self {
        if value <= Width::U8.max_value() {
            Width::U8
        } else if value <= Width::U16.max_value() {
            Width::U16
        } else if value as u64 <= u32::MAX as u64 {
            Width::U32
        } else {
            panic!("{} does not fit in the widest supported slot", value);
        }
    }

    /// The largest value a slot of this width can store.
    pub const fn max_value(self) -> usize {
        match self {
            Width::U8 => u8::MAX as usize,
            Width::U16 => u16::MAX as usize,
            Width::U32 => u32::MAX as usize,
        }
    }

    /// The number of bits in a slot of this width.
    pub const fn bits(self) -> u32 {
        match self {
            Width::U8 => u8::BITS,
            Width::U16 => u16::BITS,
            Width::U32 => u32::BITS,
        }
    }
}

enum Slots {
    U8(Box<[AtomicU8]>),
    U16(Box<[AtomicU16]>),
    U32(Box<[AtomicU32]>),
}

macro_rules! zeroed {
    ($atomic:ty, $len:expr) => {
        (0..$len).map(|_| <$atomic>::new(0)).collect()
    };
}

impl Slots {
    fn zeroed(width: Width, len: usize) -> Self {
        match width {
            Width::U8 => Slots::U8(zeroed!(AtomicU8, len)),
            Width::U16 => Slots::U16(zeroed!(AtomicU16, len)),
            Width::U32 => Slots::U32(zeroed!(AtomicU32, len)),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        match self {
            Slots::U8(s) => s.len(),
            Slots::U16(s) => s.len(),
            Slots::U32(s) => s.len(),
        }
    }

    #[inline]
    fn load(&self, i: usize, ordering: Ordering) -> usize {
        match self {
            Slots::U8(s) => s[i].load(ordering) as usize,
            Slots::U16(s) => s[i].load(ordering) as usize,
            Slots::U32(s) => s[i].load(ordering) as usize,
        }
    }

    #[inline]
    fn store(&self, i: usize, value: usize, ordering: Ordering) {
        match self {
            Slots::U8(s) => s[i].store(value as u8, ordering),
            Slots::U16(s) => s[i].store(value as u16, ordering),
            Slots::U32(s) => s[i].store(value as u32, ordering),
        }
    }
}

/// A bounded linear probe sequence over a power-of-two table.
pub(crate) struct Probe {
    /// The slot to visit next.
    pub(crate) i: usize,
    start: usize,
    mask: usize,
    steps: usize,
    limit: usize,
}

impl Probe {
    #[inline]
    pub(crate) fn start(hash: u64, len: usize) -> Self {
        debug_assert!(len.is_power_of_two());
        let mask = len - 1;
        let i = (hash & mask as u64) as usize;
        Probe {
            i,
            start: i,
            mask,
            steps: 0,
            limit: max_probe(len),
        }
    }

    /// Moves to the following slot, returning `false` once the probe limit is exceeded or the
    /// sequence has wrapped around to where it started.
    #[inline]
    pub(crate) fn next(&mut self) -> bool {
        self.i = (self.i + 1) & self.mask;
        self.steps += 1;
        self.steps <= self.limit && self.i != self.start
    }
}

/// A fixed-size array of slots holding encoded dataset indices.
///
/// A slot value of 0 is empty, any other value `v` refers to dataset index `v - 1`. Once a
/// table has been replaced by a rehash it is never written to again.
pub(crate) struct Table {
    slots: Slots,
    width: Width,
}

impl Table {
    /// Allocates a table of `len` empty slots wide enough to store `max_value`.
    pub(crate) fn zeroed(max_value: usize, len: usize) -> Self {
        let width = Width::for_value(max_value);
        Self {
            slots: Slots::zeroed(width, len),
            width,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn width(&self) -> Width {
        self.width
    }

    /// Reads the raw value of slot `i`.
    #[inline]
    pub(crate) fn slot(&self, i: usize, ordering: Ordering) -> usize {
        self.slots.load(i, ordering)
    }

    /// Searches for an entry matching `key`, returning its dataset index.
    pub(crate) fn find<Q, D, E>(&self, key: &Q, hash: u64, data: &D, eq: &E) -> Option<usize>
    where
        Q: ?Sized,
        D: ?Sized,
        E: ?Sized + EqIndex<Q, D>,
    {
        if self.len() == 0 {
            return None;
        }

        let mut probe = Probe::start(hash, self.len());
        loop {
            // pairs with the release store in `try_insert`, so that the entry the slot refers to
            // is fully visible to us if we see the slot.
            let v = self.slot(probe.i, Ordering::Acquire);
            if v == 0 {
                // entries are never removed or displaced, so nothing past an empty slot can match
                return None;
            }
            if eq.eq_index(v - 1, key, data, hash) {
                return Some(v - 1);
            }
            if !probe.next() {
                return None;
            }
        }
    }

    /// Stores `encoded` in the first empty slot of its probe sequence.
    ///
    /// Returns `false` if the probe limit was reached without finding a free slot, in which case
    /// the table must grow. Only the writer may call this.
    pub(crate) fn try_insert(&self, hash: u64, encoded: usize) -> bool {
        debug_assert_ne!(encoded, 0);
        // a narrower slot would silently store a different index
        assert!(
            encoded <= self.width.max_value(),
            "{} does not fit in a {:?} slot",
            encoded,
            self.width
        );
        if self.len() <= 1 {
            return false;
        }

        let mut probe = Probe::start(hash, self.len());
        loop {
            // no-one else writes to this table, so a relaxed read sees our own latest store
            if self.slot(probe.i, Ordering::Relaxed) == 0 {
                self.slots.store(probe.i, encoded, Ordering::Release);
                return true;
            }
            if !probe.next() {
                return false;
            }
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("len", &self.len())
            .field("width", &self.width)
            .finish()
    }
}

/// A read-only view of one table of a [`SmallIntSet`](crate::SmallIntSet).
///
/// Handed to [`Owner::adopt`](crate::Owner::adopt) whenever a rehash publishes a new table.
#[derive(Clone, Copy)]
pub struct TableRef<'g> {
    pub(crate) table: &'g Table,
}

impl<'g> TableRef<'g> {
    pub(crate) fn new(table: &'g Table) -> Self {
        Self { table }
    }

    /// The number of slots in the table.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the table has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// The slot width of the table.
    pub fn width(&self) -> Width {
        self.table.width()
    }

    /// Returns the dataset index stored in slot `i`, or `None` if the slot is empty.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    pub fn get(&self, i: usize) -> Option<usize> {
        self.table.slot(i, Ordering::Acquire).checked_sub(1)
    }

    /// An iterator over the dataset indices stored in the table, in slot order.
    pub fn indices(&self) -> crate::iter::Indices<'g> {
        crate::iter::Indices::new(self.table)
    }
}

impl fmt::Debug for TableRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.table, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn never(calls: &Cell<usize>) -> impl Fn(usize, &(), &(), u64) -> bool + '_ {
        move |_, _, _, _| {
            calls.set(calls.get() + 1);
            false
        }
    }

    #[test]
    fn width_for_value() {
        assert_eq!(Width::for_value(0), Width::U8);
        assert_eq!(Width::for_value(0xFF), Width::U8);
        assert_eq!(Width::for_value(0x100), Width::U16);
        assert_eq!(Width::for_value(0xFFFF), Width::U16);
        assert_eq!(Width::for_value(0x1_0000), Width::U32);
        assert_eq!(Width::for_value(u32::MAX as usize), Width::U32);
        assert_eq!(Width::U16.bits(), 16);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    #[should_panic]
    fn width_too_wide() {
        Width::for_value(u32::MAX as usize + 1);
    }

    #[test]
    fn probe_limits() {
        assert_eq!(max_probe(32), 16);
        assert_eq!(max_probe(1024), 16);
        assert_eq!(max_probe(2048), 32);
        assert_eq!(max_probe(1 << 20), 1 << 14);
    }

    #[test]
    fn zeroed_is_empty() {
        let table = Table::zeroed(300, 64);
        assert_eq!(table.len(), 64);
        assert_eq!(table.width(), Width::U16);
        assert!((0..64).all(|i| table.slot(i, Ordering::Relaxed) == 0));
    }

    #[test]
    fn degenerate_tables_reject_inserts() {
        assert!(!Table::zeroed(0, 0).try_insert(0, 1));
        assert!(!Table::zeroed(0, 1).try_insert(0, 1));

        let calls = Cell::new(0);
        assert_eq!(Table::zeroed(0, 0).find(&(), 7, &(), &never(&calls)), None);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn insert_then_find() {
        let table = Table::zeroed(0xFF, 32);
        for i in 0..20 {
            assert!(table.try_insert(i as u64 * 7, i + 1));
        }
        let eq = |i: usize, k: &usize, _: &(), _: u64| i == *k;
        for i in 0..20 {
            assert_eq!(table.find(&i, i as u64 * 7, &(), &eq), Some(i));
        }
        assert_eq!(table.find(&20, 20 * 7, &(), &eq), None);
    }

    #[test]
    fn collisions_are_placed_linearly() {
        let table = Table::zeroed(0xFF, 32);
        assert!(table.try_insert(31, 1));
        assert!(table.try_insert(31, 2));
        assert!(table.try_insert(31, 3));
        assert_eq!(table.slot(31, Ordering::Relaxed), 1);
        assert_eq!(table.slot(0, Ordering::Relaxed), 2);
        assert_eq!(table.slot(1, Ordering::Relaxed), 3);
    }

    #[test]
    fn insert_respects_probe_limit() {
        let table = Table::zeroed(0xFF, 64);
        // one home slot plus max_probe more
        for v in 1..=17 {
            assert!(table.try_insert(5, v));
        }
        assert!(!table.try_insert(5, 18));
        // a different home slot past the cluster still has room
        assert!(table.try_insert(40, 18));
    }

    #[test]
    fn lookup_respects_probe_limit() {
        let table = Table::zeroed(0xFFFF, 2048);
        for i in 0..2048 {
            assert!(table.try_insert(i as u64, i + 1));
        }
        let calls = Cell::new(0);
        assert_eq!(table.find(&(), 100, &(), &never(&calls)), None);
        assert_eq!(calls.get(), max_probe(2048) + 1);
    }

    #[test]
    fn lookup_stops_on_wraparound() {
        let table = Table::zeroed(0xFF, 8);
        for i in 0..8 {
            assert!(table.try_insert(i as u64, i + 1));
        }
        let calls = Cell::new(0);
        assert_eq!(table.find(&(), 3, &(), &never(&calls)), None);
        assert_eq!(calls.get(), 8);
        assert!(!table.try_insert(3, 9));
    }

    #[test]
    fn lookup_stops_at_empty_slot() {
        let table = Table::zeroed(0xFF, 32);
        assert!(table.try_insert(4, 1));
        assert!(table.try_insert(4, 2));
        let calls = Cell::new(0);
        assert_eq!(table.find(&(), 4, &(), &never(&calls)), None);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    #[should_panic(expected = "256 does not fit in a U8 slot")]
    fn oversized_value_is_rejected() {
        let table = Table::zeroed(0xFF, 32);
        table.try_insert(0, 0x100);
    }

    #[test]
    fn wide_values_round_trip() {
        let table = Table::zeroed(0x1_0000, 32);
        assert_eq!(table.width(), Width::U32);
        assert!(table.try_insert(3, 0x1_0000));
        assert_eq!(table.slot(3, Ordering::Acquire), 0x1_0000);
        assert_eq!(TableRef::new(&table).get(3), Some(0xFFFF));
        assert_eq!(TableRef::new(&table).get(4), None);
    }
}
