use crate::raw::Table;
use std::fmt;
use std::iter::FusedIterator;
use std::sync::atomic::Ordering;

/// An iterator over the dataset indices stored in a set.
///
/// See [`SmallIntSet::indices`](crate::SmallIntSet::indices) for details.
pub struct Indices<'g> {
    table: &'g Table,
    next: usize,
}

impl<'g> Indices<'g> {
    pub(crate) fn new(table: &'g Table) -> Self {
        Self { table, next: 0 }
    }
}

impl Iterator for Indices<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.table.len() {
            let v = self.table.slot(self.next, Ordering::Acquire);
            self.next += 1;
            if v != 0 {
                return Some(v - 1);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.table.len() - self.next))
    }
}

impl FusedIterator for Indices<'_> {}

impl fmt::Debug for Indices<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indices")
            .field("table", self.table)
            .field("next", &self.next)
            .finish()
    }
}
