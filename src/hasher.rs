//! The capabilities a [`SmallIntSet`](crate::SmallIntSet) uses to reach the entries it indexes.
//!
//! The set only stores indices, so hashing and comparing always go through the dataset the
//! caller passes in. Closures of the right shape implement both traits directly.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

/// Hashes the dataset entry at a given index.
///
/// The hash of an entry must not change while its index is stored in a set, since rehashing
/// recomputes it to place the index in the new table.
pub trait HashIndex<D: ?Sized> {
    /// Returns the hash of entry `index` of `data`.
    fn hash_index(&self, index: usize, data: &D) -> u64;
}

/// Compares the dataset entry at a given index against a lookup key.
pub trait EqIndex<Q: ?Sized, D: ?Sized> {
    /// Returns `true` if entry `index` of `data` matches `key`.
    ///
    /// `hash` is the hash the lookup was made with; it may be used to reject entries early.
    fn eq_index(&self, index: usize, key: &Q, data: &D, hash: u64) -> bool;
}

impl<D, F> HashIndex<D> for F
where
    D: ?Sized,
    F: Fn(usize, &D) -> u64,
{
    #[inline]
    fn hash_index(&self, index: usize, data: &D) -> u64 {
        self(index, data)
    }
}

impl<Q, D, F> EqIndex<Q, D> for F
where
    Q: ?Sized,
    D: ?Sized,
    F: Fn(usize, &Q, &D, u64) -> bool,
{
    #[inline]
    fn eq_index(&self, index: usize, key: &Q, data: &D, hash: u64) -> bool {
        self(index, key, data, hash)
    }
}

/// A pair of hash and equality functions used together as one capability.
///
/// # Examples
///
/// ```
/// use smallintset::{IndexFns, SmallIntSet};
///
/// let words = ["apple", "pear", "plum"];
/// let fns = IndexFns::new(
///     |i: usize, data: &[&str]| data[i].len() as u64,
///     |i: usize, key: &str, data: &[&str], _: u64| data[i] == key,
/// );
///
/// let set = SmallIntSet::new();
/// let writer = set.write();
/// let guard = set.guard();
/// for i in 0..words.len() {
///     set.insert(&writer, i, &words[..], &fns, &guard);
/// }
/// assert_eq!(set.lookup("pear", 4, &words[..], &fns, &guard), Some(1));
/// ```
#[derive(Clone, Copy)]
pub struct IndexFns<H, E> {
    hash: H,
    eq: E,
}

impl<H, E> IndexFns<H, E> {
    /// Combines a hash function and an equality function.
    pub fn new(hash: H, eq: E) -> Self {
        Self { hash, eq }
    }
}

impl<H, E> fmt::Debug for IndexFns<H, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexFns").finish_non_exhaustive()
    }
}

impl<D, H, E> HashIndex<D> for IndexFns<H, E>
where
    D: ?Sized,
    H: HashIndex<D>,
{
    #[inline]
    fn hash_index(&self, index: usize, data: &D) -> u64 {
        self.hash.hash_index(index, data)
    }
}

impl<Q, D, H, E> EqIndex<Q, D> for IndexFns<H, E>
where
    Q: ?Sized,
    D: ?Sized,
    E: EqIndex<Q, D>,
{
    #[inline]
    fn eq_index(&self, index: usize, key: &Q, data: &D, hash: u64) -> bool {
        self.eq.eq_index(index, key, data, hash)
    }
}

/// Hashes and compares the entries of a slice with a [`BuildHasher`].
///
/// Lookups may use any borrowed form of the entry type, but `Hash` and `Eq` on the borrowed
/// form must match those for the entry type. Use [`IndexHasher::hash_key`] to compute the
/// lookup hash.
///
/// # Examples
///
/// ```
/// use smallintset::{IndexHasher, SmallIntSet};
///
/// let names = vec![String::from("Int8"), String::from("Int16")];
/// let hasher = IndexHasher::new();
/// let set = SmallIntSet::new();
/// let guard = set.guard();
/// {
///     let writer = set.write();
///     set.insert(&writer, 0, &names[..], &hasher, &guard);
///     set.insert(&writer, 1, &names[..], &hasher, &guard);
/// }
///
/// let hash = hasher.hash_key("Int16");
/// assert_eq!(set.lookup("Int16", hash, &names[..], &hasher, &guard), Some(1));
/// ```
#[derive(Clone, Default)]
pub struct IndexHasher<S = crate::DefaultHashBuilder> {
    build_hasher: S,
}

impl IndexHasher<crate::DefaultHashBuilder> {
    /// Creates an `IndexHasher` with the default hash builder.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S> IndexHasher<S> {
    /// Creates an `IndexHasher` that hashes with `build_hasher`.
    pub fn with_hasher(build_hasher: S) -> Self {
        Self { build_hasher }
    }

    /// Returns a reference to the underlying hash builder.
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }
}

impl<S: BuildHasher> IndexHasher<S> {
    /// Returns the hash of `key` as it would be computed for an equal entry.
    pub fn hash_key<Q: ?Sized + Hash>(&self, key: &Q) -> u64 {
        let mut h = self.build_hasher.build_hasher();
        key.hash(&mut h);
        h.finish()
    }
}

impl<S> fmt::Debug for IndexHasher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHasher").finish_non_exhaustive()
    }
}

impl<T, S> HashIndex<[T]> for IndexHasher<S>
where
    T: Hash,
    S: BuildHasher,
{
    #[inline]
    fn hash_index(&self, index: usize, data: &[T]) -> u64 {
        self.hash_key(&data[index])
    }
}

impl<T, Q, S> EqIndex<Q, [T]> for IndexHasher<S>
where
    T: Borrow<Q>,
    Q: ?Sized + Eq,
{
    #[inline]
    fn eq_index(&self, index: usize, key: &Q, data: &[T], _: u64) -> bool {
        data.get(index).map_or(false, |entry| entry.borrow() == key)
    }
}
