use std::{cell::RefCell, thread::LocalKey};

use tracing::{debug, trace};

use super::{ConstantInfo, DeclId, Error};
use crate::term::{Expr, Level};

/// The default number of buckets in each universe instantiation cache
pub const DEFAULT_CACHE_CAPACITY: usize = 1023;

/// Configuration for the calling thread's universe instantiation caches
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CacheConfig {
    /// The number of buckets in each cache; zero is treated as one
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Hit and miss counts for an [`InstantiateCache`]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups which had to compute the instantiation
    pub misses: u64,
}

/// A direct-mapped memo table for universe parameter instantiation
///
/// Entries are bucketed by the hash of the declaration's name and only ever evicted by being
/// overwritten. A lookup hits only for the very same declaration object (see
/// [`ConstantInfo::is_eqp`]) and structurally equal levels.
///
/// # Examples
/// ```
/// # use plinth_kernel::kernel::*;
/// let ty = Expr::sort(Level::param("u"));
/// let decl = ConstantInfo::new("A", [Name::new("u")], ty.clone(), None);
/// let levels = [Level::param("v")];
/// let mut cache = InstantiateCache::new(0);
/// assert_eq!(cache.capacity(), 1);
/// assert_eq!(cache.get(&decl, &levels), None);
/// cache.save(&decl, &levels, Expr::sort(Level::param("v")));
/// assert_eq!(cache.get(&decl, &levels), Some(Expr::sort(Level::param("v"))));
/// // A redeclaration with the same name never hits
/// let redecl = ConstantInfo::new("A", [Name::new("u")], ty, None);
/// assert_eq!(cache.get(&redecl, &levels), None);
/// ```
#[derive(Debug, Clone)]
pub struct InstantiateCache {
    capacity: usize,
    /// Allocated on first save
    entries: Vec<Option<Entry>>,
    stats: CacheStats,
}

#[derive(Debug, Clone)]
struct Entry {
    decl: DeclId,
    levels: Box<[Level]>,
    result: Expr,
}

impl InstantiateCache {
    /// Construct a new, empty cache with the given number of buckets
    pub fn new(capacity: usize) -> Self {
        InstantiateCache {
            capacity: capacity.max(1),
            entries: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    /// Get the number of buckets in this cache
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get this cache's hit and miss counts
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn bucket(&self, info: &ConstantInfo) -> usize {
        (info.name().hash_code() % self.capacity as u64) as usize
    }

    /// Look up the instantiation of `info` at `levels`
    pub fn get(&mut self, info: &ConstantInfo, levels: &[Level]) -> Option<Expr> {
        let result = self
            .entries
            .get(self.bucket(info))
            .and_then(Option::as_ref)
            .filter(|entry| entry.decl == info.id() && *entry.levels == *levels)
            .map(|entry| entry.result.clone());
        if result.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        result
    }

    /// Record the instantiation of `info` at `levels`, replacing whatever shared its bucket
    pub fn save(&mut self, info: &ConstantInfo, levels: &[Level], result: Expr) {
        if self.entries.is_empty() {
            self.entries.resize(self.capacity, None);
        }
        let ix = self.bucket(info);
        self.entries[ix] = Some(Entry {
            decl: info.id(),
            levels: levels.into(),
            result,
        });
    }

    /// Remove every entry, releasing the table
    pub fn clear(&mut self) {
        self.entries = Vec::new();
    }
}

thread_local! {
    static TYPE_CACHE: RefCell<InstantiateCache> =
        RefCell::new(InstantiateCache::new(DEFAULT_CACHE_CAPACITY));
    static VALUE_CACHE: RefCell<InstantiateCache> =
        RefCell::new(InstantiateCache::new(DEFAULT_CACHE_CAPACITY));
}

fn instantiate_cached(
    cache: &'static LocalKey<RefCell<InstantiateCache>>,
    info: &ConstantInfo,
    e: &Expr,
    levels: &[Level],
) -> Expr {
    if levels.is_empty() || !e.has_param_univ() {
        return e.clone();
    }
    if let Some(result) = cache.with_borrow_mut(|cache| cache.get(info, levels)) {
        trace!(decl = %info.name(), "universe instantiation cache hit");
        return result;
    }
    trace!(decl = %info.name(), "universe instantiation cache miss");
    let result = e.instantiate_lparams(info.lparams(), levels);
    cache.with_borrow_mut(|cache| cache.save(info, levels, result.clone()));
    result
}

/// Instantiate a declaration's type at the given universe levels
///
/// Results are memoized in a cache owned by the calling thread.
///
/// # Examples
/// ```
/// # use plinth_kernel::kernel::*;
/// let ty = Expr::pi("x", Expr::sort(Level::param("u")), Expr::sort(Level::param("u")));
/// let decl = ConstantInfo::new("F", [Name::new("u")], ty, None);
/// let v = Level::param("v");
/// let expected = Expr::pi("x", Expr::sort(v.clone()), Expr::sort(v.clone()));
/// assert_eq!(instantiate_type_lparams(&decl, &[v.clone()]), Ok(expected.clone()));
/// // Second lookup is served from the cache
/// assert_eq!(instantiate_type_lparams(&decl, &[v]), Ok(expected));
/// assert_eq!(
///     instantiate_type_lparams(&decl, &[]),
///     Err(Error::ParamsMismatch("instantiate_type_lparams"))
/// );
/// ```
pub fn instantiate_type_lparams(info: &ConstantInfo, levels: &[Level]) -> Result<Expr, Error> {
    if info.num_lparams() != levels.len() {
        return Err(Error::ParamsMismatch("instantiate_type_lparams"));
    }
    Ok(instantiate_cached(&TYPE_CACHE, info, info.ty(), levels))
}

/// Instantiate a declaration's value at the given universe levels
///
/// Results are memoized in a cache owned by the calling thread, separate from the type cache.
pub fn instantiate_value_lparams(info: &ConstantInfo, levels: &[Level]) -> Result<Expr, Error> {
    if info.num_lparams() != levels.len() {
        return Err(Error::ParamsMismatch("instantiate_value_lparams"));
    }
    let value = info.value().ok_or_else(|| Error::NoValue(info.name().clone()))?;
    Ok(instantiate_cached(&VALUE_CACHE, info, value, levels))
}

/// Clear the calling thread's type and value instantiation caches
pub fn clear_instantiate_cache() {
    TYPE_CACHE.with_borrow_mut(InstantiateCache::clear);
    VALUE_CACHE.with_borrow_mut(InstantiateCache::clear);
    debug!("cleared universe instantiation caches");
}

/// Replace the calling thread's instantiation caches with empty ones built from `config`
pub fn configure_instantiate_cache(config: CacheConfig) {
    TYPE_CACHE.set(InstantiateCache::new(config.capacity));
    VALUE_CACHE.set(InstantiateCache::new(config.capacity));
    debug!(capacity = config.capacity, "configured universe instantiation caches");
}

/// Get the calling thread's `(type, value)` instantiation cache statistics
pub fn instantiate_cache_stats() -> (CacheStats, CacheStats) {
    (
        TYPE_CACHE.with_borrow(InstantiateCache::stats),
        VALUE_CACHE.with_borrow(InstantiateCache::stats),
    )
}
