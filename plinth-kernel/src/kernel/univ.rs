use std::fmt::{self, Display, Formatter};

use fxhash::FxBuildHasher;
use indexmap::IndexSet;
use tracing::{debug, trace};

use super::{
    Error,
    arith::{add_offset, add_signed, sub_signed},
};
use crate::term::{Level, LevelKind, Name, UVar};

/// The universe constraint environment
///
/// Tracks the declared universe variables and, for every ordered pair `(v1, v2)`, the greatest
/// `d` such that `v1 >= v2 + d` has been proven. The table only ever widens and is kept
/// transitively closed, so that [`UnivEnv::is_ge`] answers transitive queries with a single
/// lookup per variable pair.
///
/// # Example
/// ```
/// # use plinth_kernel::kernel::*;
/// let mut env = UnivEnv::new();
/// let zero = env.zero();
/// let u = env.define_uvar("u", &zero.lift(1)).unwrap();
/// let v = env.define_uvar("v", &u.lift(2)).unwrap();
/// assert_eq!(env.is_ge(&v, &zero.lift(3)), Ok(true));
/// assert_eq!(env.is_ge(&v, &zero.lift(4)), Ok(false));
/// assert_eq!(env.is_ge(&zero, &u), Ok(false));
/// ```
#[derive(Debug, Clone)]
pub struct UnivEnv {
    /// The declared universe variables, in declaration order
    uvars: IndexSet<Name, FxBuildHasher>,
    /// `distances[v1][v2]` is the greatest proven `d` with `v1 >= v2 + d`, if any
    distances: Vec<Vec<Option<u32>>>,
}

/// A planned update of the distance table
type Update = (usize, usize, u32);

impl UnivEnv {
    /// Construct a new environment containing only the base universe `zero`
    pub fn new() -> Self {
        let mut uvars = IndexSet::default();
        uvars.insert(Name::new("zero"));
        UnivEnv {
            uvars,
            distances: vec![vec![Some(0)]],
        }
    }

    /// The base universe
    pub fn zero(&self) -> Level {
        Level::uvar(UVar::ZERO, self.uvars[0].clone())
    }

    /// Get the number of declared universe variables, including `zero`
    pub fn num_uvars(&self) -> usize {
        self.uvars.len()
    }

    /// Look up a universe variable by name
    pub fn uvar(&self, name: &Name) -> Option<UVar> {
        self.uvars
            .get_index_of(name)
            .map(|ix| UVar::new(ix as u32))
    }

    /// Get a universe variable's name
    pub fn uvar_name(&self, v: UVar) -> Result<&Name, Error> {
        self.uvars.get_index(v.ix()).ok_or(Error::InvalidUVar(v.raw()))
    }

    /// Get a universe variable as a level
    pub fn uvar_level(&self, v: UVar) -> Result<Level, Error> {
        Ok(Level::uvar(v, self.uvar_name(v)?.clone()))
    }

    /// Get the greatest proven `d` such that `v1 >= v2 + d`, if any
    ///
    /// # Example
    /// ```
    /// # use plinth_kernel::kernel::*;
    /// let mut env = UnivEnv::new();
    /// let u = env.add_uvar("u").unwrap().as_uvar().unwrap();
    /// assert_eq!(env.distance(u, u), Ok(Some(0)));
    /// assert_eq!(env.distance(u, UVar::ZERO), Ok(None));
    /// env.add_constraint(u, UVar::ZERO, 2).unwrap();
    /// assert_eq!(env.distance(u, UVar::ZERO), Ok(Some(2)));
    /// ```
    pub fn distance(&self, v1: UVar, v2: UVar) -> Result<Option<u32>, Error> {
        let (v1, v2) = (self.check_uvar(v1)?, self.check_uvar(v2)?);
        Ok(self.distances[v1][v2])
    }

    fn check_uvar(&self, v: UVar) -> Result<usize, Error> {
        if v.ix() < self.uvars.len() {
            Ok(v.ix())
        } else {
            Err(Error::InvalidUVar(v.raw()))
        }
    }

    /// Check that a universe variable level belongs to this environment
    fn check_level_uvar(&self, v: UVar, name: &Name) -> Result<usize, Error> {
        match self.uvars.get_index(v.ix()) {
            Some(declared) if declared == name => Ok(v.ix()),
            _ => Err(Error::InvalidUVar(v.raw())),
        }
    }

    /// Declare a fresh universe variable without constraints
    ///
    /// Fails if `name` has already been declared.
    pub fn add_uvar(&mut self, name: impl Into<Name>) -> Result<Level, Error> {
        let name = name.into();
        if self.uvars.contains(&name) {
            return Err(Error::AlreadyDeclared(name));
        }
        let ix = self.uvars.len();
        let raw = u32::try_from(ix)
            .ok()
            .filter(|raw| *raw < u32::MAX)
            .ok_or(Error::UniverseOverflow("UnivEnv::add_uvar (too many variables)"))?;
        self.uvars.insert(name.clone());
        for row in &mut self.distances {
            row.push(None);
        }
        let mut row = vec![None; ix + 1];
        row[ix] = Some(0);
        self.distances.push(row);
        debug!(uvar = %name, ix, "declared universe variable");
        Ok(Level::uvar(UVar::new(raw), name))
    }

    /// Remove the most recently declared universe variable
    fn pop_uvar(&mut self) {
        if self.uvars.len() <= 1 {
            return;
        }
        self.uvars.pop();
        self.distances.pop();
        for row in &mut self.distances {
            row.pop();
        }
    }

    /// Declare a fresh universe variable `name` standing for `level`
    ///
    /// Every lower bound implied by the structure of `level` is asserted on the new variable.
    /// On failure the environment is left unchanged.
    ///
    /// # Example
    /// ```
    /// # use plinth_kernel::kernel::*;
    /// let mut env = UnivEnv::new();
    /// let zero = env.zero();
    /// let u1 = env.define_uvar("u1", &zero.lift(2)).unwrap();
    /// let u2 = env.define_uvar("u2", &zero.lift(5)).unwrap();
    /// let w = env.define_uvar("w", &u1.max(&u2)).unwrap();
    /// assert_eq!(env.is_ge_offset(&w, &zero, 5), Ok(true));
    /// assert_eq!(env.is_ge_offset(&w, &zero, 6), Ok(false));
    /// assert_eq!(
    ///     env.define_uvar("w", &zero),
    ///     Err(Error::AlreadyDeclared(Name::new("w")))
    /// );
    /// ```
    pub fn define_uvar(&mut self, name: impl Into<Name>, level: &Level) -> Result<Level, Error> {
        let name = name.into();
        if self.uvars.contains(&name) {
            return Err(Error::AlreadyDeclared(name));
        }
        let mut edges = Vec::new();
        self.collect_edges(level, 0, &mut edges)?;
        let result = self.add_uvar(name)?;
        let v = UVar::new(self.uvars.len() as u32 - 1);
        if let Err(err) = self.add_edges(v, &edges) {
            self.pop_uvar();
            return Err(err);
        }
        Ok(result)
    }

    /// Assert that `v >= level + k`
    ///
    /// A lift adds its offset to `k`, and a maximum asserts the bound on every member. On failure
    /// the environment is left unchanged.
    pub fn add_constraints(&mut self, v: UVar, level: &Level, k: u32) -> Result<(), Error> {
        self.check_uvar(v)?;
        let mut edges = Vec::new();
        self.collect_edges(level, k, &mut edges)?;
        self.add_edges(v, &edges)
    }

    /// Decompose `level + k` into primitive lower bounds `(u, d)`
    fn collect_edges(&self, level: &Level, k: u32, edges: &mut Vec<(UVar, u32)>) -> Result<(), Error> {
        match level.kind() {
            LevelKind::UVar(u, name) => {
                self.check_level_uvar(*u, name)?;
                edges.push((*u, k));
            }
            LevelKind::Param(name) => return Err(Error::UnexpectedParam(name.clone())),
            LevelKind::Lift(l, off) => self.collect_edges(l, add_offset(k, *off)?, edges)?,
            LevelKind::Max(ls) => {
                for l in ls.iter() {
                    self.collect_edges(l, k, edges)?;
                }
            }
        }
        Ok(())
    }

    /// Insert edges from `v` in order, undoing all of them if any fails
    fn add_edges(&mut self, v: UVar, edges: &[(UVar, u32)]) -> Result<(), Error> {
        let mut undo = Vec::new();
        for &(u, d) in edges {
            if let Err(err) = self.insert_edge(v.ix(), u.ix(), d, &mut undo) {
                for (p, s, old) in undo.into_iter().rev() {
                    self.distances[p][s] = old;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Assert that `v1 >= v2 + d`
    ///
    /// Every bound that follows transitively from the new one is recorded. If `d` does not
    /// improve on a known bound, nothing changes. On failure the environment is left unchanged.
    ///
    /// # Example
    /// ```
    /// # use plinth_kernel::kernel::*;
    /// let mut env = UnivEnv::new();
    /// let u1 = env.add_uvar("u1").unwrap().as_uvar().unwrap();
    /// let u2 = env.add_uvar("u2").unwrap().as_uvar().unwrap();
    /// env.add_constraint(u1, u2, 3).unwrap();
    /// env.add_constraint(u2, UVar::ZERO, 1).unwrap();
    /// assert_eq!(env.distance(u1, UVar::ZERO), Ok(Some(4)));
    /// // u2 >= u1 would put u1 strictly above itself
    /// assert!(env.add_constraint(u2, u1, 0).is_err());
    /// ```
    pub fn add_constraint(&mut self, v1: UVar, v2: UVar, d: u32) -> Result<(), Error> {
        let (v1, v2) = (self.check_uvar(v1)?, self.check_uvar(v2)?);
        self.insert_edge(v1, v2, d, &mut Vec::new())
    }

    /// Insert the edge `v1 >= v2 + d`, recording overwritten entries in `undo`
    fn insert_edge(
        &mut self,
        v1: usize,
        v2: usize,
        d: u32,
        undo: &mut Vec<(usize, usize, Option<u32>)>,
    ) -> Result<(), Error> {
        let mut updates = Vec::new();
        self.plan_edge(v1, v2, d, &mut updates)?;
        trace!(v1, v2, d, updates = updates.len(), "universe constraint");
        for (p, s, w) in updates {
            undo.push((p, s, self.distances[p][s]));
            self.distances[p][s] = Some(w);
        }
        Ok(())
    }

    /// Compute the entries which improve once `v1 >= v2 + d` holds, without modifying the table
    ///
    /// Every `p` known to be above `v1` gains a bound on every `s` known to be below `v2`.
    fn plan_edge(&self, v1: usize, v2: usize, d: u32, updates: &mut Vec<Update>) -> Result<(), Error> {
        if v1 == v2 {
            return if d == 0 {
                Ok(())
            } else {
                Err(Error::Inconsistent("UnivEnv::add_constraint (variable above itself)"))
            };
        }
        if self.distances[v1][v2].is_some_and(|known| known >= d) {
            return Ok(());
        }
        let below = &self.distances[v2];
        for (p, row) in self.distances.iter().enumerate() {
            let Some(to_v1) = row[v1] else {
                continue;
            };
            let to_v2 = add_offset(to_v1, d)?;
            for (s, from_v2) in below.iter().enumerate() {
                let Some(from_v2) = *from_v2 else {
                    continue;
                };
                let w = add_offset(to_v2, from_v2)?;
                if p == s {
                    if w > 0 {
                        return Err(Error::Inconsistent("UnivEnv::add_constraint (positive cycle)"));
                    }
                } else if row[s].is_none_or(|known| w > known) {
                    updates.push((p, s, w));
                }
            }
        }
        Ok(())
    }

    /// Decide whether `l1 >= l2`
    pub fn is_ge(&self, l1: &Level, l2: &Level) -> Result<bool, Error> {
        self.is_ge_offset(l1, l2, 0)
    }

    /// Decide whether `l1 >= l2 + k`
    ///
    /// A maximum on the left needs one member to be large enough; a maximum on the right needs
    /// every member to be dominated. A universe parameter anywhere in the query is an error.
    ///
    /// # Example
    /// ```
    /// # use plinth_kernel::kernel::*;
    /// let mut env = UnivEnv::new();
    /// let zero = env.zero();
    /// let u = env.define_uvar("u", &zero.lift(1)).unwrap();
    /// let v = env.define_uvar("v", &zero.lift(4)).unwrap();
    /// assert_eq!(env.is_ge_offset(&u.max(&v), &zero, 4), Ok(true));
    /// assert_eq!(env.is_ge_offset(&u, &zero.max(&v), 0), Ok(false));
    /// assert_eq!(env.is_ge_offset(&v.lift(1), &u.max(&zero), 0), Ok(false));
    /// assert_eq!(env.is_ge_offset(&v.lift(1), &zero.max(&zero.lift(5)), 0), Ok(true));
    /// ```
    pub fn is_ge_offset(&self, l1: &Level, l2: &Level, k: i32) -> Result<bool, Error> {
        match l2.kind() {
            LevelKind::UVar(v2, n2) => match l1.kind() {
                LevelKind::UVar(v1, n1) => {
                    let v1 = self.check_level_uvar(*v1, n1)?;
                    let v2 = self.check_level_uvar(*v2, n2)?;
                    Ok(self.distances[v1][v2].is_some_and(|d| k < 0 || d >= k as u32))
                }
                LevelKind::Lift(l1, off) => match sub_signed(k, *off) {
                    Some(k) => self.is_ge_offset(l1, l2, k),
                    None => Ok(false),
                },
                LevelKind::Max(ls) => {
                    for l in ls.iter() {
                        if self.is_ge_offset(l, l2, k)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                LevelKind::Param(n) => Err(Error::UnexpectedParam(n.clone())),
            },
            LevelKind::Lift(l2, off) => self.is_ge_offset(l1, l2, add_signed(k, *off)?),
            LevelKind::Max(ls) => {
                for l in ls.iter() {
                    if !self.is_ge_offset(l1, l, k)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            LevelKind::Param(n) => Err(Error::UnexpectedParam(n.clone())),
        }
    }

    /// Iterate over every known bound `u >= v + d` between distinct variables
    pub fn relations(&self) -> impl Iterator<Item = (&Name, &Name, u32)> {
        self.distances.iter().enumerate().flat_map(move |(v1, row)| {
            row.iter().enumerate().filter_map(move |(v2, d)| {
                let d = (*d)?;
                (v1 != v2).then(|| (&self.uvars[v1], &self.uvars[v2], d))
            })
        })
    }
}

impl Default for UnivEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// One known bound per line, `u >= v` or `u >= v + d`
impl Display for UnivEnv {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for (u, v, d) in self.relations() {
            if d > 0 {
                writeln!(f, "{} >= {} + {}", u, v, d)?;
            } else {
                writeln!(f, "{} >= {}", u, v)?;
            }
        }
        Ok(())
    }
}
