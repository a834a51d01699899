use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    sync::Arc,
};

use super::Name;

/// A handle for a declared universe variable
///
/// Universe variables are dense indices into a [`UnivEnv`](crate::kernel::UnivEnv); index 0 is
/// always the base universe `zero`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct UVar(u32);

impl UVar {
    /// The base universe variable, declared by every environment
    pub const ZERO: UVar = UVar(0);

    /// Construct a handle from a raw index
    pub fn new(ix: u32) -> Self {
        UVar(ix)
    }

    /// Get this variable's index
    pub fn ix(&self) -> usize {
        self.0 as usize
    }

    /// Get this variable's raw index
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// A universe level expression
///
/// Levels are immutable and cheaply clonable; each node caches whether it mentions a universe
/// parameter so that substitution can skip parameter-free subtrees in O(1).
#[derive(Clone)]
pub struct Level(Arc<LevelNode>);

struct LevelNode {
    kind: LevelKind,
    has_param: bool,
}

/// The shape of a universe level
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum LevelKind {
    /// A declared universe variable
    UVar(UVar, Name),
    /// A named universe parameter of a declaration
    Param(Name),
    /// A level lifted by a constant
    Lift(Level, u32),
    /// The maximum of a non-empty set of levels
    Max(Box<[Level]>),
}

impl Level {
    fn from_kind(kind: LevelKind) -> Self {
        let has_param = match &kind {
            LevelKind::UVar(..) => false,
            LevelKind::Param(_) => true,
            LevelKind::Lift(l, _) => l.has_param(),
            LevelKind::Max(ls) => ls.iter().any(Level::has_param),
        };
        Level(Arc::new(LevelNode { kind, has_param }))
    }

    /// A universe variable
    pub fn uvar(var: UVar, name: Name) -> Self {
        Self::from_kind(LevelKind::UVar(var, name))
    }

    /// A universe parameter
    pub fn param(name: impl Into<Name>) -> Self {
        Self::from_kind(LevelKind::Param(name.into()))
    }

    /// The level `self + k`
    pub fn lift(&self, k: u32) -> Self {
        Self::from_kind(LevelKind::Lift(self.clone(), k))
    }

    /// The maximum of two levels
    pub fn max(&self, other: &Level) -> Self {
        Self::from_kind(LevelKind::Max(Box::new([self.clone(), other.clone()])))
    }

    /// The maximum of a set of levels
    ///
    /// Returns `None` for an empty set, and the level itself for a singleton.
    pub fn max_of(levels: impl IntoIterator<Item = Level>) -> Option<Self> {
        let mut levels: Vec<Level> = levels.into_iter().collect();
        match levels.len() {
            0 => None,
            1 => levels.pop(),
            _ => Some(Self::from_kind(LevelKind::Max(levels.into_boxed_slice()))),
        }
    }

    /// Get this level's shape
    pub fn kind(&self) -> &LevelKind {
        &self.0.kind
    }

    /// Get whether this level mentions a universe parameter
    pub fn has_param(&self) -> bool {
        self.0.has_param
    }

    /// Get this level as a universe variable, if it is one
    pub fn as_uvar(&self) -> Option<UVar> {
        match self.kind() {
            LevelKind::UVar(v, _) => Some(*v),
            _ => None,
        }
    }

    /// Check whether two levels are the same object
    pub fn ptr_eq(&self, other: &Level) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Substitute `levels[i]` for every occurrence of the parameter `params[i]`
    ///
    /// Parameters without a corresponding level are left untouched. Subtrees which are unchanged
    /// by the substitution are shared with the input rather than rebuilt.
    ///
    /// # Examples
    /// ```
    /// # use plinth_kernel::term::*;
    /// let u = Level::param("u");
    /// let v = Level::param("v");
    /// let l = u.lift(1).max(&v);
    /// let r = l.instantiate(&[Name::new("u")], &[v.clone()]);
    /// assert_eq!(r, v.lift(1).max(&v));
    /// // Nothing to substitute: the result is the input itself
    /// let c = v.lift(2);
    /// assert!(c.instantiate(&[Name::new("u")], &[u.clone()]).ptr_eq(&c));
    /// ```
    pub fn instantiate(&self, params: &[Name], levels: &[Level]) -> Level {
        if !self.has_param() {
            return self.clone();
        }
        match self.kind() {
            LevelKind::UVar(..) => self.clone(),
            LevelKind::Param(n) => params
                .iter()
                .zip(levels)
                .find(|(p, _)| *p == n)
                .map(|(_, l)| l.clone())
                .unwrap_or_else(|| self.clone()),
            LevelKind::Lift(l, k) => {
                let new_l = l.instantiate(params, levels);
                if new_l.ptr_eq(l) {
                    self.clone()
                } else {
                    new_l.lift(*k)
                }
            }
            LevelKind::Max(ls) => match map_reuse(ls, |l| l.instantiate(params, levels)) {
                Some(new_ls) => Self::from_kind(LevelKind::Max(new_ls)),
                None => self.clone(),
            },
        }
    }
}

/// Map `f` over `levels`, returning `None` if every result is pointer-identical to its input
pub(crate) fn map_reuse(levels: &[Level], mut f: impl FnMut(&Level) -> Level) -> Option<Box<[Level]>> {
    let mut result: Option<Vec<Level>> = None;
    for (ix, l) in levels.iter().enumerate() {
        let new_l = f(l);
        match &mut result {
            Some(result) => result.push(new_l),
            None if !new_l.ptr_eq(l) => {
                let mut fresh = Vec::with_capacity(levels.len());
                fresh.extend_from_slice(&levels[..ix]);
                fresh.push(new_l);
                result = Some(fresh);
            }
            None => {}
        }
    }
    result.map(Vec::into_boxed_slice)
}

impl PartialEq for Level {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.kind() == other.kind()
    }
}

impl Eq for Level {}

impl Hash for Level {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state)
    }
}

impl Debug for Level {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Debug::fmt(self.kind(), f)
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.kind() {
            LevelKind::UVar(_, n) | LevelKind::Param(n) => Display::fmt(n, f),
            LevelKind::Lift(l, k) => write!(f, "{} + {}", l, k),
            LevelKind::Max(ls) => {
                f.write_str("max(")?;
                for (ix, l) in ls.iter().enumerate() {
                    if ix != 0 {
                        f.write_str(", ")?;
                    }
                    Display::fmt(l, f)?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn has_param_propagates() {
        let z = Level::uvar(UVar::ZERO, Name::new("zero"));
        assert!(!z.has_param());
        assert!(!z.lift(3).has_param());
        let u = Level::param("u");
        assert!(u.has_param());
        assert!(z.max(&u.lift(1)).has_param());
    }

    #[test]
    fn max_of_collapses() {
        assert_eq!(Level::max_of([]), None);
        let u = Level::param("u");
        assert!(Level::max_of([u.clone()]).unwrap().ptr_eq(&u));
        let v = Level::param("v");
        assert_eq!(Level::max_of([u.clone(), v.clone()]), Some(u.max(&v)));
    }

    #[test]
    fn instantiate_reuses_unchanged_members() {
        let z = Level::uvar(UVar::ZERO, Name::new("zero"));
        let u = Level::param("u");
        let l = Level::max_of([z.clone(), u.clone()]).unwrap();
        let r = l.instantiate(&[Name::new("u")], &[z.lift(1)]);
        let LevelKind::Max(ls) = r.kind() else {
            panic!("expected max, got {:?}", r)
        };
        assert!(ls[0].ptr_eq(&z));
        assert_eq!(ls[1], z.lift(1));
    }

    #[test]
    fn display() {
        let u = Level::param("u");
        let v = Level::param("v");
        assert_eq!(u.lift(2).max(&v).to_string(), "max(u + 2, v)");
    }
}
