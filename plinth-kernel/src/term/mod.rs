use std::{
    fmt::{self, Debug, Formatter},
    hash::{Hash, Hasher},
    sync::Arc,
};

use arrayvec::ArrayVec;
use bitflags::bitflags;

mod level;
mod name;

pub use level::*;
pub use name::*;

/// A kernel expression
///
/// Expressions are immutable and structurally shared. Each node caches, at construction, the
/// upper bound of its loose bound variables and whether it mentions universe parameters or free
/// variables; every traversal in the kernel relies on these to skip untouched subtrees in O(1).
#[derive(Clone)]
pub struct Expr(Arc<ExprNode>);

struct ExprNode {
    kind: ExprKind,
    data: ExprData,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
struct ExprData {
    /// The upper bound (exclusive) for loose bound variables in this expression
    ///
    /// Wider than an index so that `#u32::MAX` has a representable range.
    loose_bvar_range: u64,
    /// This expression's flags
    flags: ExprFlags,
    /// This expression's structural hash
    hash: u64,
}

/// The shape of an expression node
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ExprKind {
    /// A bound variable, as a de Bruijn index
    BVar(u32),
    /// A free variable
    FVar(Name),
    /// A typing universe
    Sort(Level),
    /// A reference to a declaration, instantiated at the given universe levels
    Const(Name, Box<[Level]>),
    /// An application
    App(Expr, Expr),
    /// A lambda abstraction: binder name, binder type, body
    Lam(Name, Expr, Expr),
    /// A dependent function type: binder name, binder type, body
    Pi(Name, Expr, Expr),
    /// A let-binding: binder name, type, value, body
    Let(Name, Expr, Expr, Expr),
}

bitflags! {
    /// Flags for an expression
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
    pub struct ExprFlags: u8 {
        /// Whether this expression mentions a universe parameter
        const HAS_PARAM_UNIV = 1 << 0;
        /// Whether this expression contains a free variable
        const HAS_FVAR = 1 << 1;
    }
}

impl ExprKind {
    /// Get this node's children, annotated with the number of binders entered to reach them
    pub fn children(&self) -> ArrayVec<(u32, &Expr), 3> {
        match self {
            ExprKind::App(f, a) => [(0, f), (0, a)].into_iter().collect(),
            ExprKind::Lam(_, ty, body) | ExprKind::Pi(_, ty, body) => {
                [(0, ty), (1, body)].into_iter().collect()
            }
            ExprKind::Let(_, ty, val, body) => [(0, ty), (0, val), (1, body)].into_iter().collect(),
            _ => ArrayVec::new(),
        }
    }

    fn data(&self) -> ExprData {
        let (loose_bvar_range, mut flags) = match self {
            ExprKind::BVar(ix) => (u64::from(*ix) + 1, ExprFlags::empty()),
            ExprKind::FVar(_) => (0, ExprFlags::HAS_FVAR),
            ExprKind::Sort(l) => (0, param_flag(l.has_param())),
            ExprKind::Const(_, ls) => (0, param_flag(ls.iter().any(Level::has_param))),
            _ => (
                self.children()
                    .iter()
                    .map(|(b, x)| x.loose_bvar_range().saturating_sub(u64::from(*b)))
                    .max()
                    .unwrap_or(0),
                ExprFlags::empty(),
            ),
        };
        for (_, x) in self.children() {
            flags |= x.flags();
        }
        ExprData {
            loose_bvar_range,
            flags,
            hash: fxhash::hash64(self),
        }
    }
}

fn param_flag(has_param: bool) -> ExprFlags {
    if has_param {
        ExprFlags::HAS_PARAM_UNIV
    } else {
        ExprFlags::empty()
    }
}

/// # Construction
impl Expr {
    /// Construct an expression from its shape
    pub fn new(kind: ExprKind) -> Self {
        let data = kind.data();
        Expr(Arc::new(ExprNode { kind, data }))
    }

    /// A bound variable
    ///
    /// # Examples
    /// ```
    /// # use plinth_kernel::term::*;
    /// let x = Expr::bvar(3);
    /// assert_eq!(x.loose_bvar_range(), 4);
    /// assert!(x.has_loose_bvars());
    /// ```
    pub fn bvar(ix: u32) -> Self {
        Self::new(ExprKind::BVar(ix))
    }

    /// A free variable
    pub fn fvar(name: impl Into<Name>) -> Self {
        Self::new(ExprKind::FVar(name.into()))
    }

    /// A typing universe
    pub fn sort(level: Level) -> Self {
        Self::new(ExprKind::Sort(level))
    }

    /// A reference to a declaration
    pub fn cnst(name: impl Into<Name>, levels: impl IntoIterator<Item = Level>) -> Self {
        Self::new(ExprKind::Const(name.into(), levels.into_iter().collect()))
    }

    /// An application
    pub fn app(f: Expr, a: Expr) -> Self {
        Self::new(ExprKind::App(f, a))
    }

    /// A lambda abstraction
    ///
    /// # Examples
    /// ```
    /// # use plinth_kernel::term::*;
    /// let ty = Expr::fvar("A");
    /// // λx. x is closed
    /// assert_eq!(Expr::lam("x", ty.clone(), Expr::bvar(0)).loose_bvar_range(), 0);
    /// // λx. #1 is not
    /// assert_eq!(Expr::lam("x", ty, Expr::bvar(1)).loose_bvar_range(), 1);
    /// ```
    pub fn lam(name: impl Into<Name>, ty: Expr, body: Expr) -> Self {
        Self::new(ExprKind::Lam(name.into(), ty, body))
    }

    /// A dependent function type
    pub fn pi(name: impl Into<Name>, ty: Expr, body: Expr) -> Self {
        Self::new(ExprKind::Pi(name.into(), ty, body))
    }

    /// A let-binding
    pub fn let_in(name: impl Into<Name>, ty: Expr, val: Expr, body: Expr) -> Self {
        Self::new(ExprKind::Let(name.into(), ty, val, body))
    }

    /// Apply `f` to each of `args`, left to right
    pub fn mk_app(f: Expr, args: impl IntoIterator<Item = Expr>) -> Self {
        args.into_iter().fold(f, Expr::app)
    }

    /// Apply `f` to the arguments of an application spine collected in reverse
    ///
    /// The last element of `rev_args` is the first argument.
    pub fn mk_rev_app(f: Expr, rev_args: &[Expr]) -> Self {
        rev_args.iter().rev().cloned().fold(f, Expr::app)
    }
}

/// # Inspection
impl Expr {
    /// Get this expression's shape
    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// Get the upper bound (exclusive) for this expression's loose bound variables
    pub fn loose_bvar_range(&self) -> u64 {
        self.0.data.loose_bvar_range
    }

    /// Get whether this expression has any loose bound variables
    pub fn has_loose_bvars(&self) -> bool {
        self.loose_bvar_range() > 0
    }

    /// Get this expression's flags
    pub fn flags(&self) -> ExprFlags {
        self.0.data.flags
    }

    /// Get whether this expression mentions a universe parameter
    pub fn has_param_univ(&self) -> bool {
        self.flags().contains(ExprFlags::HAS_PARAM_UNIV)
    }

    /// Get whether this expression contains a free variable
    pub fn has_fvar(&self) -> bool {
        self.flags().contains(ExprFlags::HAS_FVAR)
    }

    /// Check whether two expressions are the same object
    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Get whether this expression has more than one live reference
    pub(crate) fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }

    /// A key identifying this node for the lifetime of any reference to it
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Whether this is a lambda abstraction
    pub fn is_lambda(&self) -> bool {
        matches!(self.kind(), ExprKind::Lam(..))
    }

    /// Whether this is an application
    pub fn is_app(&self) -> bool {
        matches!(self.kind(), ExprKind::App(..))
    }

    /// Get the head of an application spine
    pub fn app_head(&self) -> &Expr {
        let mut head = self;
        while let ExprKind::App(f, _) = head.kind() {
            head = f;
        }
        head
    }

    /// Get the head of an application spine together with its arguments, last argument first
    ///
    /// # Examples
    /// ```
    /// # use plinth_kernel::term::*;
    /// let (f, a, b) = (Expr::fvar("f"), Expr::fvar("a"), Expr::fvar("b"));
    /// let t = Expr::mk_app(f.clone(), [a.clone(), b.clone()]);
    /// let (head, rev_args) = t.app_rev_args();
    /// assert_eq!(head, &f);
    /// assert_eq!(rev_args, vec![b, a]);
    /// ```
    pub fn app_rev_args(&self) -> (&Expr, Vec<Expr>) {
        let mut head = self;
        let mut rev_args = Vec::new();
        while let ExprKind::App(f, a) = head.kind() {
            rev_args.push(a.clone());
            head = f;
        }
        (head, rev_args)
    }
}

/// # Rebuilding
///
/// Each `update_*` function returns `self` (without allocating) if every new child is
/// pointer-identical to the old one, and a fresh node otherwise.
impl Expr {
    /// Rebuild an application with new children
    pub fn update_app(&self, f: Expr, a: Expr) -> Expr {
        match self.kind() {
            ExprKind::App(f0, a0) if f0.ptr_eq(&f) && a0.ptr_eq(&a) => self.clone(),
            _ => Expr::app(f, a),
        }
    }

    /// Rebuild a lambda or pi binder with new children
    pub fn update_binder(&self, ty: Expr, body: Expr) -> Expr {
        match self.kind() {
            ExprKind::Lam(_, ty0, body0) | ExprKind::Pi(_, ty0, body0)
                if ty0.ptr_eq(&ty) && body0.ptr_eq(&body) =>
            {
                self.clone()
            }
            ExprKind::Lam(n, _, _) => Expr::lam(n.clone(), ty, body),
            ExprKind::Pi(n, _, _) => Expr::pi(n.clone(), ty, body),
            _ => self.clone(),
        }
    }

    /// Rebuild a let-binding with new children
    pub fn update_let(&self, ty: Expr, val: Expr, body: Expr) -> Expr {
        match self.kind() {
            ExprKind::Let(_, ty0, val0, body0)
                if ty0.ptr_eq(&ty) && val0.ptr_eq(&val) && body0.ptr_eq(&body) =>
            {
                self.clone()
            }
            ExprKind::Let(n, _, _, _) => Expr::let_in(n.clone(), ty, val, body),
            _ => self.clone(),
        }
    }

    /// Rebuild a sort with a new level
    pub fn update_sort(&self, level: Level) -> Expr {
        match self.kind() {
            ExprKind::Sort(l) if l.ptr_eq(&level) => self.clone(),
            _ => Expr::sort(level),
        }
    }

    /// Rebuild a constant with new levels
    pub fn update_const(&self, levels: Box<[Level]>) -> Expr {
        match self.kind() {
            ExprKind::Const(n, _) => Expr::new(ExprKind::Const(n.clone(), levels)),
            _ => self.clone(),
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.0.data == other.0.data && self.kind() == other.kind())
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.data.hash)
    }
}

impl Debug for Expr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Debug::fmt(self.kind(), f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn loose_bvar_range_under_binders() {
        let ty = Expr::sort(Level::param("u"));
        // λx. λy. #0 #2
        let body = Expr::app(Expr::bvar(0), Expr::bvar(2));
        let t = Expr::lam("x", ty.clone(), Expr::lam("y", ty.clone(), body.clone()));
        assert_eq!(body.loose_bvar_range(), 3);
        assert_eq!(t.loose_bvar_range(), 1);
        let l = Expr::let_in("z", ty.clone(), Expr::bvar(4), Expr::bvar(0));
        assert_eq!(l.loose_bvar_range(), 5);
        assert_eq!(Expr::bvar(u32::MAX).loose_bvar_range(), u64::from(u32::MAX) + 1);
        assert_eq!(Expr::lam("x", ty, Expr::bvar(u32::MAX)).loose_bvar_range(), u64::from(u32::MAX));
    }

    #[test]
    fn flags_propagate() {
        let c = Expr::cnst("List", [Level::param("u")]);
        assert!(c.has_param_univ());
        assert!(!c.has_fvar());
        let t = Expr::app(c, Expr::fvar("x"));
        assert!(t.has_param_univ());
        assert!(t.has_fvar());
        assert!(!Expr::bvar(0).has_param_univ());
    }

    #[test]
    fn structural_equality() {
        let a = Expr::app(Expr::fvar("f"), Expr::bvar(0));
        let b = Expr::app(Expr::fvar("f"), Expr::bvar(0));
        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);
        assert_ne!(a, Expr::app(Expr::fvar("f"), Expr::bvar(1)));
    }

    #[test]
    fn update_reuses_node() {
        let f = Expr::fvar("f");
        let a = Expr::fvar("a");
        let t = Expr::app(f.clone(), a.clone());
        assert!(t.update_app(f.clone(), a).ptr_eq(&t));
        let u = t.update_app(f, Expr::fvar("b"));
        assert!(!u.ptr_eq(&t));
    }

    #[test]
    fn rev_app_round_trip() {
        let f = Expr::fvar("f");
        let args = [Expr::fvar("a"), Expr::fvar("b"), Expr::fvar("c")];
        let t = Expr::mk_app(f.clone(), args.clone());
        let (head, rev_args) = t.app_rev_args();
        assert_eq!(head, &f);
        assert_eq!(Expr::mk_rev_app(head.clone(), &rev_args), t);
        assert_eq!(t.app_head(), &f);
    }
}
