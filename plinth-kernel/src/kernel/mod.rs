use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use thiserror::Error;

mod arith;
mod cache;
mod instantiate;
mod replace;
mod univ;

pub use arith::MAX_OFFSET;
pub use cache::*;
pub use replace::replace;
pub use univ::*;

pub use crate::term::{Expr, ExprKind, Level, LevelKind, Name, UVar};

/// A process-unique identity token for a declaration
///
/// Two [`ConstantInfo`]s with equal contents but built separately have distinct ids, so a
/// redefinition never aliases a cached result for the declaration it replaces.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DeclId(u64);

impl DeclId {
    fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        DeclId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A declaration: a named constant, universe-polymorphic over its level parameters
#[derive(Debug, Clone)]
pub struct ConstantInfo(Arc<ConstantData>);

#[derive(Debug)]
struct ConstantData {
    id: DeclId,
    name: Name,
    lparams: Vec<Name>,
    ty: Expr,
    value: Option<Expr>,
}

impl ConstantInfo {
    /// Construct a new declaration
    ///
    /// # Example
    /// ```
    /// # use plinth_kernel::kernel::*;
    /// let ty = Expr::sort(Level::param("u"));
    /// let a = ConstantInfo::new("A", [Name::new("u")], ty.clone(), None);
    /// let b = ConstantInfo::new("A", [Name::new("u")], ty, None);
    /// assert!(a.is_eqp(&a.clone()));
    /// assert!(!a.is_eqp(&b));
    /// ```
    pub fn new(
        name: impl Into<Name>,
        lparams: impl IntoIterator<Item = Name>,
        ty: Expr,
        value: Option<Expr>,
    ) -> Self {
        ConstantInfo(Arc::new(ConstantData {
            id: DeclId::fresh(),
            name: name.into(),
            lparams: lparams.into_iter().collect(),
            ty,
            value,
        }))
    }

    /// Get this declaration's identity
    pub fn id(&self) -> DeclId {
        self.0.id
    }

    /// Check whether two handles refer to the same declaration object
    pub fn is_eqp(&self, other: &ConstantInfo) -> bool {
        self.id() == other.id()
    }

    /// Get this declaration's name
    pub fn name(&self) -> &Name {
        &self.0.name
    }

    /// Get this declaration's universe parameters
    pub fn lparams(&self) -> &[Name] {
        &self.0.lparams
    }

    /// Get the number of universe parameters
    pub fn num_lparams(&self) -> usize {
        self.0.lparams.len()
    }

    /// Get this declaration's type
    pub fn ty(&self) -> &Expr {
        &self.0.ty
    }

    /// Get this declaration's value, if it has one
    pub fn value(&self) -> Option<&Expr> {
        self.0.value.as_ref()
    }
}

/// A kernel error
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    /// Offset arithmetic left the representable range
    #[error("universe overflow: {0}")]
    UniverseOverflow(&'static str),
    /// A loose bound variable index left the representable range
    #[error("loose bound variable overflow: {0}")]
    LooseBVarOverflow(&'static str),
    /// Universe variable declared twice
    #[error("invalid universe variable declaration, it has already been declared: {0}")]
    AlreadyDeclared(Name),
    /// Universe variable not declared in this environment
    #[error("invalid universe variable: {0}")]
    InvalidUVar(u32),
    /// Universe parameter where a declared universe variable was expected
    #[error("unexpected universe parameter: {0}")]
    UnexpectedParam(Name),
    /// Universe constraints would place a variable strictly above itself
    #[error("universe inconsistency: {0}")]
    Inconsistent(&'static str),
    /// Parameter count mismatch
    #[error("parameter count mismatch: {0}")]
    ParamsMismatch(&'static str),
    /// Declaration has no value
    #[error("declaration has no value: {0}")]
    NoValue(Name),
}
