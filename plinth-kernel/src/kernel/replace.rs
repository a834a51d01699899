use fxhash::FxBuildHasher;
use hashbrown::HashMap;

use crate::term::{Expr, ExprKind};

/// Rewrite an expression top-down
///
/// `f` is called on each visited node together with the number of binders crossed to reach it.
/// Returning `Some` replaces the node (its children are not visited); returning `None` rebuilds
/// the node from its rewritten children, reusing the original node if none changed.
///
/// Shared subterms are rewritten once per binder offset.
///
/// # Examples
/// ```
/// # use plinth_kernel::kernel::*;
/// // Replace the free variable `x` by `y` everywhere
/// let x = Expr::fvar("x");
/// let t = Expr::app(x.clone(), Expr::lam("z", x.clone(), Expr::bvar(0)));
/// let r = replace(&t, |e, _| match e.kind() {
///     ExprKind::FVar(n) if n.as_str() == "x" => Some(Expr::fvar("y")),
///     _ => None,
/// });
/// let y = Expr::fvar("y");
/// assert_eq!(r, Expr::app(y.clone(), Expr::lam("z", y, Expr::bvar(0))));
/// ```
pub fn replace(e: &Expr, f: impl FnMut(&Expr, u32) -> Option<Expr>) -> Expr {
    Replacer {
        f,
        cache: HashMap::default(),
    }
    .visit(e, 0)
}

struct Replacer<F> {
    f: F,
    /// Results for shared nodes, keyed by node address and offset
    cache: HashMap<(usize, u32), Expr, FxBuildHasher>,
}

impl<F: FnMut(&Expr, u32) -> Option<Expr>> Replacer<F> {
    fn visit(&mut self, e: &Expr, offset: u32) -> Expr {
        let shared = e.is_shared();
        if shared {
            if let Some(result) = self.cache.get(&(e.addr(), offset)) {
                return result.clone();
            }
        }
        let result = match (self.f)(e, offset) {
            Some(result) => result,
            None => self.visit_children(e, offset),
        };
        if shared {
            self.cache.insert((e.addr(), offset), result.clone());
        }
        result
    }

    fn visit_children(&mut self, e: &Expr, offset: u32) -> Expr {
        let inner = offset.saturating_add(1);
        match e.kind() {
            ExprKind::App(f, a) => {
                let f = self.visit(f, offset);
                let a = self.visit(a, offset);
                e.update_app(f, a)
            }
            ExprKind::Lam(_, ty, body) | ExprKind::Pi(_, ty, body) => {
                let ty = self.visit(ty, offset);
                let body = self.visit(body, inner);
                e.update_binder(ty, body)
            }
            ExprKind::Let(_, ty, val, body) => {
                let ty = self.visit(ty, offset);
                let val = self.visit(val, offset);
                let body = self.visit(body, inner);
                e.update_let(ty, val, body)
            }
            ExprKind::BVar(_) | ExprKind::FVar(_) | ExprKind::Sort(_) | ExprKind::Const(..) => {
                e.clone()
            }
        }
    }
}
