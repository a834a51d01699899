use std::slice;

use super::{Error, arith::window_end, replace};
use crate::term::{Expr, ExprKind, Level, Name, map_reuse};

/// # Instantiation
///
/// Substitution of expressions for loose bound variables.
impl Expr {
    /// Add `d` to every loose bound variable
    ///
    /// Fails if a lifted index would exceed `u32::MAX`.
    ///
    /// # Examples
    /// ```
    /// # use plinth_kernel::kernel::*;
    /// let ty = Expr::fvar("A");
    /// // λx. #0 #1  ~~>  λx. #0 #3
    /// let t = Expr::lam("x", ty.clone(), Expr::app(Expr::bvar(0), Expr::bvar(1)));
    /// let r = Expr::lam("x", ty, Expr::app(Expr::bvar(0), Expr::bvar(3)));
    /// assert_eq!(t.lift_loose_bvars(2), Ok(r));
    /// assert!(Expr::bvar(u32::MAX).lift_loose_bvars(1).is_err());
    /// ```
    pub fn lift_loose_bvars(&self, d: u32) -> Result<Expr, Error> {
        if d == 0 || !self.has_loose_bvars() {
            return Ok(self.clone());
        }
        let mut overflow = false;
        let result = replace(self, |m, offset| {
            if u64::from(offset) >= m.loose_bvar_range() {
                return Some(m.clone());
            }
            match m.kind() {
                ExprKind::BVar(ix) => Some(match ix.checked_add(d) {
                    Some(ix) => Expr::bvar(ix),
                    None => {
                        overflow = true;
                        m.clone()
                    }
                }),
                _ => None,
            }
        });
        if overflow {
            return Err(Error::LooseBVarOverflow("Expr::lift_loose_bvars"));
        }
        Ok(result)
    }

    /// Substitute `subst[i - s]` for every loose bound variable `i` in `[s, s + n)`
    ///
    /// Loose bound variables at or above `s + n` are lowered by `n`, since `n` binders are being
    /// removed; those below `s` are untouched. Substituted terms are lifted by the number of
    /// binders crossed to reach the variable they replace.
    ///
    /// # Panics
    /// Panics if a substituted term, lifted past those binders, would have a loose bound variable
    /// above `u32::MAX`.
    ///
    /// # Examples
    /// ```
    /// # use plinth_kernel::kernel::*;
    /// let (a, ty) = (Expr::fvar("a"), Expr::fvar("A"));
    /// // λx. #0 #1 #2, where #1 is the outermost loose variable
    /// let t = Expr::lam(
    ///     "x",
    ///     ty.clone(),
    ///     Expr::mk_app(Expr::bvar(0), [Expr::bvar(1), Expr::bvar(2)]),
    /// );
    /// let r = Expr::lam("x", ty, Expr::mk_app(Expr::bvar(0), [a.clone(), Expr::bvar(1)]));
    /// assert_eq!(t.instantiate(&[a]), r);
    /// ```
    pub fn instantiate_at(&self, s: u32, subst: &[Expr]) -> Expr {
        if u64::from(s) >= self.loose_bvar_range() || subst.is_empty() {
            return self.clone();
        }
        if s == 0 {
            if let Some(result) = instantiate_easy::<false>(self, subst, true) {
                return result;
            }
        }
        replace(self, |m, offset| {
            let Some(s1) = s.checked_add(offset) else {
                // no loose bound variable can be at or above s1
                return Some(m.clone());
            };
            if u64::from(s1) >= m.loose_bvar_range() {
                return Some(m.clone());
            }
            let &ExprKind::BVar(vidx) = m.kind() else {
                return None;
            };
            debug_assert!(vidx >= s1);
            match window_end(s1, subst.len()) {
                Some(h) if vidx >= h => Some(Expr::bvar(vidx - (h - s1))),
                _ => Some(lift_subst(&subst[(vidx - s1) as usize], offset)),
            }
        })
    }

    /// Substitute `subst[i]` for every loose bound variable `i < n`
    pub fn instantiate(&self, subst: &[Expr]) -> Expr {
        self.instantiate_at(0, subst)
    }

    /// Substitute `e` for the loose bound variable `0`
    pub fn instantiate1(&self, e: &Expr) -> Expr {
        self.instantiate_at(0, slice::from_ref(e))
    }

    /// Substitute `e` for the loose bound variable `s`
    pub fn instantiate1_at(&self, s: u32, e: &Expr) -> Expr {
        self.instantiate_at(s, slice::from_ref(e))
    }

    /// Substitute `subst[n - i - 1]` for every loose bound variable `i < n`
    ///
    /// This is [`Expr::instantiate`] with the substitution reversed, and is the natural form when
    /// the substitution was collected while walking an application spine.
    ///
    /// # Examples
    /// ```
    /// # use plinth_kernel::kernel::*;
    /// let (a, b) = (Expr::fvar("a"), Expr::fvar("b"));
    /// assert_eq!(Expr::bvar(0).instantiate_rev(&[a.clone(), b.clone()]), b);
    /// assert_eq!(Expr::bvar(1).instantiate_rev(&[a.clone(), b.clone()]), a);
    /// assert_eq!(Expr::bvar(2).instantiate_rev(&[a, b]), Expr::bvar(0));
    /// ```
    pub fn instantiate_rev(&self, subst: &[Expr]) -> Expr {
        if !self.has_loose_bvars() || subst.is_empty() {
            return self.clone();
        }
        if let Some(result) = instantiate_easy::<true>(self, subst, true) {
            return result;
        }
        let n = subst.len();
        replace(self, |m, offset| {
            if u64::from(offset) >= m.loose_bvar_range() {
                return Some(m.clone());
            }
            let &ExprKind::BVar(vidx) = m.kind() else {
                return None;
            };
            debug_assert!(vidx >= offset);
            match window_end(offset, n) {
                Some(h) if vidx >= h => Some(Expr::bvar(vidx - (h - offset))),
                _ => Some(lift_subst(&subst[n - (vidx - offset) as usize - 1], offset)),
            }
        })
    }
}

/// Lift a substituted term past the `offset` binders crossed to reach the variable it replaces
fn lift_subst(e: &Expr, offset: u32) -> Expr {
    match e.lift_loose_bvars(offset) {
        Ok(e) => e,
        Err(err) => panic!("{err} under {offset} binders"),
    }
}

/// Substitute into `e` at offset zero without a general traversal
///
/// Handles closed terms, bound variables and (when `app` is set) application spines whose
/// arguments are themselves closed or bound variables. Returns `None` if the answer cannot be
/// determined this way, which is distinct from `Some(e)` (the answer is `e` itself).
fn instantiate_easy<const REV: bool>(e: &Expr, subst: &[Expr], app: bool) -> Option<Expr> {
    if !e.has_loose_bvars() {
        return Some(e.clone());
    }
    match e.kind() {
        &ExprKind::BVar(ix) if (ix as usize) < subst.len() => {
            let ix = ix as usize;
            Some(subst[if REV { subst.len() - ix - 1 } else { ix }].clone())
        }
        ExprKind::App(f, a) if app => {
            let a = instantiate_easy::<REV>(a, subst, false)?;
            let f = instantiate_easy::<REV>(f, subst, true)?;
            Some(e.update_app(f, a))
        }
        _ => None,
    }
}

/// # Beta reduction
impl Expr {
    /// Whether this is a lambda applied to at least one argument
    pub fn is_head_beta(&self) -> bool {
        self.is_app() && self.app_head().is_lambda()
    }

    /// Apply this expression to an argument stack, beta-reducing leading lambdas in one pass
    ///
    /// `rev_args` is in spine order: its last element is the first argument. Up to
    /// `rev_args.len()` leading lambdas are consumed by a single bulk instantiation; leftover
    /// arguments are reapplied to the result.
    ///
    /// # Examples
    /// ```
    /// # use plinth_kernel::kernel::*;
    /// let (a, b, c, ty) = (Expr::fvar("a"), Expr::fvar("b"), Expr::fvar("c"), Expr::fvar("A"));
    /// // λx. λy. y x
    /// let f = Expr::lam("x", ty.clone(), Expr::lam("y", ty, Expr::app(Expr::bvar(0), Expr::bvar(1))));
    /// // (λx. λy. y x) a b c ~~> b a c
    /// let r = f.apply_beta(&[c.clone(), b.clone(), a.clone()]);
    /// assert_eq!(r, Expr::mk_app(b, [a, c]));
    /// ```
    pub fn apply_beta(&self, rev_args: &[Expr]) -> Expr {
        let ExprKind::Lam(_, _, body) = self.kind() else {
            return Expr::mk_rev_app(self.clone(), rev_args);
        };
        let num_args = rev_args.len();
        if num_args == 0 {
            return self.clone();
        }
        let mut body = body;
        let mut m = 1;
        while m < num_args {
            match body.kind() {
                ExprKind::Lam(_, _, inner) => {
                    body = inner;
                    m += 1;
                }
                _ => break,
            }
        }
        let rest = num_args - m;
        Expr::mk_rev_app(body.instantiate(&rev_args[rest..]), &rev_args[..rest])
    }

    /// Beta-reduce the head of this expression until it is no longer a redex
    ///
    /// Only the head is normalized; arguments and bodies are left as they are.
    ///
    /// # Examples
    /// ```
    /// # use plinth_kernel::kernel::*;
    /// let (a, ty) = (Expr::fvar("a"), Expr::fvar("A"));
    /// let id = Expr::lam("x", ty, Expr::bvar(0));
    /// assert_eq!(Expr::app(id, a.clone()).head_beta_reduce(), a);
    /// ```
    pub fn head_beta_reduce(&self) -> Expr {
        let mut t = self.clone();
        while t.is_head_beta() {
            let next = {
                let (f, rev_args) = t.app_rev_args();
                f.apply_beta(&rev_args)
            };
            t = next;
        }
        t
    }
}

/// # Universe parameter instantiation
impl Expr {
    /// Substitute `levels[i]` for the universe parameter `params[i]` throughout this expression
    ///
    /// Subtrees which mention no universe parameter are not visited, and nodes whose levels are
    /// unchanged by the substitution are reused.
    ///
    /// # Examples
    /// ```
    /// # use plinth_kernel::kernel::*;
    /// let u = Name::new("u");
    /// let t = Expr::pi("x", Expr::sort(Level::param("u")), Expr::cnst("List", [Level::param("u")]));
    /// let v = Level::param("v").lift(1);
    /// let r = Expr::pi("x", Expr::sort(v.clone()), Expr::cnst("List", [v.clone()]));
    /// assert_eq!(t.instantiate_lparams(&[u], &[v]), r);
    /// ```
    pub fn instantiate_lparams(&self, params: &[Name], levels: &[Level]) -> Expr {
        if !self.has_param_univ() {
            return self.clone();
        }
        replace(self, |e, _| {
            if !e.has_param_univ() {
                return Some(e.clone());
            }
            match e.kind() {
                ExprKind::Const(_, ls) => Some(
                    match map_reuse(ls, |l| l.instantiate(params, levels)) {
                        Some(ls) => e.update_const(ls),
                        None => e.clone(),
                    },
                ),
                ExprKind::Sort(l) => Some(e.update_sort(l.instantiate(params, levels))),
                _ => None,
            }
        })
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn ty() -> Expr {
        Expr::fvar("A")
    }

    fn arb_expr() -> impl Strategy<Value = Expr> {
        let leaf = prop_oneof![
            (0u32..5).prop_map(Expr::bvar),
            prop_oneof![Just("a"), Just("b"), Just("c")].prop_map(Expr::fvar),
        ];
        leaf.prop_recursive(4, 24, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(f, a)| Expr::app(f, a)),
                inner.clone().prop_map(|body| Expr::lam("x", ty(), body)),
                (inner.clone(), inner.clone()).prop_map(|(ty, body)| Expr::pi("x", ty, body)),
                (inner.clone(), inner).prop_map(|(val, body)| Expr::let_in("x", ty(), val, body)),
            ]
        })
    }

    fn arb_subst() -> impl Strategy<Value = Vec<Expr>> {
        prop::collection::vec(arb_expr(), 0..4)
    }

    /// Reduce the leading lambdas of `f` one argument at a time
    fn beta_one_at_a_time(f: &Expr, args: &[Expr]) -> Expr {
        let mut lams = 0;
        let mut g = f;
        while let ExprKind::Lam(_, _, body) = g.kind() {
            lams += 1;
            g = body;
        }
        let k = lams.min(args.len());
        let mut f = f.clone();
        for arg in &args[..k] {
            let ExprKind::Lam(_, _, body) = f.kind() else {
                unreachable!("instantiation preserves leading lambdas")
            };
            f = body.instantiate1(arg);
        }
        Expr::mk_app(f, args[k..].iter().cloned())
    }

    #[test]
    fn instantiate_bvars() {
        let (a, b) = (Expr::fvar("a"), Expr::fvar("b"));
        let subst = [a.clone(), b.clone()];
        assert_eq!(Expr::bvar(0).instantiate(&subst), a);
        assert_eq!(Expr::bvar(1).instantiate(&subst), b);
        assert_eq!(Expr::bvar(0).instantiate_rev(&subst), b);
        assert_eq!(Expr::bvar(1).instantiate_rev(&subst), a);
        assert_eq!(Expr::bvar(5).instantiate(&subst), Expr::bvar(3));
    }

    #[test]
    fn instantiate_at_offset() {
        let a = Expr::fvar("a");
        // λx. #0 #1 #2 #3 with #1 := a under s = 1
        let t = Expr::lam(
            "x",
            ty(),
            Expr::mk_app(Expr::bvar(0), [Expr::bvar(1), Expr::bvar(2), Expr::bvar(3)]),
        );
        let r = Expr::lam(
            "x",
            ty(),
            Expr::mk_app(Expr::bvar(0), [Expr::bvar(1), a.clone(), Expr::bvar(2)]),
        );
        assert_eq!(t.instantiate1_at(1, &a), r);
    }

    #[test]
    fn substituted_terms_are_lifted() {
        // λx. #1 with #0 := #0 gives λx. #1 (the substituted variable is lifted past x)
        let t = Expr::lam("x", ty(), Expr::bvar(1));
        assert_eq!(t.instantiate1(&Expr::bvar(0)), t);
        // λx. #1 with #0 := λy. #1 gives λx. λy. #2
        let s = Expr::lam("y", ty(), Expr::bvar(1));
        let r = Expr::lam("x", ty(), Expr::lam("y", ty(), Expr::bvar(2)));
        assert_eq!(t.instantiate1(&s), r);
    }

    #[test]
    fn closed_input_is_returned_as_is() {
        let t = Expr::lam("x", ty(), Expr::app(Expr::bvar(0), Expr::fvar("a")));
        let subst = [Expr::fvar("b")];
        assert!(t.instantiate(&subst).ptr_eq(&t));
        assert!(t.instantiate_rev(&subst).ptr_eq(&t));
        let open = Expr::bvar(0);
        assert!(open.instantiate(&[]).ptr_eq(&open));
        assert!(open.instantiate_at(1, &subst).ptr_eq(&open));
    }

    #[test]
    fn easy_path_distinguishes_no_answer() {
        let (a, b) = (Expr::fvar("a"), Expr::fvar("b"));
        let closed = Expr::fvar("c");
        assert!(instantiate_easy::<false>(&closed, &[a.clone()], true).is_some_and(|r| r.ptr_eq(&closed)));
        // f #0 #1 is handled on the spine
        let spine = Expr::mk_app(Expr::fvar("f"), [Expr::bvar(0), Expr::bvar(1)]);
        assert_eq!(
            instantiate_easy::<false>(&spine, &[a.clone(), b.clone()], true),
            Some(Expr::mk_app(Expr::fvar("f"), [a.clone(), b.clone()]))
        );
        // out-of-window variables and binders are not
        assert_eq!(instantiate_easy::<false>(&Expr::bvar(2), &[a.clone()], true), None);
        let lam = Expr::lam("x", ty(), Expr::bvar(1));
        assert_eq!(instantiate_easy::<false>(&lam, &[a.clone()], true), None);
        // nested applications in argument position fall back
        let nested = Expr::app(Expr::fvar("f"), Expr::app(Expr::bvar(0), b));
        assert_eq!(instantiate_easy::<false>(&nested, &[a.clone()], true), None);
        assert_eq!(
            nested.instantiate(&[a.clone()]),
            Expr::app(Expr::fvar("f"), Expr::app(a, Expr::fvar("b")))
        );
    }

    #[test]
    fn window_overflow_substitutes() {
        let (a, b, c) = (Expr::fvar("a"), Expr::fvar("b"), Expr::fvar("c"));
        let t = Expr::bvar(u32::MAX - 1);
        assert_eq!(t.instantiate_at(u32::MAX - 2, &[a, b.clone(), c]), b);
    }

    #[test]
    fn high_window_under_binder() {
        // The closed lambda is skipped without visiting its body
        let t = Expr::app(Expr::bvar(u32::MAX - 1), Expr::lam("x", ty(), Expr::bvar(0)));
        let r = t.instantiate1_at(u32::MAX - 1, &Expr::fvar("a"));
        assert_eq!(r, Expr::app(Expr::fvar("a"), Expr::lam("x", ty(), Expr::bvar(0))));
    }

    #[test]
    fn top_index_is_in_range() {
        let a = Expr::fvar("a");
        assert_eq!(Expr::bvar(u32::MAX).instantiate1_at(u32::MAX, &a), a);
        // λx. #0 #MAX, where #MAX is the loose variable #(MAX - 1)
        let t = Expr::lam("x", ty(), Expr::app(Expr::bvar(0), Expr::bvar(u32::MAX)));
        let r = Expr::lam("x", ty(), Expr::app(Expr::bvar(0), a.clone()));
        assert_eq!(t.instantiate1_at(u32::MAX - 1, &a), r);
    }

    #[test]
    fn lift_overflow_is_an_error() {
        let t = Expr::app(Expr::bvar(u32::MAX - 1), Expr::bvar(u32::MAX));
        assert_eq!(
            t.lift_loose_bvars(1),
            Err(Error::LooseBVarOverflow("Expr::lift_loose_bvars"))
        );
        let low = Expr::app(Expr::bvar(u32::MAX - 2), Expr::bvar(u32::MAX - 1));
        assert_eq!(
            low.lift_loose_bvars(1),
            Ok(Expr::app(Expr::bvar(u32::MAX - 1), Expr::bvar(u32::MAX)))
        );
        // the index under a binder overflows even though the loose variable is #(MAX - 1)
        let bound = Expr::lam("x", ty(), Expr::bvar(u32::MAX));
        assert!(bound.lift_loose_bvars(1).is_err());
    }

    #[test]
    #[should_panic(expected = "loose bound variable overflow")]
    fn unrepresentable_substitution_panics() {
        // λx. #1 with #0 := #MAX would need #(MAX + 1) under the binder
        let _ = Expr::lam("x", ty(), Expr::bvar(1)).instantiate1(&Expr::bvar(u32::MAX));
    }

    #[test]
    fn head_beta_reduce_identity() {
        let a = Expr::fvar("a");
        let id = Expr::lam("x", ty(), Expr::bvar(0));
        assert_eq!(Expr::app(id.clone(), a.clone()).head_beta_reduce(), a);
        // (λx. x) (λx. x) a reduces twice
        let t = Expr::mk_app(id.clone(), [id.clone(), a.clone()]);
        assert_eq!(t.head_beta_reduce(), a);
        // not a redex: returned unchanged
        let stuck = Expr::app(Expr::fvar("f"), Expr::app(id, a));
        assert!(stuck.head_beta_reduce().ptr_eq(&stuck));
    }

    #[test]
    fn apply_beta_partial() {
        let (a, b) = (Expr::fvar("a"), Expr::fvar("b"));
        // λx. λy. x applied to a single argument leaves a lambda
        let k = Expr::lam("x", ty(), Expr::lam("y", ty(), Expr::bvar(1)));
        assert_eq!(k.apply_beta(&[a.clone()]), Expr::lam("y", ty(), a.clone()));
        assert_eq!(k.apply_beta(&[b, a.clone()]), a);
        // non-lambdas are simply applied
        let f = Expr::fvar("f");
        assert_eq!(f.apply_beta(&[a.clone()]), Expr::app(f.clone(), a));
        assert!(k.apply_beta(&[]).ptr_eq(&k));
    }

    #[test]
    fn instantiate_lparams_reuses_nodes() {
        let u = Name::new("u");
        let v = Level::param("v");
        let untouched = Expr::cnst("Nat", []);
        let t = Expr::app(Expr::cnst("List", [Level::param("u")]), untouched.clone());
        let r = t.instantiate_lparams(&[u.clone()], &[v.clone()]);
        assert_eq!(r, Expr::app(Expr::cnst("List", [v.clone()]), untouched.clone()));
        let ExprKind::App(_, arg) = r.kind() else {
            panic!("expected application, got {:?}", r)
        };
        assert!(arg.ptr_eq(&untouched));
        // parameters not mentioned: nothing changes
        let w = Expr::sort(Level::param("w"));
        assert!(w.instantiate_lparams(&[u], &[v]).ptr_eq(&w));
    }

    proptest! {
        #[test]
        fn no_op_below_range(t in arb_expr(), subst in arb_subst(), extra in 0u32..3) {
            let s = u32::try_from(t.loose_bvar_range()).unwrap() + extra;
            prop_assert!(t.instantiate_at(s, &subst).ptr_eq(&t));
        }

        #[test]
        fn shift_above_window(ix in 0u32..100, s in 0u32..10, subst in arb_subst()) {
            let n = subst.len() as u32;
            let t = Expr::bvar(s + n + ix);
            prop_assert_eq!(t.instantiate_at(s, &subst), Expr::bvar(s + ix));
            let below = Expr::bvar(s.saturating_sub(1));
            if s > 0 {
                prop_assert!(below.instantiate_at(s, &subst).ptr_eq(&below));
            }
        }

        #[test]
        fn reversal_law(t in arb_expr(), subst in arb_subst()) {
            let mut reversed = subst.clone();
            reversed.reverse();
            prop_assert_eq!(t.instantiate_rev(&subst), t.instantiate(&reversed));
        }

        #[test]
        fn bulk_agrees_with_single_steps(t in arb_expr(), subst in arb_subst()) {
            // #n-1 first, each substituted term lifted past the binders still to be removed
            let mut stepwise = t.clone();
            for (ix, e) in subst.iter().enumerate().rev() {
                let lifted = e.lift_loose_bvars(ix as u32).unwrap();
                stepwise = stepwise.instantiate1_at(ix as u32, &lifted);
            }
            prop_assert_eq!(t.instantiate(&subst), stepwise);
        }

        #[test]
        fn beta_bulk_equivalence(
            lams in 0usize..4,
            body in arb_expr(),
            args in prop::collection::vec(arb_expr(), 0..5),
        ) {
            let f = (0..lams).fold(body, |body, _| Expr::lam("x", ty(), body));
            let mut rev_args = args.clone();
            rev_args.reverse();
            prop_assert_eq!(f.apply_beta(&rev_args), beta_one_at_a_time(&f, &args));
        }
    }
}
