//! The immutable `Var -> TypeTerm` substitution and the binding rules for
//! restricted (finite-domain) variables, per the restricted-variable
//! intersection semantics.
//!
//! Kept as a persistent, sharing `Arc<FxHashMap<..>>` rather than a mutable
//! union-find table with snapshot/rollback: two `Unifier`s produced during
//! the same pass must share nothing mutable, since pass 1 explores several
//! speculative overloads whose substitutions never see each other's
//! bindings.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::UnifyError;
use crate::term::{Known, TypeTerm, Var, VarFactory};

/// A callback capable of unifying two terms under a given `Unifier`. Passed
/// into `Unifier::bind` so that the restricted-Known case can recurse
/// into the full unification algorithm without `unify-ir` depending on
/// `UnifyEngine` (which lives a layer up, in `unify-solve`).
pub type UnifyCallback<'a> =
    dyn FnMut(&TypeTerm, &TypeTerm, &Unifier) -> Result<Unifier, UnifyError> + 'a;

#[derive(Clone, Debug, Default)]
pub struct Unifier {
    bindings: Arc<FxHashMap<u32, TypeTerm>>,
}

impl Unifier {
    pub fn new() -> Unifier {
        Unifier {
            bindings: Arc::new(FxHashMap::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn binding_of(&self, v: &Var) -> Option<&TypeTerm> {
        self.bindings.get(&v.id())
    }

    pub fn is_bound(&self, v: &Var) -> bool {
        self.binding_of(v).is_some()
    }

    /// Chases a Var through the map until reaching a non-Var or an unbound
    /// Var. Knowns and Dummies are returned as-is (shallow: does not
    /// recurse into their arguments).
    pub fn resolve(&self, t: &TypeTerm) -> TypeTerm {
        let mut current = t.clone();
        while let TypeTerm::Var(v) = &current {
            match self.bindings.get(&v.id()) {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        current
    }

    /// Deeply applies this substitution: resolves `t`, then recurses into
    /// every argument of the result. This is what pass 2/3's
    /// `t.simplify(σ)` refers to.
    pub fn simplify(&self, t: &TypeTerm) -> TypeTerm {
        match self.resolve(t) {
            TypeTerm::Known(k) => TypeTerm::Known(Known {
                head: k.head,
                args: k.args.iter().map(|a| self.simplify(a)).collect(),
            }),
            TypeTerm::Dummy(d) => TypeTerm::Dummy(crate::term::Dummy {
                tag: d.tag,
                args: d.args.iter().map(|a| self.simplify(a)).collect(),
            }),
            var @ TypeTerm::Var(_) => var,
        }
    }

    /// Substitution-aware occurs check: does `v` occur in `t` once every
    /// bound Var reachable from `t` is chased? This is stricter than
    /// `term::occurs_in`, which only looks at `t` as literally written.
    pub fn occurs(&self, v: &Var, t: &TypeTerm) -> bool {
        match t {
            TypeTerm::Var(u) => {
                if u == v {
                    true
                } else {
                    match self.binding_of(u) {
                        Some(bound) => self.occurs(v, &bound.clone()),
                        None => false,
                    }
                }
            }
            TypeTerm::Known(k) => k.args.iter().any(|a| self.occurs(v, a)),
            TypeTerm::Dummy(d) => d.args.iter().any(|a| self.occurs(v, a)),
        }
    }

    /// Raw, unchecked insertion: `v -> t`. Not exposed outside this crate's
    /// binding logic; every caller must have already discharged the occurs
    /// check and any restricted-domain bookkeeping.
    fn with_raw_binding(&self, v: &Var, t: TypeTerm) -> Unifier {
        let mut next = (*self.bindings).clone();
        next.insert(v.id(), t);
        Unifier {
            bindings: Arc::new(next),
        }
    }

    /// Binds `v -> t`, implementing the restricted-variable semantics:
    ///
    /// - `v` unrestricted: plain bind.
    /// - `v` restricted, `t` an unrestricted Var `u`: bind `u -> v` instead,
    ///   so the restriction survives at the canonical (unbound) position.
    /// - `v` restricted, `t` a restricted Var `u`: intersect the domains (the
    ///   match arms below cover each sub-case).
    /// - `v` restricted, `t` a Dummy: forbidden (restricted Vars are scalar).
    /// - `v` restricted, `t` a Known: the Known must be admissible, trying
    ///   each candidate of `v`'s domain against `t` via `try_unify` when `t`
    ///   is not yet fully resolved.
    ///
    /// The occurs check is the caller's responsibility (`UnifyEngine`
    /// performs it before ever calling `bind`, since it must run against the
    /// *original* `t`, before any of the case analysis below rewrites which
    /// variable is actually being bound).
    pub fn bind(
        &self,
        factory: &VarFactory,
        v: &Var,
        t: &TypeTerm,
        try_unify: &mut UnifyCallback<'_>,
    ) -> Result<Unifier, UnifyError> {
        tracing::debug!("bind: {:?} -> {:?}", v, t);
        let restricted = match &v.restricted {
            None => return Ok(self.with_raw_binding(v, t.clone())),
            Some(r) => r,
        };

        match t {
            TypeTerm::Var(u) => match &u.restricted {
                None => Ok(self.with_raw_binding(u, v.to_term())),
                Some(r_u) => {
                    let intersection: Vec<Known> = restricted
                        .iter()
                        .filter(|k| r_u.contains(k))
                        .cloned()
                        .collect();
                    if intersection.is_empty() {
                        return Err(UnifyError::IntersectionFailure {
                            a: v.clone(),
                            b: u.clone(),
                        });
                    }
                    if intersection.len() == r_u.len() {
                        Ok(self.with_raw_binding(v, t.clone()))
                    } else if intersection.len() == restricted.len() {
                        Ok(self.with_raw_binding(u, v.to_term()))
                    } else if intersection.len() == 1 {
                        let only = TypeTerm::Known(intersection[0].clone());
                        let with_u = self.with_raw_binding(u, only.clone());
                        Ok(with_u.with_raw_binding(v, only))
                    } else {
                        let w = factory.fresh_restricted(intersection);
                        let with_u = self.with_raw_binding(u, w.to_term());
                        Ok(with_u.with_raw_binding(v, w.to_term()))
                    }
                }
            },
            TypeTerm::Dummy(_) => Err(UnifyError::RestrictionFailure {
                var: v.clone(),
                term: t.clone(),
            }),
            TypeTerm::Known(k) => {
                if t.is_resolved() {
                    if restricted.contains(k) {
                        Ok(self.with_raw_binding(v, t.clone()))
                    } else {
                        Err(UnifyError::RestrictionFailure {
                            var: v.clone(),
                            term: t.clone(),
                        })
                    }
                } else {
                    let mut last_sigma = None;
                    let mut successes = 0;
                    for candidate in restricted.iter() {
                        let candidate_term = TypeTerm::Known(candidate.clone());
                        if let Ok(sigma) = try_unify(&candidate_term, t, self) {
                            successes += 1;
                            last_sigma = Some(sigma);
                        }
                    }
                    match successes {
                        0 => Err(UnifyError::RestrictionFailure {
                            var: v.clone(),
                            term: t.clone(),
                        }),
                        1 => {
                            let sigma = last_sigma.expect("successes == 1");
                            Ok(sigma.with_raw_binding(v, t.clone()))
                        }
                        _ => Ok(self.with_raw_binding(v, t.clone())),
                    }
                }
            }
        }
    }
}
