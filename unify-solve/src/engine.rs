//! The core two-term unification algorithm: resolve both sides through the
//! current substitution, dispatch on their shapes, and recurse structurally
//! into Known/Dummy arguments. Wrapped in an outer fixpoint loop because
//! binding a restricted variable can narrow another restricted variable's
//! domain to a single Known, which in turn may let a previously-stuck
//! argument pair unify.
//!
//! The recursive-argument walk is an explicit loop rather than a visitor,
//! and the restricted-domain cases are delegated to `unify_ir::Unifier::bind`.

use tracing::instrument;

use unify_ir::term::{TypeTerm, Var, VarFactory};
use unify_ir::{Fallible, UnifyError, Unifier};

use crate::options::ResolveOptions;

pub struct UnifyEngine<'a> {
    factory: &'a VarFactory,
    options: &'a ResolveOptions,
}

impl<'a> UnifyEngine<'a> {
    pub fn new(factory: &'a VarFactory, options: &'a ResolveOptions) -> UnifyEngine<'a> {
        UnifyEngine { factory, options }
    }

    pub fn factory(&self) -> &'a VarFactory {
        self.factory
    }

    pub fn options(&self) -> &'a ResolveOptions {
        self.options
    }

    /// Unifies `a` and `b` under `sigma`, re-running the single-pass walk
    /// until no new binding appears (or `max_unify_iterations` is hit, at
    /// which point the substitution is returned as-is rather than treated
    /// as an error: a non-growing substitution is always a valid fixpoint).
    #[instrument(level = "debug", skip(self, sigma))]
    pub fn unify(&self, a: &TypeTerm, b: &TypeTerm, sigma: &Unifier) -> Fallible<Unifier> {
        let mut current = sigma.clone();
        for iteration in 0..self.options.max_unify_iterations {
            let before = current.len();
            current = self.unify_step(a, b, &current)?;
            let added = current.len() - before;
            tracing::trace!("unify: iteration {} produced {} new bindings", iteration, added);
            if added == 0 {
                break;
            }
        }
        Ok(current)
    }

    fn unify_step(&self, a: &TypeTerm, b: &TypeTerm, sigma: &Unifier) -> Fallible<Unifier> {
        let ra = sigma.resolve(a);
        let rb = sigma.resolve(b);
        if ra == rb {
            return Ok(sigma.clone());
        }

        match (&ra, &rb) {
            (TypeTerm::Var(v), _) => self.bind_var(v, &rb, sigma),
            (_, TypeTerm::Var(v)) => self.bind_var(v, &ra, sigma),
            (TypeTerm::Known(ka), TypeTerm::Known(kb)) => {
                if ka.head != kb.head {
                    return Err(UnifyError::NotEqualKnown { a: ra, b: rb });
                }
                if ka.args.len() != kb.args.len() {
                    return Err(UnifyError::ArityNotEqual { a: ra, b: rb });
                }
                let mut next = sigma.clone();
                for (x, y) in ka.args.iter().zip(kb.args.iter()) {
                    next = self.unify_step(x, y, &next)?;
                }
                Ok(next)
            }
            (TypeTerm::Dummy(da), TypeTerm::Dummy(db)) => {
                if da.tag != db.tag {
                    return Err(UnifyError::NotEqualDummy { a: ra, b: rb });
                }
                if da.args.len() != db.args.len() {
                    return Err(UnifyError::ArityNotEqual { a: ra, b: rb });
                }
                let mut next = sigma.clone();
                for (x, y) in da.args.iter().zip(db.args.iter()) {
                    next = self.unify_step(x, y, &next)?;
                }
                Ok(next)
            }
            _ => Err(UnifyError::NotEqual { a: ra, b: rb }),
        }
    }

    fn bind_var(&self, v: &Var, t: &TypeTerm, sigma: &Unifier) -> Fallible<Unifier> {
        if sigma.occurs(v, t) {
            return Err(UnifyError::RecursionBinding {
                var: v.clone(),
                term: t.clone(),
            });
        }
        sigma.bind(self.factory, v, t, &mut |x, y, s| self.unify_step(x, y, s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unifies_matching_known_constructors() {
        let factory = VarFactory::new();
        let options = ResolveOptions::default();
        let engine = UnifyEngine::new(&factory, &options);
        let v = factory.fresh();
        let a = TypeTerm::known("List", vec![TypeTerm::Var(v.clone())]);
        let b = TypeTerm::known("List", vec![TypeTerm::atom("int")]);
        let sigma = engine.unify(&a, &b, &Unifier::new()).unwrap();
        assert_eq!(sigma.resolve(&v.to_term()), TypeTerm::atom("int"));
    }

    #[test]
    fn rejects_mismatched_constructors() {
        let factory = VarFactory::new();
        let options = ResolveOptions::default();
        let engine = UnifyEngine::new(&factory, &options);
        let a = TypeTerm::atom("int");
        let b = TypeTerm::atom("string");
        assert!(engine.unify(&a, &b, &Unifier::new()).is_err());
    }

    #[test]
    fn rejects_occurs_check_violation() {
        let factory = VarFactory::new();
        let options = ResolveOptions::default();
        let engine = UnifyEngine::new(&factory, &options);
        let v = factory.fresh();
        let list_of_v = TypeTerm::known("List", vec![TypeTerm::Var(v.clone())]);
        let err = engine.unify(&v.to_term(), &list_of_v, &Unifier::new()).unwrap_err();
        assert!(matches!(err, UnifyError::RecursionBinding { .. }));
    }

    #[test]
    fn narrowing_one_restricted_var_can_unlock_another_pair() {
        let factory = VarFactory::new();
        let options = ResolveOptions::default();
        let engine = UnifyEngine::new(&factory, &options);
        let known = |h: &str| unify_ir::term::Known {
            head: h.into(),
            args: vec![],
        };
        let a = factory.fresh_restricted(vec![known("float"), known("double")]);
        let b = factory.fresh_restricted(vec![known("double"), known("string")]);
        let sigma = engine.unify(&a.to_term(), &b.to_term(), &Unifier::new()).unwrap();
        assert_eq!(sigma.resolve(&a.to_term()), TypeTerm::atom("double"));
        assert_eq!(sigma.resolve(&b.to_term()), TypeTerm::atom("double"));
    }
}
