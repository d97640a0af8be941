//! What a tree node records once it has decided to insert an implicit
//! conversion: which converter, the realized target type, and the
//! realized values of whatever generic Vars the converter's fresh
//! instance introduced. `finalize_unifiers` re-simplifies all three
//! fields through the final substitution.

use std::sync::Arc;

use unify_ir::term::TypeTerm;
use unify_ir::Unifier;

use crate::converters::ImplicitConverter;

/// A chosen, fresh instance of an [`ImplicitConverter`] attached to a tree
/// node, plus the realized types it committed to at the point of
/// selection.
#[derive(Clone, Debug)]
pub struct RealizedImplicitCast {
    pub converter: ImplicitConverter,
    pub source: TypeTerm,
    pub target: TypeTerm,
}

impl RealizedImplicitCast {
    pub fn new(converter: ImplicitConverter, sigma: &Unifier) -> RealizedImplicitCast {
        let source = sigma.simplify(converter.source());
        let target = sigma.simplify(converter.target());
        RealizedImplicitCast {
            converter,
            source,
            target,
        }
    }

    /// Re-applies a (presumably further narrowed) substitution to the
    /// realized source/target, as `finalize_unifiers` does to every node.
    pub fn resimplify(&self, sigma: &Unifier) -> RealizedImplicitCast {
        RealizedImplicitCast {
            converter: self.converter.clone(),
            source: sigma.simplify(&self.source),
            target: sigma.simplify(&self.target),
        }
    }
}

/// What a `MethodNode` says about whether a given argument position of a
/// given overload may receive an implicit cast.
#[derive(Clone, Debug)]
pub enum CastPolicy {
    /// Only this specific converter may be used at this position.
    RequiredCast(Arc<ImplicitConverter>),
    /// Any converter the registry can find is eligible.
    AnyCastAllowed,
    /// The argument's natural type must unify directly; no cast.
    NoCastAllowed,
}
