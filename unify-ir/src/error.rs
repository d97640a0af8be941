//! The term-level error taxonomy: the entries that arise while unifying two
//! terms. Resolution-level errors (`NoPossibleOverload`,
//! `NoResolvableOverload`, `MultipleOverloads`, `MultipleImplicits`,
//! `TooManyPossibleTypes`) live in `unify-solve`, since they carry
//! overload/tree context this crate does not know about.
//!
//! A `failure::Fail` enum with `#[fail(display = ..)]` messages rather than
//! a hand-rolled `Display` impl.

use failure::Fail;

use crate::term::{TypeTerm, Var};

#[derive(Fail, Debug, Clone)]
pub enum UnifyError {
    #[fail(display = "type mismatch: `{}` is not `{}`", a, b)]
    NotEqual { a: TypeTerm, b: TypeTerm },

    #[fail(display = "type mismatch: known head `{}` is not `{}`", a, b)]
    NotEqualKnown { a: TypeTerm, b: TypeTerm },

    #[fail(display = "type mismatch: dummy tag `{}` is not `{}`", a, b)]
    NotEqualDummy { a: TypeTerm, b: TypeTerm },

    #[fail(
        display = "arity mismatch: `{}` and `{}` have matching heads but differing arity",
        a, b
    )]
    ArityNotEqual { a: TypeTerm, b: TypeTerm },

    #[fail(
        display = "cannot construct infinite type: `{}` occurs in `{}`",
        var, term
    )]
    RecursionBinding { var: Var, term: TypeTerm },

    #[fail(
        display = "cannot unify restricted variables `{}` and `{}`: no admissible type in common",
        a, b
    )]
    IntersectionFailure { a: Var, b: Var },

    #[fail(
        display = "`{}` is not an admissible binding for restricted variable `{}`",
        term, var
    )]
    RestrictionFailure { var: Var, term: TypeTerm },

    #[fail(display = "variable `{}` has no binding", _0)]
    UnboundRestr(Var),
}

pub type Fallible<T> = Result<T, UnifyError>;
