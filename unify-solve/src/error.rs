//! The resolution-level error taxonomy, the overload-search entries layered
//! over `unify_ir::UnifyError`.

use failure::Fail;

use unify_ir::term::{Dummy, TypeTerm};
use unify_ir::UnifyError;

#[derive(Fail, Debug, Clone)]
pub enum SolveError {
    #[fail(display = "{}", _0)]
    Unify(#[cause] UnifyError),

    #[fail(display = "no overload could accept the given argument types")]
    NoPossibleOverload {
        overloads: Vec<Dummy>,
        argset: Vec<Vec<TypeTerm>>,
    },

    #[fail(
        display = "no overload resolves to the required type `{}`",
        required
    )]
    NoResolvableOverload {
        required: TypeTerm,
        errors: Vec<SolveError>,
    },

    #[fail(display = "ambiguous: more than one overload matches directly")]
    MultipleOverloads,

    #[fail(display = "ambiguous: more than one implicit conversion applies")]
    MultipleImplicits,

    #[fail(
        display = "expected exactly one possible top-level type, found {}",
        count
    )]
    TooManyPossibleTypes { count: usize },
}

impl From<UnifyError> for SolveError {
    fn from(e: UnifyError) -> SolveError {
        SolveError::Unify(e)
    }
}

pub type SolveResult<T> = Result<T, SolveError>;
