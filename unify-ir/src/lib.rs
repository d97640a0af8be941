//! `unify-ir`: the term representation, substitution, and error taxonomy
//! shared by the two-pass unification and overload-resolution engine in
//! `unify-solve`.

pub mod error;
pub mod term;
pub mod unifier;

pub use crate::error::{Fallible, UnifyError};
pub use crate::term::{Dummy, Known, TypeTerm, Var, VarFactory, ARRAY_HEAD, METHOD_TAG};
pub use crate::unifier::{UnifyCallback, Unifier};
