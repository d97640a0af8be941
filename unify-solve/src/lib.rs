//! `unify-solve`: the two-pass unification and overload-resolution engine.
//!
//! Pass 1 ([`tree::TreeNode::possible_unifiers`]) walks an expression tree
//! bottom-up, enumerating what each subtree could possibly produce. Pass 2
//! ([`tree::TreeNode::resolve_unifiers`]) walks it top-down from a required
//! type, committing each node to a single overload and, where needed, a
//! single implicit conversion. Pass 3 ([`tree::TreeNode::finalize_unifiers`])
//! re-applies the final substitution so every node's recorded type is
//! fully simplified. [`resolve::resolve`] then hands the result to the
//! host to assemble its own concrete type representation.

pub mod cast;
pub mod converters;
pub mod engine;
pub mod error;
pub mod options;
pub mod resolve;
pub mod tree;

pub use crate::cast::{CastPolicy, RealizedImplicitCast};
pub use crate::converters::{ConverterRegistry, ImplicitConverter};
pub use crate::engine::UnifyEngine;
pub use crate::error::{SolveError, SolveResult};
pub use crate::options::ResolveOptions;
pub use crate::resolve::{resolve, ConcretizeError, Host};
pub use crate::tree::{resolve_root, AtomicNode, MethodNode, TreeNode};

pub use unify_ir::term::{Dummy, Known, TypeTerm, Var, VarFactory, ARRAY_HEAD, METHOD_TAG};
pub use unify_ir::{Fallible, UnifyError, Unifier};
