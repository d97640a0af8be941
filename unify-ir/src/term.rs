//! The `TypeTerm` sum type: known types, method-like "dummy" aggregates, and
//! unification variables.

use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The conventional head used for the distinguished "array of" type
/// constructor, so that languages where arrays are not first-class generics
/// can still be modeled with a single unary constructor.
pub const ARRAY_HEAD: &str = "Array";

/// The conventional tag used for method-signature `Dummy` aggregates:
/// `args = [param1, .., paramN, return]`.
pub const METHOD_TAG: &str = "method";

/// A type expression: a known type or type-constructor application, an
/// ordered aggregate ("dummy") such as a method signature, or a unification
/// variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeTerm {
    Known(Known),
    Dummy(Dummy),
    Var(Var),
}

impl TypeTerm {
    pub fn known(head: impl Into<Arc<str>>, args: Vec<TypeTerm>) -> TypeTerm {
        TypeTerm::Known(Known {
            head: head.into(),
            args,
        })
    }

    pub fn atom(head: impl Into<Arc<str>>) -> TypeTerm {
        TypeTerm::known(head, vec![])
    }

    pub fn array_of(elem: TypeTerm) -> TypeTerm {
        TypeTerm::known(ARRAY_HEAD, vec![elem])
    }

    /// A `Dummy("method", [params.., ret])`. Panics if `params` plus the
    /// return type would be empty; a Dummy's arity must be at least 1.
    pub fn method(params: Vec<TypeTerm>, ret: TypeTerm) -> TypeTerm {
        let mut args = params;
        args.push(ret);
        TypeTerm::Dummy(Dummy {
            tag: METHOD_TAG.into(),
            args,
        })
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self {
            TypeTerm::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_known(&self) -> Option<&Known> {
        match self {
            TypeTerm::Known(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_dummy(&self) -> Option<&Dummy> {
        match self {
            TypeTerm::Dummy(d) => Some(d),
            _ => None,
        }
    }

    /// The head used to index this term for conversion lookups: `Some(head)`
    /// for a `Known`, `None` otherwise (Dummies and Vars are not head-known).
    pub fn known_head(&self) -> Option<&Arc<str>> {
        self.as_known().map(|k| &k.head)
    }

    /// `is_resolved(t)`: true iff `t` is `Known` and every argument is
    /// resolved. Vars are never resolved (even structurally). Dummies
    /// resolve through their last argument only. This is a static,
    /// substitution-free predicate over the term as written -- it does not
    /// chase variable bindings (see `Unifier::simplify` for that).
    pub fn is_resolved(&self) -> bool {
        match self {
            TypeTerm::Known(k) => k.args.iter().all(TypeTerm::is_resolved),
            TypeTerm::Dummy(d) => d.return_term().is_resolved(),
            TypeTerm::Var(_) => false,
        }
    }
}

impl fmt::Display for TypeTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTerm::Known(k) => write!(f, "{}", k),
            TypeTerm::Dummy(d) => write!(f, "{}", d),
            TypeTerm::Var(v) => write!(f, "{}", v),
        }
    }
}

/// A known atomic type (`args` empty) or an application of a known type
/// constructor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Known {
    pub head: Arc<str>,
    pub args: Vec<TypeTerm>,
}

impl fmt::Display for Known {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.head)
        } else {
            write!(f, "{}<", self.head)?;
            for (i, a) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", a)?;
            }
            write!(f, ">")
        }
    }
}

/// An ordered aggregate of terms whose semantic "return" is `args[-1]`. The
/// canonical use is `tag = "method"`, with `args = [param1, .., paramN,
/// return]`. A Dummy never resolves to a runtime type on its own.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Dummy {
    pub tag: Arc<str>,
    pub args: Vec<TypeTerm>,
}

impl Dummy {
    /// Panics if `args` is empty: a Dummy's arity must be at least 1. This
    /// is a construction-time invariant, not a runtime error condition.
    pub fn new(tag: impl Into<Arc<str>>, args: Vec<TypeTerm>) -> Dummy {
        assert!(!args.is_empty(), "Dummy arity must be at least 1");
        Dummy {
            tag: tag.into(),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn return_term(&self) -> &TypeTerm {
        self.args.last().expect("Dummy arity must be at least 1")
    }

    pub fn params(&self) -> &[TypeTerm] {
        &self.args[..self.args.len() - 1]
    }
}

impl fmt::Display for Dummy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.tag)?;
        for (i, a) in self.params().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, ") -> {}", self.return_term())
    }
}

/// A unification variable with a fresh identity, optionally restricted to a
/// non-empty finite set of `Known` terms (models numeric-literal
/// polymorphism: `5` may be any of `{int, float, double}`).
///
/// Two Vars are equal iff their identity (fresh id) is identical; the
/// `restricted` payload is not consulted, since `VarFactory` never mints two
/// Vars with the same id but different restrictions.
#[derive(Clone, Debug)]
pub struct Var {
    id: u32,
    pub restricted: Option<Arc<Vec<Known>>>,
}

impl Var {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted.is_some()
    }

    pub fn to_term(&self) -> TypeTerm {
        TypeTerm::Var(self.clone())
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Var) -> bool {
        self.id == other.id
    }
}

impl Eq for Var {}

impl Hash for Var {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.id)
    }
}

/// Allocates fresh, session-scoped `Var` identities. One `VarFactory` is
/// owned per type-checking session (per root `possible_unifiers` call).
#[derive(Debug, Default)]
pub struct VarFactory {
    next: Cell<u32>,
}

impl VarFactory {
    pub fn new() -> VarFactory {
        VarFactory { next: Cell::new(0) }
    }

    pub fn fresh(&self) -> Var {
        let id = self.next.get();
        self.next.set(id + 1);
        Var {
            id,
            restricted: None,
        }
    }

    /// `restricted` must be non-empty and must not (transitively) contain a
    /// Var; callers are expected to uphold this invariant, as it is cheaper
    /// to enforce at the few construction sites than on every lookup.
    pub fn fresh_restricted(&self, restricted: Vec<Known>) -> Var {
        assert!(
            !restricted.is_empty(),
            "a restricted Var's domain must be non-empty"
        );
        let id = self.next.get();
        self.next.set(id + 1);
        Var {
            id,
            restricted: Some(Arc::new(restricted)),
        }
    }
}

/// Structural occurs check: `v` occurs in `t` (without consulting any
/// substitution) if `t` *is* `v`, or if `v` occurs in any argument of a
/// `Known`/`Dummy`. Used as the substitution-free half of the real,
/// substitution-aware occurs check on `Unifier`.
pub fn occurs_in(v: &Var, t: &TypeTerm) -> bool {
    match t {
        TypeTerm::Var(u) => u == v,
        TypeTerm::Known(k) => k.args.iter().any(|a| occurs_in(v, a)),
        TypeTerm::Dummy(d) => d.args.iter().any(|a| occurs_in(v, a)),
    }
}
