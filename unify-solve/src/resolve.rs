//! Turning a fully (or partially) simplified `TypeTerm` into the host's own
//! runtime type representation. The core crate never constructs a concrete
//! type itself; it only ever hands the host a `Known` head plus its
//! already-resolved arguments and lets the host assemble it.

use failure::Fail;

use unify_ir::term::{TypeTerm, ARRAY_HEAD};
use unify_ir::Unifier;

/// A host-provided assembler from resolved `TypeTerm`s to its own concrete
/// type representation: a trait the embedding application implements, not
/// something this crate can supply a default for.
pub trait Host {
    type Concrete: Clone + std::fmt::Debug;
    type Error: Fail;

    /// Assembles the atomic type named `head` (a `Known` with no
    /// arguments). Implementations should fail if `head` in fact names a
    /// type constructor that requires arguments.
    fn atom(&self, head: &str) -> Result<Self::Concrete, Self::Error>;

    /// Assembles an application of the `head` type constructor to already
    /// resolved `args`.
    fn apply(&self, head: &str, args: Vec<Self::Concrete>) -> Result<Self::Concrete, Self::Error>;

    /// Assembles the distinguished "array of" constructor. Split from
    /// `apply` since most hosts model arrays as a builtin rather than a
    /// user type constructor.
    fn array_of(&self, element: Self::Concrete) -> Self::Concrete;
}

#[derive(Fail, Debug)]
pub enum ConcretizeError<E: Fail> {
    #[fail(display = "cannot finalize: `{}` is still unresolved", _0)]
    Unresolved(TypeTerm),

    #[fail(display = "{}", _0)]
    Host(#[cause] E),
}

/// Walks `term` through `sigma` and assembles the host's concrete
/// representation bottom-up. Fails if any reachable position is still an
/// unbound Var -- resolution must have already committed to ground types
/// before this is called (it is the last step after pass 3 finalizes).
pub fn resolve<H: Host>(
    host: &H,
    term: &TypeTerm,
    sigma: &Unifier,
) -> Result<H::Concrete, ConcretizeError<H::Error>> {
    match sigma.resolve(term) {
        TypeTerm::Var(_) => Err(ConcretizeError::Unresolved(sigma.simplify(term))),
        TypeTerm::Dummy(d) => resolve(host, d.return_term(), sigma),
        TypeTerm::Known(k) => {
            if k.args.is_empty() {
                host.atom(&k.head).map_err(ConcretizeError::Host)
            } else {
                let mut args = Vec::with_capacity(k.args.len());
                for a in &k.args {
                    args.push(resolve(host, a, sigma)?);
                }
                if &*k.head == ARRAY_HEAD {
                    let elem = args
                        .into_iter()
                        .next()
                        .expect("Array always carries exactly one element type");
                    Ok(host.array_of(elem))
                } else {
                    host.apply(&k.head, args).map_err(ConcretizeError::Host)
                }
            }
        }
    }
}
