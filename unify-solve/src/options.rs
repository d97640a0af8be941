//! Per-session configuration for a resolution run: a small, `Clone`,
//! all-defaults-sane options struct threaded into the engine rather than
//! global state.

/// Tunables for a single call to [`crate::resolve`](crate::resolve::resolve)
/// or the pass 1/2/3 pipeline.
#[derive(Clone, Debug)]
pub struct ResolveOptions {
    /// Caps how many iterations the fixpoint loop in `UnifyEngine::unify`
    /// may run before giving up and treating the substitution as stable.
    /// Guards against a pathological restricted-variable chain that never
    /// stops narrowing.
    pub max_unify_iterations: usize,

    /// Whether `resolve_unifiers`'s permissive second attempt -- searching
    /// for an implicit conversion once no overload matches directly -- runs
    /// at all. Disabling this makes every call site behave as if it had
    /// been declared with `CastPolicy::NoCastAllowed`.
    pub allow_implicit_casts_on_retry: bool,
}

impl Default for ResolveOptions {
    fn default() -> ResolveOptions {
        ResolveOptions {
            max_unify_iterations: 64,
            allow_implicit_casts_on_retry: true,
        }
    }
}
