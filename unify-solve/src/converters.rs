//! Implicit conversions: a registered `(Source) -> Target` method term,
//! indexed both by source head (for "what can this value be cast to") and
//! target head (for "what can produce this required type"), plus the
//! `global` list of converters whose source side is not head-known (fully
//! generic conversions).
//!
//! Declarations are bucketed by the head they index on so a query only
//! ever walks the relevant subset.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use unify_ir::term::{Dummy, Known, TypeTerm, Var, VarFactory, METHOD_TAG};

/// A single registered implicit conversion: a `Dummy("method", [source,
/// target])` possibly containing generic Vars shared between its source
/// and target positions.
#[derive(Clone, Debug)]
pub struct ImplicitConverter {
    method: Dummy,
}

impl ImplicitConverter {
    pub fn new(source: TypeTerm, target: TypeTerm) -> ImplicitConverter {
        ImplicitConverter {
            method: Dummy::new(METHOD_TAG, vec![source, target]),
        }
    }

    pub fn source(&self) -> &TypeTerm {
        &self.method.params()[0]
    }

    pub fn target(&self) -> &TypeTerm {
        self.method.return_term()
    }

    pub fn source_head(&self) -> Option<&Arc<str>> {
        self.source().known_head()
    }

    pub fn target_head(&self) -> Option<&Arc<str>> {
        self.target().known_head()
    }

    /// Renames every generic Var appearing in this converter's method term
    /// to a fresh one (via `factory`), preserving each Var's restricted
    /// domain under the new identity. Two Vars that were the same before
    /// renaming are still the same after -- shared generics (`T -> List<T>`)
    /// stay linked in the fresh instance.
    pub fn fresh_instance(&self, factory: &VarFactory) -> ImplicitConverter {
        let mut renaming: FxHashMap<u32, Var> = FxHashMap::default();
        let source = freshen(self.source(), factory, &mut renaming);
        let target = freshen(self.target(), factory, &mut renaming);
        ImplicitConverter::new(source, target)
    }
}

/// Renames every generic Var in a whole overload signature together, so
/// shared generics across parameters and the return type (`T -> method(T,
/// List<T>)`) stay linked in the fresh instance. Used by pass 1/2 each
/// time an overload is tried against a fresh set of argument candidates.
pub(crate) fn freshen_dummy(d: &Dummy, factory: &VarFactory) -> Dummy {
    let mut renaming: FxHashMap<u32, Var> = FxHashMap::default();
    Dummy {
        tag: d.tag.clone(),
        args: d
            .args
            .iter()
            .map(|a| freshen(a, factory, &mut renaming))
            .collect(),
    }
}

fn freshen(t: &TypeTerm, factory: &VarFactory, renaming: &mut FxHashMap<u32, Var>) -> TypeTerm {
    match t {
        TypeTerm::Var(v) => {
            let fresh = renaming
                .entry(v.id())
                .or_insert_with(|| match &v.restricted {
                    None => factory.fresh(),
                    Some(domain) => factory.fresh_restricted((**domain).clone()),
                })
                .clone();
            TypeTerm::Var(fresh)
        }
        TypeTerm::Known(k) => TypeTerm::Known(Known {
            head: k.head.clone(),
            args: k.args.iter().map(|a| freshen(a, factory, renaming)).collect(),
        }),
        TypeTerm::Dummy(d) => TypeTerm::Dummy(Dummy {
            tag: d.tag.clone(),
            args: d.args.iter().map(|a| freshen(a, factory, renaming)).collect(),
        }),
    }
}

/// The set of implicit conversions known to a resolution session, indexed
/// for the two queries pass 2 needs: "what can I cast this value to" and
/// "what can produce this required type".
#[derive(Clone, Debug, Default)]
pub struct ConverterRegistry {
    by_source_head: FxHashMap<Arc<str>, Vec<Arc<ImplicitConverter>>>,
    by_target_head: FxHashMap<Arc<str>, Vec<Arc<ImplicitConverter>>>,
    global: Vec<Arc<ImplicitConverter>>,
}

impl ConverterRegistry {
    pub fn new() -> ConverterRegistry {
        ConverterRegistry::default()
    }

    /// A convenience constructor for the common case of atomic-to-atomic
    /// conversions declared as plain head pairs, with no shared generics.
    pub fn from_head_pairs<I>(pairs: I) -> ConverterRegistry
    where
        I: IntoIterator<Item = (&'static str, &'static str)>,
    {
        let mut registry = ConverterRegistry::new();
        for (source, target) in pairs {
            registry.register(ImplicitConverter::new(
                TypeTerm::atom(source),
                TypeTerm::atom(target),
            ));
        }
        registry
    }

    pub fn register(&mut self, conv: ImplicitConverter) {
        let conv = Arc::new(conv);
        match conv.source_head() {
            Some(head) => self
                .by_source_head
                .entry(head.clone())
                .or_default()
                .push(conv.clone()),
            None => self.global.push(conv.clone()),
        }
        let target_head = conv
            .target_head()
            .expect("an implicit conversion's target must be head-known");
        self.by_target_head
            .entry(target_head.clone())
            .or_default()
            .push(conv);
    }

    /// Converters whose source side could plausibly produce `term`: every
    /// generic (non-head-known-source) converter, plus any indexed under
    /// `term`'s head.
    pub fn casts_from(&self, term: &TypeTerm) -> Vec<Arc<ImplicitConverter>> {
        let mut result = self.global.clone();
        if let Some(head) = term.known_head() {
            if let Some(bucket) = self.by_source_head.get(head) {
                result.extend(bucket.iter().cloned());
            }
        }
        result
    }

    /// Converters whose target side is exactly `term`'s head.
    pub fn sources_of(&self, term: &TypeTerm) -> Vec<Arc<ImplicitConverter>> {
        match term.known_head() {
            Some(head) => self.by_target_head.get(head).cloned().unwrap_or_default(),
            None => Vec::new(),
        }
    }
}
