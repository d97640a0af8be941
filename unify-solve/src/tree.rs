//! The expression-tree node protocol: pass 1 enumerates what a subtree
//! could possibly produce, pass 2 resolves it against a required type
//! top-down, pass 3 commits the final substitution back into every node.
//! The protocol is a trait so a client can model its own AST nodes;
//! `AtomicNode` and `MethodNode` are a ready-to-use pair of implementors
//! covering leaf values and overloaded call sites respectively.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use itertools::Itertools;

use unify_ir::term::{Dummy, TypeTerm};
use unify_ir::Unifier;

use crate::cast::{CastPolicy, RealizedImplicitCast};
use crate::converters::{freshen_dummy, ConverterRegistry, ImplicitConverter};
use crate::engine::UnifyEngine;
use crate::error::{SolveError, SolveResult};

/// The node protocol: every node in an expression tree implements this so
/// the engine can drive the three passes without knowing the tree's
/// concrete shape.
pub trait TreeNode: fmt::Debug {
    /// Enumerates the types this subtree could possibly produce, given the
    /// substitution accumulated so far. Never commits a selection; used
    /// only to discover candidates for the parent's overload search.
    fn possible_unifiers(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        sigma: &Unifier,
        force_implicits: bool,
    ) -> SolveResult<Vec<(TypeTerm, Unifier)>>;

    /// Resolves this subtree against a required type, committing to a
    /// single selection (and, transitively, to a selection in every
    /// descendant). `override_cast`, when set, is the one converter this
    /// node's own value must pass through before matching `required`.
    /// `casts_allowed` gates whether this node may introduce an implicit
    /// conversion of its own; `allow_child_casts` is threaded down to this
    /// node's own children unchanged.
    fn resolve_unifiers(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        required: &TypeTerm,
        sigma: &Unifier,
        override_cast: Option<&ImplicitConverter>,
        casts_allowed: bool,
        allow_child_casts: bool,
    ) -> SolveResult<(TypeTerm, Unifier)>;

    /// Re-applies the final substitution to whatever this node (and its
    /// descendants) committed to during pass 2.
    fn finalize_unifiers(&self, sigma: &Unifier);

    /// The type this node settled on, once `resolve_unifiers` has run.
    fn selected_type(&self) -> Option<TypeTerm>;

    /// The implicit conversion applied to this node's own value, if any.
    fn implicit_cast(&self) -> Option<RealizedImplicitCast>;
}

/// A leaf node: a fixed, non-empty set of candidate types (for example, a
/// numeric literal restricted to `{int, float, double}`, or a variable
/// reference with exactly one type).
pub struct AtomicNode {
    candidates: Vec<TypeTerm>,
    interchangeable: bool,
    will_select: Box<dyn Fn(&TypeTerm, Option<&RealizedImplicitCast>) -> SolveResult<()>>,
    state: RefCell<AtomicState>,
}

#[derive(Default)]
struct AtomicState {
    selected: Option<TypeTerm>,
    cast: Option<RealizedImplicitCast>,
}

impl fmt::Debug for AtomicNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicNode")
            .field("candidates", &self.candidates)
            .field("selected", &self.state.borrow().selected)
            .finish()
    }
}

impl AtomicNode {
    pub fn new(candidates: Vec<TypeTerm>) -> AtomicNode {
        assert!(
            !candidates.is_empty(),
            "an atomic node needs at least one candidate type"
        );
        AtomicNode {
            candidates,
            interchangeable: false,
            will_select: Box::new(|_, _| Ok(())),
            state: RefCell::new(AtomicState::default()),
        }
    }

    /// Marks this node's candidates as interchangeable: if more than one
    /// unifies directly with the required type, the first is picked rather
    /// than treated as ambiguous.
    pub fn interchangeable(mut self) -> AtomicNode {
        self.interchangeable = true;
        self
    }

    pub fn with_will_select(
        mut self,
        f: impl Fn(&TypeTerm, Option<&RealizedImplicitCast>) -> SolveResult<()> + 'static,
    ) -> AtomicNode {
        self.will_select = Box::new(f);
        self
    }

    fn finalize_selection(
        &self,
        t: TypeTerm,
        cast: Option<RealizedImplicitCast>,
        sigma: Unifier,
    ) -> SolveResult<(TypeTerm, Unifier)> {
        (self.will_select)(&t, cast.as_ref())?;
        let mut state = self.state.borrow_mut();
        state.selected = Some(t.clone());
        state.cast = cast;
        Ok((t, sigma))
    }
}

impl TreeNode for AtomicNode {
    fn possible_unifiers(
        &self,
        _engine: &UnifyEngine<'_>,
        _registry: &ConverterRegistry,
        sigma: &Unifier,
        _force_implicits: bool,
    ) -> SolveResult<Vec<(TypeTerm, Unifier)>> {
        Ok(self
            .candidates
            .iter()
            .map(|c| (sigma.simplify(c), sigma.clone()))
            .collect())
    }

    fn resolve_unifiers(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        required: &TypeTerm,
        sigma: &Unifier,
        override_cast: Option<&ImplicitConverter>,
        casts_allowed: bool,
        _allow_child_casts: bool,
    ) -> SolveResult<(TypeTerm, Unifier)> {
        if let Some(conv) = override_cast {
            for t in &self.candidates {
                let fresh = conv.fresh_instance(engine.factory());
                if let Ok(sigma1) = engine.unify(fresh.source(), t, sigma) {
                    if let Ok(sigma2) = engine.unify(fresh.target(), required, &sigma1) {
                        let realized = RealizedImplicitCast::new(fresh, &sigma2);
                        return self.finalize_selection(t.clone(), Some(realized), sigma2);
                    }
                }
            }
            return Err(SolveError::NoResolvableOverload {
                required: required.clone(),
                errors: Vec::new(),
            });
        }

        let mut direct: Vec<(TypeTerm, Unifier)> = Vec::new();
        for t in &self.candidates {
            if let Ok(sigma1) = engine.unify(t, required, sigma) {
                direct.push((t.clone(), sigma1));
            }
        }
        if !direct.is_empty() {
            if direct.len() > 1 && !self.interchangeable {
                return Err(SolveError::MultipleOverloads);
            }
            let (t, sigma1) = direct.into_iter().next().expect("checked non-empty above");
            return self.finalize_selection(t, None, sigma1);
        }

        if !casts_allowed || !engine.options().allow_implicit_casts_on_retry {
            return Err(SolveError::NoResolvableOverload {
                required: required.clone(),
                errors: Vec::new(),
            });
        }

        let mut implicit: Vec<(TypeTerm, RealizedImplicitCast, Unifier)> = Vec::new();
        for conv in registry.sources_of(required) {
            for t in &self.candidates {
                let fresh = conv.fresh_instance(engine.factory());
                if let Ok(sigma1) = engine.unify(fresh.source(), t, sigma) {
                    if let Ok(sigma2) = engine.unify(fresh.target(), required, &sigma1) {
                        implicit.push((t.clone(), RealizedImplicitCast::new(fresh, &sigma2), sigma2));
                    }
                }
            }
        }
        if implicit.len() > 1 {
            return Err(SolveError::MultipleImplicits);
        }
        match implicit.into_iter().next() {
            Some((t, cast, sigma1)) => self.finalize_selection(t, Some(cast), sigma1),
            None => Err(SolveError::NoResolvableOverload {
                required: required.clone(),
                errors: Vec::new(),
            }),
        }
    }

    fn finalize_unifiers(&self, sigma: &Unifier) {
        let mut state = self.state.borrow_mut();
        if let Some(t) = state.selected.take() {
            state.selected = Some(sigma.simplify(&t));
        }
        if let Some(cast) = state.cast.take() {
            state.cast = Some(cast.resimplify(sigma));
        }
    }

    fn selected_type(&self) -> Option<TypeTerm> {
        self.state.borrow().selected.clone()
    }

    fn implicit_cast(&self) -> Option<RealizedImplicitCast> {
        self.state.borrow().cast.clone()
    }
}

/// An overloaded call site: a set of candidate signatures (`Dummy("method",
/// [params.., ret])`), each tried against the node's arguments.
pub struct MethodNode {
    overloads: RefCell<Vec<Dummy>>,
    generate_overloads: Option<Box<dyn Fn(&[Vec<(TypeTerm, Unifier)>]) -> Vec<Dummy>>>,
    args: Vec<Rc<dyn TreeNode>>,
    cast_policy: Box<dyn Fn(usize, usize) -> CastPolicy>,
    interchangeable: bool,
    will_select: Box<dyn Fn(&Dummy, Option<&RealizedImplicitCast>, &Unifier) -> SolveResult<()>>,
    state: RefCell<MethodState>,
}

#[derive(Default)]
struct MethodState {
    realizable_overloads: Vec<usize>,
    selected_overload: Option<(usize, TypeTerm)>,
    implicit_cast: Option<RealizedImplicitCast>,
}

impl fmt::Debug for MethodNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodNode")
            .field("overloads", &self.overloads.borrow())
            .field("args", &self.args)
            .field("selected_overload", &self.state.borrow().selected_overload)
            .finish()
    }
}

impl MethodNode {
    pub fn new(overloads: Vec<Dummy>, args: Vec<Rc<dyn TreeNode>>) -> MethodNode {
        MethodNode {
            overloads: RefCell::new(overloads),
            generate_overloads: None,
            args,
            cast_policy: Box::new(|_, _| CastPolicy::AnyCastAllowed),
            interchangeable: false,
            will_select: Box::new(|_, _, _| Ok(())),
            state: RefCell::new(MethodState::default()),
        }
    }

    pub fn interchangeable(mut self) -> MethodNode {
        self.interchangeable = true;
        self
    }

    pub fn with_cast_policy(
        mut self,
        f: impl Fn(usize, usize) -> CastPolicy + 'static,
    ) -> MethodNode {
        self.cast_policy = Box::new(f);
        self
    }

    pub fn with_will_select(
        mut self,
        f: impl Fn(&Dummy, Option<&RealizedImplicitCast>, &Unifier) -> SolveResult<()> + 'static,
    ) -> MethodNode {
        self.will_select = Box::new(f);
        self
    }

    /// Lets a member-access-style node (whose overload set depends on the
    /// argument types actually observed, e.g. indexing into a container)
    /// compute its overloads from pass 1's per-argument candidate sets
    /// instead of declaring a fixed list up front.
    pub fn with_dynamic_overloads(
        mut self,
        f: impl Fn(&[Vec<(TypeTerm, Unifier)>]) -> Vec<Dummy> + 'static,
    ) -> MethodNode {
        self.generate_overloads = Some(Box::new(f));
        self
    }

    /// Whether at least one argument position of `overload_idx` admits an
    /// implicit cast, i.e. this overload is worth a second look once the
    /// direct pass has failed every candidate outright.
    fn has_castable_arg(&self, overload_idx: usize, arity: usize) -> bool {
        (0..arity).any(|i| !matches!((self.cast_policy)(overload_idx, i), CastPolicy::NoCastAllowed))
    }

    /// Pass 1's per-overload exploration (§4.4 step 4, plus step 5's
    /// implicit-cast fallback when `allow_implicit` is set): for every
    /// combination drawn from `argset`, tries each parameter position in
    /// turn -- a required cast first if the policy demands one, then a
    /// direct match, and (when `allow_implicit`) any registry conversion
    /// whose source or target head lines up -- and records the overload's
    /// return type for every combination that goes the distance.
    ///
    /// Optimistic by design: each combination's substitution is private to
    /// that combination and never required to agree with a sibling's: pass 2
    /// is what re-verifies global consistency.
    fn try_overload_pass1(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        overload_idx: usize,
        overload: &Dummy,
        argset: &[Vec<(TypeTerm, Unifier)>],
        sigma: &Unifier,
        allow_implicit: bool,
    ) -> Vec<(TypeTerm, Unifier)> {
        if overload.params().len() != argset.len() {
            return Vec::new();
        }
        let combos: Vec<Vec<&(TypeTerm, Unifier)>> = if argset.is_empty() {
            vec![Vec::new()]
        } else {
            argset.iter().map(|c| c.iter()).multi_cartesian_product().collect()
        };

        let mut returns = Vec::new();
        for combo in combos {
            let fresh = freshen_dummy(overload, engine.factory());
            let mut cur = sigma.clone();
            let mut ok = true;
            for (i, param) in fresh.params().iter().enumerate() {
                let (candidate, _) = combo[i];
                let policy = (self.cast_policy)(overload_idx, i);
                let mut matched = false;

                if let CastPolicy::RequiredCast(conv) = &policy {
                    let fresh_conv = conv.fresh_instance(engine.factory());
                    if let Ok(cur1) = engine.unify(fresh_conv.source(), candidate, &cur) {
                        if let Ok(cur2) = engine.unify(fresh_conv.target(), param, &cur1) {
                            cur = cur2;
                            matched = true;
                        }
                    }
                }
                if !matched {
                    if let Ok(next) = engine.unify(param, candidate, &cur) {
                        cur = next;
                        matched = true;
                    }
                }
                if !matched && allow_implicit && !matches!(policy, CastPolicy::NoCastAllowed) {
                    let convs = if param.known_head().is_some() {
                        registry.sources_of(param)
                    } else {
                        registry.casts_from(candidate)
                    };
                    for conv in convs {
                        let fresh_conv = conv.fresh_instance(engine.factory());
                        if let Ok(cur1) = engine.unify(fresh_conv.source(), candidate, &cur) {
                            if let Ok(cur2) = engine.unify(fresh_conv.target(), param, &cur1) {
                                cur = cur2;
                                matched = true;
                                break;
                            }
                        }
                    }
                }

                if !matched {
                    ok = false;
                    break;
                }
            }
            if ok {
                returns.push((cur.simplify(fresh.return_term()), cur.clone()));
                if self.interchangeable {
                    break;
                }
            }
        }
        returns
    }

    /// One full sweep of §4.4 steps 1-5 under a given `force_implicits`:
    /// recurses into every argument, regenerates dynamic overloads, runs the
    /// direct pass over every overload, then -- only if nothing matched
    /// directly -- the implicit-cast pass over overloads with at least one
    /// castable argument position. Returns the pooled return types, the
    /// indices that proved realizable, and the argument candidate sets (the
    /// latter purely so a caller that ends up empty-handed can report them).
    fn possible_unifiers_pass(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        sigma: &Unifier,
        force_implicits: bool,
    ) -> SolveResult<(Vec<(TypeTerm, Unifier)>, Vec<usize>, Vec<Vec<(TypeTerm, Unifier)>>)> {
        let mut argset: Vec<Vec<(TypeTerm, Unifier)>> = Vec::with_capacity(self.args.len());
        let mut carried = sigma.clone();
        for arg in &self.args {
            let candidates = arg.possible_unifiers(engine, registry, &carried, force_implicits)?;
            if candidates.len() == 1 {
                carried = candidates[0].1.clone();
            }
            argset.push(candidates);
        }

        if let Some(generate) = &self.generate_overloads {
            *self.overloads.borrow_mut() = generate(&argset);
        }
        let overloads = self.overloads.borrow().clone();

        let mut returns = Vec::new();
        let mut realizable = Vec::new();
        for (idx, overload) in overloads.iter().enumerate() {
            let found = self.try_overload_pass1(engine, registry, idx, overload, &argset, sigma, false);
            if !found.is_empty() {
                realizable.push(idx);
                returns.extend(found);
            }
        }

        if returns.is_empty() {
            for (idx, overload) in overloads.iter().enumerate() {
                if overload.params().len() != argset.len() {
                    continue;
                }
                if !self.has_castable_arg(idx, overload.params().len()) {
                    continue;
                }
                let found = self.try_overload_pass1(engine, registry, idx, overload, &argset, sigma, true);
                if !found.is_empty() {
                    realizable.push(idx);
                    returns.extend(found);
                }
            }
        }

        Ok((returns, realizable, argset))
    }

    fn finalize_selection(
        &self,
        idx: usize,
        ret: TypeTerm,
        cast: Option<RealizedImplicitCast>,
        sigma: Unifier,
    ) -> SolveResult<(TypeTerm, Unifier)> {
        let overload = self.overloads.borrow()[idx].clone();
        (self.will_select)(&overload, cast.as_ref(), &sigma)?;
        let simplified = sigma.simplify(&ret);
        let mut state = self.state.borrow_mut();
        state.selected_overload = Some((idx, simplified.clone()));
        state.implicit_cast = cast;
        Ok((simplified, sigma))
    }

    fn candidate_indices(&self) -> Vec<usize> {
        let realizable = self.state.borrow().realizable_overloads.clone();
        if realizable.is_empty() {
            (0..self.overloads.borrow().len()).collect()
        } else {
            realizable
        }
    }

    /// Bidirectional argument resolution (§4.5's `try_finalize`): walks
    /// `(lo, hi)` inward from both ends, normally left-to-right. A child's
    /// `MultipleOverloads`/`MultipleImplicits` flips the direction once --
    /// the other end may pin down a shared generic that breaks the tie --
    /// and a second such failure at the same position is no longer treated
    /// as bounce-worthy and propagates. Any other error propagates
    /// immediately. Returns the threaded substitution plus each argument's
    /// own effective (already-selected) type, in position order.
    fn resolve_args_bidirectional(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        overload_idx: usize,
        fresh: &Dummy,
        mut cur: Unifier,
        allow_child_casts: bool,
    ) -> SolveResult<(Unifier, Vec<TypeTerm>)> {
        let arity = self.args.len();
        if arity == 0 {
            return Ok((cur, Vec::new()));
        }
        let mut effective: Vec<Option<TypeTerm>> = vec![None; arity];
        let mut lo = 0usize;
        let mut hi = arity - 1;
        let mut forward = true;
        let mut failed_latch = false;

        loop {
            let i = if forward { lo } else { hi };
            let arg = &self.args[i];
            let param = cur.simplify(&fresh.params()[i]);
            let policy = (self.cast_policy)(overload_idx, i);
            let (arg_override, arg_casts_allowed) = match &policy {
                CastPolicy::RequiredCast(c) => (Some(c.as_ref()), false),
                CastPolicy::AnyCastAllowed => (None, true),
                CastPolicy::NoCastAllowed => (None, false),
            };
            match arg.resolve_unifiers(
                engine,
                registry,
                &param,
                &cur,
                arg_override,
                arg_casts_allowed,
                allow_child_casts,
            ) {
                Ok((t, next)) => {
                    cur = next;
                    effective[i] = Some(t);
                    failed_latch = false;
                    if lo == hi {
                        break;
                    }
                    if forward {
                        lo += 1;
                    } else {
                        hi -= 1;
                    }
                }
                Err(e) => {
                    if matches!(e, SolveError::MultipleOverloads | SolveError::MultipleImplicits) {
                        if failed_latch {
                            return Err(e);
                        }
                        failed_latch = true;
                        forward = !forward;
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        let resolved = effective
            .into_iter()
            .map(|t| t.expect("the bidirectional scan visits every argument position exactly once"))
            .collect();
        Ok((cur, resolved))
    }

    /// Runs `will_select` and the bidirectional argument scan. Each
    /// argument's own `resolve_unifiers` call already unifies against this
    /// overload's (possibly still generic) parameter type -- directly when
    /// no cast is needed, or through a converter's source/target when one
    /// is -- so by the time every position has been visited, `cur` already
    /// carries every binding a shared generic between two parameters, or
    /// between a parameter and the return type, requires. There is nothing
    /// left to "tie together": a final re-unification of the argument's own
    /// effective types against the overload's literal parameter list would
    /// wrongly assume the two are equal, which is exactly false whenever an
    /// argument reaches its parameter through an implicit cast.
    fn try_finalize_one(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        idx: usize,
        fresh: &Dummy,
        cur0: Unifier,
        cast: Option<&RealizedImplicitCast>,
        allow_child_casts: bool,
    ) -> SolveResult<(TypeTerm, Unifier)> {
        let overload = self.overloads.borrow()[idx].clone();
        (self.will_select)(&overload, cast, &cur0)?;

        let (cur, _arg_types) =
            self.resolve_args_bidirectional(engine, registry, idx, fresh, cur0, allow_child_casts)?;
        let ret = cur.simplify(fresh.return_term());
        Ok((ret, cur))
    }

    /// §4.5 step 2 (direct match): return type unifies with `required`
    /// directly, no conversion.
    fn attempt_direct(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        required: &TypeTerm,
        sigma: &Unifier,
        allow_child_casts: bool,
    ) -> ModeOutcome {
        let overloads = self.overloads.borrow().clone();
        let indices = self.candidate_indices();
        let mut successes = Vec::new();
        let mut saw_nonambiguous_failure = false;
        let mut errors = Vec::new();

        for &idx in &indices {
            let overload = &overloads[idx];
            if overload.params().len() != self.args.len() {
                continue;
            }
            let fresh = freshen_dummy(overload, engine.factory());
            let cur0 = match engine.unify(fresh.return_term(), required, sigma) {
                Ok(c) => c,
                Err(_) => continue,
            };
            match self.try_finalize_one(engine, registry, idx, &fresh, cur0, None, allow_child_casts) {
                Ok((ret, cur)) => successes.push((idx, ret, cur)),
                Err(e) => {
                    if !matches!(e, SolveError::MultipleOverloads | SolveError::MultipleImplicits) {
                        saw_nonambiguous_failure = true;
                    }
                    errors.push(e);
                }
            }
        }

        match successes.len() {
            0 => ModeOutcome::Failed {
                retry_with_casts: saw_nonambiguous_failure,
                error: aggregate_error(required, errors),
            },
            1 => {
                let (idx, ret, cur) = successes.into_iter().next().expect("len == 1");
                ModeOutcome::Success(idx, ret, None, cur)
            }
            _ => ModeOutcome::Ambiguous(SolveError::MultipleOverloads),
        }
    }

    /// §4.5 step 1: the caller supplied the one converter this node's value
    /// must pass through; tried against every realizable overload's return.
    fn attempt_override(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        conv: &ImplicitConverter,
        required: &TypeTerm,
        sigma: &Unifier,
        allow_child_casts: bool,
    ) -> ModeOutcome {
        let overloads = self.overloads.borrow().clone();
        let indices = self.candidate_indices();
        let mut successes = Vec::new();
        let mut saw_nonambiguous_failure = false;
        let mut errors = Vec::new();

        for &idx in &indices {
            let overload = &overloads[idx];
            if overload.params().len() != self.args.len() {
                continue;
            }
            let fresh = freshen_dummy(overload, engine.factory());
            let fresh_conv = conv.fresh_instance(engine.factory());
            let cur0 = match engine
                .unify(fresh_conv.source(), fresh.return_term(), sigma)
                .and_then(|c1| engine.unify(fresh_conv.target(), required, &c1))
            {
                Ok(c) => c,
                Err(_) => continue,
            };
            let realized = RealizedImplicitCast::new(fresh_conv, &cur0);
            match self.try_finalize_one(engine, registry, idx, &fresh, cur0, Some(&realized), allow_child_casts) {
                Ok((ret, cur)) => successes.push((idx, ret, realized, cur)),
                Err(e) => {
                    if !matches!(e, SolveError::MultipleOverloads | SolveError::MultipleImplicits) {
                        saw_nonambiguous_failure = true;
                    }
                    errors.push(e);
                }
            }
        }

        match successes.len() {
            0 => ModeOutcome::Failed {
                retry_with_casts: saw_nonambiguous_failure,
                error: aggregate_error(required, errors),
            },
            1 => {
                let (idx, ret, cast, cur) = successes.into_iter().next().expect("len == 1");
                ModeOutcome::Success(idx, ret, Some(cast), cur)
            }
            _ => ModeOutcome::Ambiguous(SolveError::MultipleImplicits),
        }
    }

    /// §4.5 step 3: no direct match: for each realizable overload, pull
    /// conversions targeting `required` first, falling back to conversions
    /// sourced from the overload's own (possibly still generic) return.
    fn attempt_implicit(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        required: &TypeTerm,
        sigma: &Unifier,
        allow_child_casts: bool,
    ) -> ModeOutcome {
        let overloads = self.overloads.borrow().clone();
        let indices = self.candidate_indices();
        let mut successes = Vec::new();
        let mut saw_nonambiguous_failure = false;
        let mut errors = Vec::new();

        for &idx in &indices {
            let overload = &overloads[idx];
            if overload.params().len() != self.args.len() {
                continue;
            }
            let fresh = freshen_dummy(overload, engine.factory());
            let mut convs = registry.sources_of(required);
            if convs.is_empty() {
                convs = registry.casts_from(fresh.return_term());
            }
            for conv in convs {
                let fresh_conv = conv.fresh_instance(engine.factory());
                let cur0 = match engine
                    .unify(fresh_conv.source(), fresh.return_term(), sigma)
                    .and_then(|c1| engine.unify(fresh_conv.target(), required, &c1))
                {
                    Ok(c) => c,
                    Err(_) => continue,
                };
                let realized = RealizedImplicitCast::new(fresh_conv, &cur0);
                match self.try_finalize_one(engine, registry, idx, &fresh, cur0, Some(&realized), allow_child_casts) {
                    Ok((ret, cur)) => successes.push((idx, ret, realized, cur)),
                    Err(e) => {
                        if !matches!(e, SolveError::MultipleOverloads | SolveError::MultipleImplicits) {
                            saw_nonambiguous_failure = true;
                        }
                        errors.push(e);
                    }
                }
            }
        }

        match successes.len() {
            0 => ModeOutcome::Failed {
                retry_with_casts: saw_nonambiguous_failure,
                error: aggregate_error(required, errors),
            },
            1 => {
                let (idx, ret, cast, cur) = successes.into_iter().next().expect("len == 1");
                ModeOutcome::Success(idx, ret, Some(cast), cur)
            }
            _ => ModeOutcome::Ambiguous(SolveError::MultipleImplicits),
        }
    }

    /// The two-attempt whole-pass strategy: run `attempt` with child casts
    /// disallowed; only if that left at least one overload failing at the
    /// finalize stage for a non-ambiguity reason, and the caller actually
    /// permits child casts here, run it again with them allowed.
    fn two_attempts(
        &self,
        allow_child_casts: bool,
        mut attempt: impl FnMut(bool) -> ModeOutcome,
    ) -> ModeOutcome {
        let first = attempt(false);
        match &first {
            ModeOutcome::Failed { retry_with_casts: true, .. } if allow_child_casts => attempt(true),
            _ => first,
        }
    }

    fn finish(&self, outcome: ModeOutcome) -> SolveResult<(TypeTerm, Unifier)> {
        match outcome {
            ModeOutcome::Success(idx, ret, cast, cur) => self.finalize_selection(idx, ret, cast, cur),
            ModeOutcome::Ambiguous(e) => Err(e),
            ModeOutcome::Failed { error, .. } => Err(error),
        }
    }
}

/// The outcome of trying one of §4.5's three return-matching strategies
/// (override / direct / implicit) across every realizable overload.
enum ModeOutcome {
    Success(usize, TypeTerm, Option<RealizedImplicitCast>, Unifier),
    Ambiguous(SolveError),
    Failed { retry_with_casts: bool, error: SolveError },
}

fn aggregate_error(required: &TypeTerm, mut errors: Vec<SolveError>) -> SolveError {
    if errors.len() == 1 {
        errors.pop().expect("len == 1")
    } else {
        SolveError::NoResolvableOverload {
            required: required.clone(),
            errors,
        }
    }
}

impl TreeNode for MethodNode {
    /// §4.4: direct pass, implicit-cast pass over whatever the direct pass
    /// left unrealized, and -- if both came up empty -- one re-run of both
    /// with `force_implicits` forced on, so a child that only exposes a
    /// candidate through its own implicit conversion gets a chance to show
    /// it. `NoPossibleOverload` carries the argument candidates observed on
    /// whichever of those attempts was the last one tried.
    #[tracing::instrument(level = "debug", skip(self, engine, registry, sigma))]
    fn possible_unifiers(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        sigma: &Unifier,
        force_implicits: bool,
    ) -> SolveResult<Vec<(TypeTerm, Unifier)>> {
        let (returns, realizable, argset) =
            self.possible_unifiers_pass(engine, registry, sigma, force_implicits)?;
        if !returns.is_empty() {
            self.state.borrow_mut().realizable_overloads = realizable;
            return Ok(returns);
        }

        let (returns, realizable, argset) = if !force_implicits {
            self.possible_unifiers_pass(engine, registry, sigma, true)?
        } else {
            (returns, realizable, argset)
        };
        if !returns.is_empty() {
            self.state.borrow_mut().realizable_overloads = realizable;
            return Ok(returns);
        }

        self.state.borrow_mut().realizable_overloads = Vec::new();
        Err(SolveError::NoPossibleOverload {
            overloads: self.overloads.borrow().clone(),
            argset: argset
                .iter()
                .map(|candidates| candidates.iter().map(|(t, _)| t.clone()).collect())
                .collect(),
        })
    }

    /// §4.5: caller-supplied converter, then direct match, then any
    /// implicit cast -- each wrapped in the two-attempt child-cast retry
    /// (§4.5's "first disallowing child casts, then re-running").
    #[tracing::instrument(level = "debug", skip(self, engine, registry, sigma, override_cast))]
    fn resolve_unifiers(
        &self,
        engine: &UnifyEngine<'_>,
        registry: &ConverterRegistry,
        required: &TypeTerm,
        sigma: &Unifier,
        override_cast: Option<&ImplicitConverter>,
        casts_allowed: bool,
        allow_child_casts: bool,
    ) -> SolveResult<(TypeTerm, Unifier)> {
        if let Some(conv) = override_cast {
            let outcome = self.two_attempts(allow_child_casts, |child_casts| {
                self.attempt_override(engine, registry, conv, required, sigma, child_casts)
            });
            return self.finish(outcome);
        }

        let direct_outcome = self.two_attempts(allow_child_casts, |child_casts| {
            self.attempt_direct(engine, registry, required, sigma, child_casts)
        });
        if matches!(direct_outcome, ModeOutcome::Success(..) | ModeOutcome::Ambiguous(_)) {
            return self.finish(direct_outcome);
        }
        if !(casts_allowed && engine.options().allow_implicit_casts_on_retry) {
            return self.finish(direct_outcome);
        }

        let implicit_outcome = self.two_attempts(allow_child_casts, |child_casts| {
            self.attempt_implicit(engine, registry, required, sigma, child_casts)
        });
        self.finish(implicit_outcome)
    }

    fn finalize_unifiers(&self, sigma: &Unifier) {
        for arg in &self.args {
            arg.finalize_unifiers(sigma);
        }
        let mut state = self.state.borrow_mut();
        if let Some((idx, ret)) = state.selected_overload.take() {
            state.selected_overload = Some((idx, sigma.simplify(&ret)));
        }
        if let Some(cast) = state.implicit_cast.take() {
            state.implicit_cast = Some(cast.resimplify(sigma));
        }
    }

    fn selected_type(&self) -> Option<TypeTerm> {
        self.state
            .borrow()
            .selected_overload
            .clone()
            .map(|(_, t)| t)
    }

    fn implicit_cast(&self) -> Option<RealizedImplicitCast> {
        self.state.borrow().implicit_cast.clone()
    }
}

/// Drives all three passes from a tree's root, the way a client is expected
/// to (§2): pass 1 enumerates what the whole tree could produce, the result
/// is deduplicated into the set of distinct top-level types, and that set
/// is expected to hold exactly one element -- `TooManyPossibleTypes` if it
/// holds more. Pass 2 then commits the tree to that type and pass 3 applies
/// the final substitution everywhere.
pub fn resolve_root(
    root: &dyn TreeNode,
    engine: &UnifyEngine<'_>,
    registry: &ConverterRegistry,
    sigma: &Unifier,
) -> SolveResult<(TypeTerm, Unifier)> {
    let candidates = root.possible_unifiers(engine, registry, sigma, false)?;
    let mut distinct: Vec<TypeTerm> = Vec::new();
    for (t, s) in &candidates {
        let simplified = s.simplify(t);
        if !distinct.contains(&simplified) {
            distinct.push(simplified);
        }
    }
    if distinct.len() > 1 {
        return Err(SolveError::TooManyPossibleTypes { count: distinct.len() });
    }
    let required = distinct
        .into_iter()
        .next()
        .expect("possible_unifiers returns Err rather than an empty candidate list");

    let (top, final_sigma) = root.resolve_unifiers(engine, registry, &required, sigma, None, true, true)?;
    root.finalize_unifiers(&final_sigma);
    Ok((top, final_sigma))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ResolveOptions;
    use unify_ir::term::VarFactory;

    fn engine_parts() -> (VarFactory, ResolveOptions) {
        (VarFactory::new(), ResolveOptions::default())
    }

    #[test]
    fn atomic_node_resolves_direct_match() {
        let (factory, options) = engine_parts();
        let engine = UnifyEngine::new(&factory, &options);
        let registry = ConverterRegistry::new();
        let node = AtomicNode::new(vec![TypeTerm::atom("int"), TypeTerm::atom("string")]);
        let (t, _) = node
            .resolve_unifiers(
                &engine,
                &registry,
                &TypeTerm::atom("int"),
                &Unifier::new(),
                None,
                true,
                true,
            )
            .unwrap();
        assert_eq!(t, TypeTerm::atom("int"));
        assert_eq!(node.selected_type(), Some(TypeTerm::atom("int")));
    }

    #[test]
    fn atomic_node_uses_implicit_cast_when_no_direct_match() {
        let (factory, options) = engine_parts();
        let engine = UnifyEngine::new(&factory, &options);
        let mut registry = ConverterRegistry::new();
        registry.register(ImplicitConverter::new(
            TypeTerm::atom("int"),
            TypeTerm::atom("float"),
        ));
        let node = AtomicNode::new(vec![TypeTerm::atom("int")]);
        let (t, _) = node
            .resolve_unifiers(
                &engine,
                &registry,
                &TypeTerm::atom("float"),
                &Unifier::new(),
                None,
                true,
                true,
            )
            .unwrap();
        assert_eq!(t, TypeTerm::atom("int"));
        assert!(node.implicit_cast().is_some());
        assert_eq!(node.implicit_cast().unwrap().target, TypeTerm::atom("float"));
    }

    #[test]
    fn atomic_node_rejects_cast_when_not_allowed() {
        let (factory, options) = engine_parts();
        let engine = UnifyEngine::new(&factory, &options);
        let mut registry = ConverterRegistry::new();
        registry.register(ImplicitConverter::new(
            TypeTerm::atom("int"),
            TypeTerm::atom("float"),
        ));
        let node = AtomicNode::new(vec![TypeTerm::atom("int")]);
        let err = node
            .resolve_unifiers(
                &engine,
                &registry,
                &TypeTerm::atom("float"),
                &Unifier::new(),
                None,
                false,
                true,
            )
            .unwrap_err();
        assert!(matches!(err, SolveError::NoResolvableOverload { .. }));
    }

    #[test]
    fn method_node_selects_matching_overload() {
        let (factory, options) = engine_parts();
        let engine = UnifyEngine::new(&factory, &options);
        let registry = ConverterRegistry::new();
        let arg: Rc<dyn TreeNode> = Rc::new(AtomicNode::new(vec![TypeTerm::atom("int")]));
        let overloads = vec![
            TypeTerm::method(vec![TypeTerm::atom("int")], TypeTerm::atom("int"))
                .as_dummy()
                .unwrap()
                .clone(),
            TypeTerm::method(vec![TypeTerm::atom("string")], TypeTerm::atom("string"))
                .as_dummy()
                .unwrap()
                .clone(),
        ];
        let node = MethodNode::new(overloads, vec![arg]);
        let _ = node
            .possible_unifiers(&engine, &registry, &Unifier::new(), false)
            .unwrap();
        let (ret, _) = node
            .resolve_unifiers(
                &engine,
                &registry,
                &TypeTerm::atom("int"),
                &Unifier::new(),
                None,
                true,
                true,
            )
            .unwrap();
        assert_eq!(ret, TypeTerm::atom("int"));
    }

    #[test]
    fn method_node_reports_ambiguity_between_non_interchangeable_overloads() {
        let (factory, options) = engine_parts();
        let engine = UnifyEngine::new(&factory, &options);
        let registry = ConverterRegistry::new();
        let arg: Rc<dyn TreeNode> = Rc::new(AtomicNode::new(vec![TypeTerm::atom("int")]));
        let var = factory.fresh();
        let overloads = vec![
            TypeTerm::method(vec![TypeTerm::Var(var.clone())], TypeTerm::atom("int"))
                .as_dummy()
                .unwrap()
                .clone(),
            TypeTerm::method(vec![TypeTerm::atom("int")], TypeTerm::atom("int"))
                .as_dummy()
                .unwrap()
                .clone(),
        ];
        let node = MethodNode::new(overloads, vec![arg]);
        let err = node
            .resolve_unifiers(
                &engine,
                &registry,
                &TypeTerm::atom("int"),
                &Unifier::new(),
                None,
                true,
                true,
            )
            .unwrap_err();
        assert!(matches!(err, SolveError::MultipleOverloads));
    }

    #[test]
    fn resolve_root_rejects_more_than_one_distinct_top_level_type() {
        let (factory, options) = engine_parts();
        let engine = UnifyEngine::new(&factory, &options);
        let registry = ConverterRegistry::new();
        let node: Rc<dyn TreeNode> =
            Rc::new(AtomicNode::new(vec![TypeTerm::atom("int"), TypeTerm::atom("string")]));
        let err = resolve_root(node.as_ref(), &engine, &registry, &Unifier::new()).unwrap_err();
        assert!(matches!(err, SolveError::TooManyPossibleTypes { count: 2 }));
    }

    #[test]
    fn resolve_root_commits_the_unique_candidate() {
        let (factory, options) = engine_parts();
        let engine = UnifyEngine::new(&factory, &options);
        let registry = ConverterRegistry::new();
        let node: Rc<dyn TreeNode> = Rc::new(AtomicNode::new(vec![TypeTerm::atom("int")]));
        let (top, _) = resolve_root(node.as_ref(), &engine, &registry, &Unifier::new()).unwrap();
        assert_eq!(top, TypeTerm::atom("int"));
        assert_eq!(node.selected_type(), Some(TypeTerm::atom("int")));
    }
}
