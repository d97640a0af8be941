//! Integration tests mirroring the concrete resolution scenarios the
//! engine is expected to handle end to end: a generic implicit conversion
//! discovered on a nested node, restricted-variable intersection across
//! sibling arguments, overload disambiguation, implicit-cast ambiguity,
//! downstream inference through a generic parameter, and the occurs check.

use std::rc::Rc;

use unify_ir::term::Known;
use unify_solve::{
    AtomicNode, ConverterRegistry, ImplicitConverter, MethodNode, ResolveOptions, TreeNode,
    TypeTerm, UnifyEngine, UnifyError, VarFactory, ARRAY_HEAD,
};

fn func(int_arg: TypeTerm, elem: TypeTerm) -> TypeTerm {
    TypeTerm::known("Func", vec![int_arg, TypeTerm::known(ARRAY_HEAD, vec![elem])])
}

fn list(elem: TypeTerm) -> TypeTerm {
    TypeTerm::known("List", vec![elem])
}

/// Makes `RUST_LOG=debug cargo test -- --nocapture` show the `#[instrument]`
/// spans from `unify-ir`/`unify-solve`. Safe to call from every test: the
/// global subscriber is only ever installed once.
fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

#[test]
fn generic_resolution_upward_through_a_nested_implicit_conversion() {
    init_tracing();
    let factory = VarFactory::new();
    let options = ResolveOptions::default();
    let engine = UnifyEngine::new(&factory, &options);

    // ExFunc: A -> Func<int, A[]>
    let a = factory.fresh();
    let exfunc_overload = TypeTerm::method(
        vec![TypeTerm::Var(a.clone())],
        func(TypeTerm::atom("int"), TypeTerm::Var(a)),
    )
    .as_dummy()
    .unwrap()
    .clone();
    let literal_float: Rc<dyn TreeNode> = Rc::new(AtomicNode::new(vec![TypeTerm::atom("float")]));
    let exfunc_node: Rc<MethodNode> =
        Rc::new(MethodNode::new(vec![exfunc_overload], vec![literal_float]));
    let exfunc_node_dyn: Rc<dyn TreeNode> = exfunc_node.clone();

    // First: List<T> -> T
    let t = factory.fresh();
    let first_overload = TypeTerm::method(vec![list(TypeTerm::Var(t.clone()))], TypeTerm::Var(t))
        .as_dummy()
        .unwrap()
        .clone();
    let first_node = MethodNode::new(vec![first_overload], vec![exfunc_node_dyn]);

    // Func<int, T[]> -> List<T>
    let u = factory.fresh();
    let mut registry = ConverterRegistry::new();
    registry.register(ImplicitConverter::new(
        func(TypeTerm::atom("int"), TypeTerm::Var(u.clone())),
        list(TypeTerm::Var(u)),
    ));

    let sigma = unify_ir::Unifier::new();
    let possible = first_node
        .possible_unifiers(&engine, &registry, &sigma, false)
        .unwrap();
    assert_eq!(
        possible.len(),
        1,
        "pass 1's implicit-cast fallback should find List<..> as a possible return once the \
         direct pass over List<T> -> T comes up empty against Func<int, float[]>"
    );
    assert_eq!(possible[0].0, TypeTerm::atom("float"));

    let (top, final_sigma) = first_node
        .resolve_unifiers(
            &engine,
            &registry,
            &TypeTerm::atom("float"),
            &sigma,
            None,
            true,
            true,
        )
        .unwrap();
    assert_eq!(top, TypeTerm::atom("float"));
    first_node.finalize_unifiers(&final_sigma);
    assert!(exfunc_node.implicit_cast().is_some());
    assert_eq!(
        exfunc_node.implicit_cast().unwrap().target,
        list(TypeTerm::atom("float"))
    );
}

#[test]
fn restricted_variable_intersection_across_sibling_arguments() {
    let factory = VarFactory::new();
    let options = ResolveOptions::default();
    let engine = UnifyEngine::new(&factory, &options);
    let registry = ConverterRegistry::new();

    let known = |h: &str| Known {
        head: h.into(),
        args: vec![],
    };

    let lhs_var = factory.fresh_restricted(vec![known("float"), known("double")]);
    let rhs_var = factory.fresh_restricted(vec![known("string"), known("double")]);
    let lhs: Rc<dyn TreeNode> = Rc::new(AtomicNode::new(vec![TypeTerm::Var(lhs_var)]));
    let rhs: Rc<dyn TreeNode> = Rc::new(AtomicNode::new(vec![TypeTerm::Var(rhs_var)]));

    let t = factory.fresh();
    let add_overload = TypeTerm::method(
        vec![TypeTerm::Var(t.clone()), TypeTerm::Var(t.clone())],
        TypeTerm::Var(t),
    )
    .as_dummy()
    .unwrap()
    .clone();
    let add_node = MethodNode::new(vec![add_overload], vec![lhs.clone(), rhs.clone()]);

    let open = factory.fresh();
    let (top, final_sigma) = add_node
        .resolve_unifiers(
            &engine,
            &registry,
            &TypeTerm::Var(open),
            &unify_ir::Unifier::new(),
            None,
            true,
            true,
        )
        .unwrap();
    add_node.finalize_unifiers(&final_sigma);

    assert_eq!(final_sigma.simplify(&top), TypeTerm::atom("double"));
    assert_eq!(lhs.selected_type().map(|t| final_sigma.simplify(&t)), Some(TypeTerm::atom("double")));
    assert_eq!(rhs.selected_type().map(|t| final_sigma.simplify(&t)), Some(TypeTerm::atom("double")));
}

#[test]
fn overload_disambiguation_by_return_type() {
    let factory = VarFactory::new();
    let options = ResolveOptions::default();
    let engine = UnifyEngine::new(&factory, &options);
    let registry = ConverterRegistry::new();

    let unknown = factory.fresh();
    let lhs: Rc<dyn TreeNode> = Rc::new(AtomicNode::new(vec![TypeTerm::atom("int")]));
    let rhs: Rc<dyn TreeNode> = Rc::new(AtomicNode::new(vec![TypeTerm::Var(unknown)]));

    let overload_a = TypeTerm::method(
        vec![TypeTerm::atom("int"), TypeTerm::atom("string")],
        TypeTerm::atom("string"),
    )
    .as_dummy()
    .unwrap()
    .clone();
    let overload_b = TypeTerm::method(
        vec![TypeTerm::atom("int"), TypeTerm::atom("float")],
        TypeTerm::atom("int"),
    )
    .as_dummy()
    .unwrap()
    .clone();
    let add_node = MethodNode::new(vec![overload_a, overload_b], vec![lhs, rhs.clone()]);

    let (top, final_sigma) = add_node
        .resolve_unifiers(
            &engine,
            &registry,
            &TypeTerm::atom("int"),
            &unify_ir::Unifier::new(),
            None,
            true,
            true,
        )
        .unwrap();
    assert_eq!(top, TypeTerm::atom("int"));
    assert_eq!(rhs.selected_type().map(|t| final_sigma.simplify(&t)), Some(TypeTerm::atom("float")));
}

#[test]
fn ambiguous_implicit_conversions_are_reported() {
    let factory = VarFactory::new();
    let options = ResolveOptions::default();
    let engine = UnifyEngine::new(&factory, &options);
    let mut registry = ConverterRegistry::new();
    // Two independently-registered routes from `int` to `float`: the
    // call site below cannot tell which one the caller meant.
    registry.register(ImplicitConverter::new(TypeTerm::atom("int"), TypeTerm::atom("float")));
    registry.register(ImplicitConverter::new(TypeTerm::atom("int"), TypeTerm::atom("float")));

    let node = AtomicNode::new(vec![TypeTerm::atom("int")]);
    let err = node
        .resolve_unifiers(
            &engine,
            &registry,
            &TypeTerm::atom("float"),
            &unify_ir::Unifier::new(),
            None,
            true,
            true,
        )
        .unwrap_err();
    assert!(matches!(err, unify_solve::SolveError::MultipleImplicits));
}

#[test]
fn downstream_inference_leaves_unconstrained_parameter_unbound() {
    let factory = VarFactory::new();
    let options = ResolveOptions::default();
    let engine = UnifyEngine::new(&factory, &options);
    let registry = ConverterRegistry::new();

    let unknown_a = factory.fresh();
    let unknown_b = factory.fresh();
    let lhs: Rc<dyn TreeNode> = Rc::new(AtomicNode::new(vec![TypeTerm::Var(unknown_a)]));
    let rhs: Rc<dyn TreeNode> = Rc::new(AtomicNode::new(vec![TypeTerm::Var(unknown_b)]));

    let t = factory.fresh();
    // Consume: float -> T -> float
    let overload = TypeTerm::method(
        vec![TypeTerm::atom("float"), TypeTerm::Var(t)],
        TypeTerm::atom("float"),
    )
    .as_dummy()
    .unwrap()
    .clone();
    let consume_node = MethodNode::new(vec![overload], vec![lhs.clone(), rhs.clone()]);

    let (top, final_sigma) = consume_node
        .resolve_unifiers(
            &engine,
            &registry,
            &TypeTerm::atom("float"),
            &unify_ir::Unifier::new(),
            None,
            true,
            true,
        )
        .unwrap();
    assert_eq!(top, TypeTerm::atom("float"));

    let rhs_resolved = final_sigma.simplify(&rhs.selected_type().unwrap());
    assert!(
        matches!(rhs_resolved, TypeTerm::Var(_)),
        "the second argument's type parameter was never constrained, so it stays an unbound Var"
    );
    assert!(!rhs_resolved.is_resolved());
}

#[test]
fn occurs_check_rejects_infinite_type() {
    let factory = VarFactory::new();
    let options = ResolveOptions::default();
    let engine = UnifyEngine::new(&factory, &options);
    let v = factory.fresh();
    let list_of_v = list(TypeTerm::Var(v.clone()));
    let err = engine
        .unify(&TypeTerm::Var(v), &list_of_v, &unify_ir::Unifier::new())
        .unwrap_err();
    assert!(matches!(err, UnifyError::RecursionBinding { .. }));
}
