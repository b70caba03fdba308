use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::*;
use crate::registry::register_node;
use crate::value::{Factory, Key, NamedTupleType, PathEntry, TreePath, Value};
use crate::{NodeParts, MAX_RECURSION_DEPTH};

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&x| Value::Int(x)).collect()
}

fn hash_of(spec: &TreeSpec) -> u64 {
    let mut hasher = DefaultHasher::new();
    spec.hash(&mut hasher);
    hasher.finish()
}

fn sample_tree() -> Value {
    Value::list(vec![
        Value::Int(1),
        Value::tuple(vec![Value::Int(2), Value::Int(3)]),
        Value::dict([(Key::from("b"), Value::Int(4)), (Key::from("a"), Value::Int(5))]),
    ])
}

#[test]
fn flatten_orders_leaves_and_round_trips() {
    let tree = sample_tree();
    let (leaves, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    assert_eq!(leaves, ints(&[1, 2, 3, 5, 4]));
    assert_eq!(spec.num_leaves(), 5);
    assert_eq!(spec.num_nodes(), 8);
    assert_eq!(spec.num_children(), 3);
    assert_eq!(spec.unflatten(leaves).unwrap(), tree);
}

#[test]
fn none_as_node() {
    let tree = Value::list(vec![Value::Int(1), Value::None, Value::Int(2)]);
    let (leaves, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    assert_eq!(leaves, ints(&[1, 2]));
    assert_eq!(spec.to_string(), "PyTreeSpec([*, None, *])");
    assert_eq!(spec.unflatten(leaves).unwrap(), tree);
}

#[test]
fn none_as_leaf() {
    let tree = Value::list(vec![Value::Int(1), Value::None, Value::Int(2)]);
    let options = FlattenOptions {
        none_is_leaf: true,
        ..FlattenOptions::default()
    };
    let (leaves, spec) = flatten(&tree, &options).unwrap();
    assert_eq!(leaves, vec![Value::Int(1), Value::None, Value::Int(2)]);
    assert_eq!(spec.to_string(), "PyTreeSpec([*, *, *], NoneIsLeaf)");
    assert_eq!(spec.unflatten(leaves).unwrap(), tree);
}

#[test]
fn compose_substitutes_every_leaf() {
    let outer_tree = Value::list(vec![Value::Int(0), Value::Int(0)]);
    let inner_tree = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
    let (_, outer) = flatten(&outer_tree, &FlattenOptions::default()).unwrap();
    let (_, inner) = flatten(&inner_tree, &FlattenOptions::default()).unwrap();

    let composed = outer.compose(&inner).unwrap();
    assert_eq!(composed.num_leaves(), 4);
    assert_eq!(composed.to_string(), "PyTreeSpec([(*, *), (*, *)])");
    assert_eq!(
        composed.unflatten(ints(&[1, 2, 1, 2])).unwrap(),
        Value::list(vec![inner_tree.clone(), inner_tree]),
    );
}

#[test]
fn flatten_up_to_captures_subtrees() {
    let prefix = Value::dict([
        (Key::from("a"), Value::Int(0)),
        (Key::from("b"), Value::Int(0)),
    ]);
    let (_, spec) = flatten(&prefix, &FlattenOptions::default()).unwrap();

    let full = Value::dict([
        (Key::from("a"), Value::tuple(vec![Value::Int(1), Value::Int(2)])),
        (Key::from("b"), Value::tuple(vec![Value::Int(3), Value::Int(4)])),
    ]);
    assert_eq!(
        spec.flatten_up_to(&full).unwrap(),
        vec![
            Value::tuple(vec![Value::Int(1), Value::Int(2)]),
            Value::tuple(vec![Value::Int(3), Value::Int(4)]),
        ],
    );
}

#[test]
fn flatten_up_to_reports_the_offending_path() {
    let (_, spec) =
        flatten(&Value::list(ints(&[1, 2, 3])), &FlattenOptions::default()).unwrap();
    let error = spec.flatten_up_to(&Value::list(ints(&[1, 2]))).unwrap_err();
    match error {
        FlattenUpToError::ArityMismatch {
            expected,
            found,
            ref path,
            ..
        } => {
            assert_eq!(expected, 3);
            assert_eq!(found, 2);
            assert!(path.is_root());
        }
        other => panic!("expected an arity mismatch, got {}", other),
    }

    let nested = Value::list(vec![Value::list(ints(&[1])), Value::list(ints(&[2]))]);
    let (_, spec) = flatten(&nested, &FlattenOptions::default()).unwrap();
    let error = spec
        .flatten_up_to(&Value::list(vec![
            Value::list(ints(&[1])),
            Value::tuple(ints(&[2])),
        ]))
        .unwrap_err();
    match error {
        FlattenUpToError::KindMismatch { ref path, .. } => {
            assert_eq!(path.entries(), &[PathEntry::Index(1)]);
        }
        other => panic!("expected a kind mismatch, got {}", other),
    }
}

#[test]
fn flatten_up_to_by_self_reproduces_the_leaves() {
    let tree = sample_tree();
    let (leaves, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    assert_eq!(spec.flatten_up_to(&tree).unwrap(), leaves);
}

#[test]
fn display_uses_native_container_conventions() {
    let tree = Value::tuple(vec![Value::Int(1)]);
    let (_, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    assert_eq!(spec.to_string(), "PyTreeSpec((*,))");

    let tree = Value::ordered_dict([
        (Key::from("b"), Value::Int(1)),
        (Key::from("a"), Value::Int(2)),
    ]);
    let (_, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    assert_eq!(spec.to_string(), "PyTreeSpec(OrderedDict([('b', *), ('a', *)]))");

    let tree = Value::default_dict(
        Some(Factory::new("list", || Value::List(Vec::new()))),
        [(Key::from("k"), Value::Int(1))],
    );
    let (_, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    assert_eq!(spec.to_string(), "PyTreeSpec(defaultdict(list, {'k': *}))");

    let tree = Value::deque(ints(&[1, 2]), Some(5));
    let (_, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    assert_eq!(spec.to_string(), "PyTreeSpec(deque([*, *], maxlen=5))");

    let point = std::sync::Arc::new(NamedTupleType::new("Point", ["x", "y"]));
    let tree = Value::named_tuple(point, ints(&[1, 2]));
    let (_, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    assert_eq!(spec.to_string(), "PyTreeSpec(Point(x=*, y=*))");
}

#[test]
fn dict_key_order_is_canonical() {
    let forward = Value::dict([
        (Key::from("b"), Value::Int(1)),
        (Key::from("a"), Value::Int(2)),
    ]);
    let backward = Value::dict([
        (Key::from("a"), Value::Int(2)),
        (Key::from("b"), Value::Int(1)),
    ]);
    let (leaves_forward, spec_forward) = flatten(&forward, &FlattenOptions::default()).unwrap();
    let (leaves_backward, spec_backward) = flatten(&backward, &FlattenOptions::default()).unwrap();
    assert_eq!(spec_forward, spec_backward);
    assert_eq!(hash_of(&spec_forward), hash_of(&spec_backward));
    assert_eq!(leaves_forward, ints(&[2, 1]));
    assert_eq!(leaves_backward, ints(&[2, 1]));
    // Reconstruction reinserts the keys in the stored sorted order.
    assert_eq!(spec_forward.unflatten(leaves_forward).unwrap(), backward);
}

#[test]
fn children_reconstruct_the_spec() {
    let tree = Value::tuple(vec![
        Value::Int(1),
        Value::list(ints(&[2, 3])),
        Value::dict([(Key::from("k"), Value::Int(4))]),
    ]);
    let (_, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    let children = spec.children();
    assert_eq!(children.len(), 3);
    assert_eq!(children[0], TreeSpec::leaf(false));
    let rebuilt = TreeSpec::tuple(children, false).unwrap();
    assert_eq!(rebuilt, spec);
    assert_eq!(hash_of(&rebuilt), hash_of(&spec));
}

#[test]
fn children_of_a_leaf_spec_are_empty() {
    assert!(TreeSpec::leaf(false).children().is_empty());
    assert!(TreeSpec::none(false).children().is_empty());
}

#[test]
fn leaf_and_none_constructors() {
    let leaf = TreeSpec::leaf(false);
    assert!(leaf.is_leaf(true));
    assert_eq!(leaf.num_leaves(), 1);
    assert_eq!(leaf.to_string(), "PyTreeSpec(*)");

    let none = TreeSpec::none(false);
    assert!(!none.is_leaf(true));
    assert!(none.is_leaf(false));
    assert_eq!(none.num_leaves(), 0);
    assert_eq!(none.to_string(), "PyTreeSpec(None)");

    // Under NoneIsLeaf the None constructor degenerates to a leaf.
    assert_eq!(TreeSpec::none(true), TreeSpec::leaf(true));
}

#[test]
fn walk_folds_bottom_up() {
    let tree = Value::list(vec![
        Value::Int(1),
        Value::tuple(ints(&[2, 3])),
        Value::None,
    ]);
    let (leaves, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    let leaf_values: Vec<i64> = leaves
        .iter()
        .map(|leaf| match leaf {
            Value::Int(x) => *x,
            other => panic!("unexpected leaf {:?}", other),
        })
        .collect();

    let sum = spec
        .walk(
            &mut |children: Vec<i64>, _data| Ok(children.iter().sum()),
            None,
            leaf_values.clone(),
        )
        .unwrap();
    assert_eq!(sum, 6);

    let doubled = spec
        .walk(
            &mut |children: Vec<i64>, _data| Ok(children.iter().sum()),
            Some(&mut |leaf: i64| Ok(leaf * 2)),
            leaf_values,
        )
        .unwrap();
    assert_eq!(doubled, 12);
}

#[test]
fn unflatten_checks_the_leaf_count() {
    let (_, spec) =
        flatten(&Value::list(ints(&[1, 2, 3])), &FlattenOptions::default()).unwrap();
    assert!(matches!(
        spec.unflatten(ints(&[1, 2])),
        Err(UnflattenError::TooFewLeaves {
            expected: 3,
            got: 2,
        }),
    ));
    assert!(matches!(
        spec.unflatten(ints(&[1, 2, 3, 4])),
        Err(UnflattenError::TooManyLeaves { expected: 3 }),
    ));
}

#[test]
fn leaf_predicate_forces_leaves() {
    let tree = Value::list(vec![
        Value::tuple(ints(&[1, 2])),
        Value::tuple(ints(&[3, 4])),
    ]);
    let is_pair = |value: &Value| matches!(value, Value::Tuple(items) if items.len() == 2);
    let options = FlattenOptions {
        leaf_predicate: Some(&is_pair),
        ..FlattenOptions::default()
    };
    let (leaves, spec) = flatten(&tree, &options).unwrap();
    assert_eq!(
        leaves,
        vec![Value::tuple(ints(&[1, 2])), Value::tuple(ints(&[3, 4]))],
    );
    assert_eq!(spec.to_string(), "PyTreeSpec([*, *])");
    assert_eq!(spec.unflatten(leaves).unwrap(), tree);
}

#[test]
fn all_leaves_classifies_each_element() {
    let flat = [Value::Int(1), Value::from("x"), Value::opaque(3.5_f32)];
    assert!(all_leaves(flat.iter(), false, ""));
    let nested = [Value::Int(1), Value::list(ints(&[2]))];
    assert!(!all_leaves(nested.iter(), false, ""));
    assert!(!all_leaves([Value::None].iter(), false, ""));
    assert!(all_leaves([Value::None].iter(), true, ""));
}

#[test]
fn equality_treats_the_empty_namespace_as_compatible() {
    let leaf_spec = TreeSpec::leaf(false);
    let mut in_namespace = TreeSpec::leaf(false);
    in_namespace.namespace = Box::from("ns-a");
    let mut other_namespace = TreeSpec::leaf(false);
    other_namespace.namespace = Box::from("ns-b");

    assert_eq!(leaf_spec, in_namespace);
    assert_eq!(hash_of(&leaf_spec), hash_of(&in_namespace));
    assert_ne!(in_namespace, other_namespace);

    let mut none_leaf = TreeSpec::leaf(true);
    assert_ne!(leaf_spec, none_leaf);
    none_leaf.none_is_leaf = false;
    assert_eq!(leaf_spec, none_leaf);
}

#[test]
fn tuple_builder_rejects_mismatched_children() {
    let result = TreeSpec::tuple(vec![TreeSpec::leaf(true)], false);
    assert_eq!(result.unwrap_err(), TupleError::NoneIsLeafMismatch { expected: false });

    let mut in_a = TreeSpec::leaf(false);
    in_a.namespace = Box::from("ns-a");
    let mut in_b = TreeSpec::leaf(false);
    in_b.namespace = Box::from("ns-b");
    let result = TreeSpec::tuple(vec![in_a.clone(), in_b], false);
    assert!(matches!(result, Err(TupleError::NamespaceMismatch { .. })));

    // An empty namespace inherits from a non-empty neighbour.
    let unified = TreeSpec::tuple(vec![TreeSpec::leaf(false), in_a], false).unwrap();
    assert_eq!(unified.namespace(), "ns-a");
}

#[test]
fn compose_rejects_mismatched_specs() {
    let strict = TreeSpec::leaf(false);
    let lenient = TreeSpec::leaf(true);
    assert_eq!(
        strict.compose(&lenient).unwrap_err(),
        ComposeError::NoneIsLeafMismatch,
    );
}

#[test]
fn flatten_with_path_records_leaf_paths() {
    let tree = sample_tree();
    let (paths, leaves, spec) = flatten_with_path(&tree, &FlattenOptions::default()).unwrap();
    assert_eq!(leaves, ints(&[1, 2, 3, 5, 4]));
    assert_eq!(paths.len(), spec.num_leaves());
    let rendered: Vec<String> = paths.iter().map(TreePath::to_string).collect();
    assert_eq!(
        rendered,
        vec!["[0]", "[1][0]", "[1][1]", "[2]['a']", "[2]['b']"],
    );

    let (paths, _, _) =
        flatten_with_path(&Value::Int(1), &FlattenOptions::default()).unwrap();
    assert_eq!(paths, vec![TreePath::root()]);
}

#[test]
fn node_type_reports_the_root() {
    let (_, spec) = flatten(&sample_tree(), &FlattenOptions::default()).unwrap();
    assert_eq!(spec.node_type(), Some(crate::NodeType::List));
    assert_eq!(TreeSpec::leaf(false).node_type(), None);
    assert_eq!(TreeSpec::none(false).node_type(), Some(crate::NodeType::None));
}

#[test]
fn deep_trees_fail_recoverably() {
    std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let mut tree = Value::Int(0);
            for _ in 0..MAX_RECURSION_DEPTH {
                tree = Value::list(vec![tree]);
            }
            assert!(matches!(
                flatten(&tree, &FlattenOptions::default()),
                Err(FlattenError::DepthExceeded { .. }),
            ));
        })
        .unwrap()
        .join()
        .unwrap();
}

#[test]
fn picklable_round_trip() {
    let tree = Value::list(vec![
        Value::Int(1),
        Value::None,
        Value::dict([(Key::from("k"), Value::deque(ints(&[2]), Some(4)))]),
    ]);
    let (_, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    let restored = TreeSpec::from_picklable(spec.to_picklable()).unwrap();
    assert_eq!(restored, spec);
    assert_eq!(hash_of(&restored), hash_of(&spec));
    assert_eq!(restored.to_string(), spec.to_string());
}

#[test]
fn picklable_rejects_tampered_states() {
    let (_, spec) =
        flatten(&Value::list(ints(&[1, 2])), &FlattenOptions::default()).unwrap();

    let mut state = spec.to_picklable();
    state.nodes[2].num_leaves = 7;
    assert!(matches!(
        TreeSpec::from_picklable(state),
        Err(FromPicklableError::Malformed(..)),
    ));

    let mut state = spec.to_picklable();
    state.nodes[0].kind = 99;
    assert!(matches!(
        TreeSpec::from_picklable(state),
        Err(FromPicklableError::Malformed(..)),
    ));

    let state = PicklableSpec {
        nodes: Vec::new(),
        none_is_leaf: false,
        namespace: String::new(),
    };
    assert!(matches!(
        TreeSpec::from_picklable(state),
        Err(FromPicklableError::Malformed(..)),
    ));
}

#[derive(Debug, PartialEq)]
struct SortedSet(Vec<i64>);

fn register_sorted_set(namespace: &'static str) {
    register_node::<SortedSet, _, _>(
        |value| {
            let set = value
                .downcast_ref::<SortedSet>()
                .expect("registered for SortedSet");
            let mut items = set.0.clone();
            items.sort_unstable();
            Ok(NodeParts {
                children: items.into_iter().map(Value::Int).collect(),
                aux: Value::None,
                entries: None,
            })
        },
        |_aux, children| {
            let items = children
                .into_iter()
                .map(|child| match child {
                    Value::Int(x) => Ok(x),
                    other => Err(format!("expected an integer child, got {:?}", other).into()),
                })
                .collect::<Result<Vec<i64>, crate::DynError>>()?;
            Ok(Value::opaque(SortedSet(items)))
        },
        namespace,
    )
    .unwrap();
}

#[test]
fn custom_nodes_flatten_in_their_namespace() {
    register_sorted_set("treespec-tests-set");

    let tree = Value::list(vec![Value::opaque(SortedSet(vec![3, 1, 2])), Value::Int(0)]);

    // Without the namespace the value stays opaque.
    let (leaves, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    assert_eq!(leaves.len(), 2);
    assert_eq!(spec.namespace(), "");

    let options = FlattenOptions {
        namespace: "treespec-tests-set",
        ..FlattenOptions::default()
    };
    let (leaves, spec) = flatten(&tree, &options).unwrap();
    assert_eq!(leaves, ints(&[1, 2, 3, 0]));
    assert_eq!(spec.namespace(), "treespec-tests-set");
    assert_eq!(
        spec.to_string(),
        "PyTreeSpec([CustomTreeNode(SortedSet[None], [*, *, *]), *], \
         namespace='treespec-tests-set')",
    );
    assert_eq!(spec.unflatten(leaves).unwrap(), tree);

    // The projection of the tree by its own spec hands back the custom node's children.
    assert_eq!(spec.flatten_up_to(&tree).unwrap(), ints(&[1, 2, 3, 0]));

    // The persisted form re-resolves the registration through the registry.
    let restored = TreeSpec::from_picklable(spec.to_picklable()).unwrap();
    assert_eq!(restored, spec);
    assert_eq!(restored.unflatten(ints(&[5, 6, 7, 8])).unwrap(),
        Value::list(vec![Value::opaque(SortedSet(vec![5, 6, 7])), Value::Int(8)]));
}

#[test]
fn unknown_custom_types_fail_to_unpickle() {
    register_sorted_set("treespec-tests-unpickle");
    let tree = Value::opaque(SortedSet(vec![1]));
    let options = FlattenOptions {
        namespace: "treespec-tests-unpickle",
        ..FlattenOptions::default()
    };
    let (_, spec) = flatten(&tree, &options).unwrap();

    let mut state = spec.to_picklable();
    state.nodes[1].custom_type = Some("ghost::Type".to_owned());
    assert!(matches!(
        TreeSpec::from_picklable(state),
        Err(FromPicklableError::UnknownCustomType { .. }),
    ));
}
