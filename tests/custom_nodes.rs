//! End-to-end coverage of custom container registrations: the trait-oriented
//! registration path, namespaced resolution, custom path entries, and callback failures.

use kindling::{
    flatten, flatten_with_path, register_node, register_node_class, CustomNode, DynError,
    FlattenError, FlattenOptions, Key, NodeData, NodeParts, PathEntry, TreeSpec, Value,
};

#[derive(Debug, PartialEq)]
struct Weights {
    bias: Vec<i64>,
    scale: Vec<i64>,
}

impl CustomNode for Weights {
    fn tree_flatten(&self) -> Result<NodeParts, DynError> {
        Ok(NodeParts {
            children: vec![
                Value::list(self.bias.iter().copied().map(Value::Int).collect()),
                Value::list(self.scale.iter().copied().map(Value::Int).collect()),
            ],
            aux: Value::from("weights-v1"),
            entries: Some(vec![
                PathEntry::Key(Key::from("bias")),
                PathEntry::Key(Key::from("scale")),
            ]),
        })
    }

    fn tree_unflatten(aux: &Value, children: Vec<Value>) -> Result<Self, DynError> {
        if aux != &Value::from("weights-v1") {
            return Err("unsupported weights version".into());
        }
        let mut lists = children.into_iter().map(|child| match child {
            Value::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Int(x) => Ok(x),
                    other => Err(format!("expected an integer, got {:?}", other).into()),
                })
                .collect::<Result<Vec<i64>, DynError>>(),
            other => Err(format!("expected a list, got {:?}", other).into()),
        });
        let bias = lists.next().ok_or("missing bias child")??;
        let scale = lists.next().ok_or("missing scale child")??;
        Ok(Self { bias, scale })
    }
}

#[test]
fn trait_registrations_flatten_and_rebuild() {
    register_node_class::<Weights>("custom-tests-weights").unwrap();

    let tree = Value::dict([(
        Key::from("layer"),
        Value::opaque(Weights {
            bias: vec![1, 2],
            scale: vec![3],
        }),
    )]);
    let options = FlattenOptions {
        namespace: "custom-tests-weights",
        ..FlattenOptions::default()
    };

    let (paths, leaves, spec) = flatten_with_path(&tree, &options).unwrap();
    assert_eq!(
        leaves,
        vec![Value::Int(1), Value::Int(2), Value::Int(3)],
    );
    let rendered: Vec<String> = paths.iter().map(ToString::to_string).collect();
    assert_eq!(
        rendered,
        vec![
            "['layer']['bias'][0]",
            "['layer']['bias'][1]",
            "['layer']['scale'][0]",
        ],
    );
    assert_eq!(spec.namespace(), "custom-tests-weights");
    assert_eq!(spec.unflatten(leaves).unwrap(), tree);
}

#[test]
fn custom_aux_reaches_walk_callbacks() {
    register_node_class::<Weights>("custom-tests-walk").unwrap();

    let tree = Value::opaque(Weights {
        bias: vec![5],
        scale: vec![7],
    });
    let options = FlattenOptions {
        namespace: "custom-tests-walk",
        ..FlattenOptions::default()
    };
    let (_, spec) = flatten(&tree, &options).unwrap();

    let mut seen_aux = Vec::new();
    let total = spec
        .walk(
            &mut |children: Vec<i64>, data| {
                if let Some(NodeData::Custom(aux)) = data {
                    seen_aux.push(aux.clone());
                }
                Ok(children.iter().sum())
            },
            None,
            vec![5_i64, 7],
        )
        .unwrap();
    assert_eq!(total, 12);
    assert_eq!(seen_aux, vec![Value::from("weights-v1")]);
}

#[derive(Debug, PartialEq)]
struct Unflattenable;

#[test]
fn callback_failures_surface_unmodified() {
    register_node::<Unflattenable, _, _>(
        |_| Err("this container refuses to be flattened".into()),
        |_, _| Ok(Value::opaque(Unflattenable)),
        "custom-tests-failing",
    )
    .unwrap();

    let options = FlattenOptions {
        namespace: "custom-tests-failing",
        ..FlattenOptions::default()
    };
    let error = flatten(&Value::opaque(Unflattenable), &options).unwrap_err();
    match error {
        FlattenError::Callback(inner) => {
            assert_eq!(inner.to_string(), "this container refuses to be flattened");
        }
        other => panic!("expected a callback failure, got {}", other),
    }

    // The failure produced no spec, and the same value flattens fine as a plain leaf
    // outside the namespace.
    let (leaves, spec) = flatten(
        &Value::opaque(Unflattenable),
        &FlattenOptions::default(),
    )
    .unwrap();
    assert_eq!(leaves.len(), 1);
    assert_eq!(spec, TreeSpec::leaf(false));
}

#[test]
fn path_entry_count_mismatches_are_rejected() {
    #[derive(Debug, PartialEq)]
    struct Lopsided;

    register_node::<Lopsided, _, _>(
        |_| {
            Ok(NodeParts {
                children: vec![Value::Int(1), Value::Int(2)],
                aux: Value::None,
                entries: Some(vec![PathEntry::Index(0)]),
            })
        },
        |_, _| Ok(Value::opaque(Lopsided)),
        "custom-tests-lopsided",
    )
    .unwrap();

    let options = FlattenOptions {
        namespace: "custom-tests-lopsided",
        ..FlattenOptions::default()
    };
    let error = flatten(&Value::opaque(Lopsided), &options).unwrap_err();
    assert!(matches!(
        error,
        FlattenError::EntryCountMismatch {
            children: 2,
            entries: 1,
            ..
        },
    ));
}
