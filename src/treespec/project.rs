//! Projection of a tree against a prefix spec: `flatten_up_to`.

use core::fmt::{self, Display, Formatter};
use std::sync::Arc;

use crate::registry::{Kind, TypeRegistry};
use crate::treespec::{Node, NodeData, TreeSpec};
use crate::value::{sorted_keys, Key, PathEntry, TreePath, Value};
use crate::{DynError, MAX_RECURSION_DEPTH};

/// The error type returned by [`TreeSpec::flatten_up_to`]: a structural mismatch between
/// the prefix spec and the tree, carrying the path of the offending node.
#[derive(Debug)]
pub enum FlattenUpToError {
    /// The tree has a different node kind than the spec at the given path.
    KindMismatch {
        /// The kind the spec expects.
        expected: Kind,
        /// The kind the tree has.
        found: Kind,
        /// Where the two disagree.
        path: TreePath,
    },
    /// The tree's container has a different number of children than the spec.
    ArityMismatch {
        /// The kind of the container.
        kind: Kind,
        /// The arity the spec expects.
        expected: usize,
        /// The arity the tree has.
        found: usize,
        /// Where the two disagree.
        path: TreePath,
    },
    /// The tree's container carries different auxiliary data than the spec — mismatched
    /// keys, types, maxlen, factory, or custom aux.
    DataMismatch {
        /// The kind of the container.
        kind: Kind,
        /// A rendering of the data the spec expects.
        expected: String,
        /// A rendering of the data the tree has.
        found: String,
        /// Where the two disagree.
        path: TreePath,
    },
    /// The spec is deeper than [`MAX_RECURSION_DEPTH`].
    DepthExceeded {
        /// The depth at which projection gave up.
        depth: usize,
    },
    /// A custom `to_iterable` callback failed while splitting a tree node.
    Callback(DynError),
}

impl Display for FlattenUpToError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::KindMismatch {
                expected,
                found,
                path,
            } => write!(f, "expected {} at {}, found {}", expected, path, found),
            Self::ArityMismatch {
                kind,
                expected,
                found,
                path,
            } => write!(
                f,
                "expected a {} of {} child(ren) at {}, found {}",
                kind, expected, path, found,
            ),
            Self::DataMismatch {
                kind,
                expected,
                found,
                path,
            } => write!(
                f,
                "mismatched {} data at {}: expected {}, found {}",
                kind, path, expected, found,
            ),
            Self::DepthExceeded { depth } => write!(
                f,
                "the treespec exceeds the maximum recursion depth of {} at depth {}",
                MAX_RECURSION_DEPTH, depth,
            ),
            Self::Callback(..) => f.write_str("a custom to_iterable callback failed"),
        }
    }
}
impl std::error::Error for FlattenUpToError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Callback(inner) => Some(&**inner),
            _ => None,
        }
    }
}

/// The `[start, end)` traversal ranges of the root's children, in child order.
fn child_ranges(nodes: &[Node]) -> Vec<(usize, usize)> {
    let root = nodes.last().expect("a treespec traversal cannot be empty");
    let mut ranges = Vec::with_capacity(root.arity);
    let mut pos = nodes.len() - 1;
    for _ in 0..root.arity {
        let child_root = &nodes[pos - 1];
        debug_assert!(
            pos >= child_root.num_nodes,
            "child subtree walked off the start of the traversal",
        );
        ranges.push((pos - child_root.num_nodes, pos));
        pos -= child_root.num_nodes;
    }
    ranges.reverse();
    ranges
}

struct Projector<'a> {
    spec: &'a TreeSpec,
    registry: TypeRegistry,
    path: TreePath,
    out: Vec<Value>,
}

impl Projector<'_> {
    fn data_mismatch(
        &self,
        kind: Kind,
        expected: &dyn fmt::Debug,
        found: &dyn fmt::Debug,
    ) -> FlattenUpToError {
        FlattenUpToError::DataMismatch {
            kind,
            expected: format!("{:?}", expected),
            found: format!("{:?}", found),
            path: self.path.clone(),
        }
    }

    fn check_arity(&self, kind: Kind, expected: usize, found: usize) -> Result<(), FlattenUpToError> {
        if expected == found {
            Ok(())
        } else {
            Err(FlattenUpToError::ArityMismatch {
                kind,
                expected,
                found,
                path: self.path.clone(),
            })
        }
    }

    fn project_children<'v>(
        &mut self,
        nodes: &[Node],
        children: impl IntoIterator<Item = (PathEntry, &'v Value)>,
        depth: usize,
    ) -> Result<(), FlattenUpToError> {
        for ((start, end), (entry, child)) in child_ranges(nodes).into_iter().zip(children) {
            self.path.push(entry);
            let result = self.project(&nodes[start..end], child, depth + 1);
            self.path.pop();
            result?;
        }
        Ok(())
    }

    /// Captures one output subtree per leaf of the spec slice, checking every interior
    /// node of the slice against the corresponding node of `value`.
    fn project(
        &mut self,
        nodes: &[Node],
        value: &Value,
        depth: usize,
    ) -> Result<(), FlattenUpToError> {
        if depth >= MAX_RECURSION_DEPTH {
            return Err(FlattenUpToError::DepthExceeded { depth });
        }
        let root = nodes.last().expect("a treespec traversal cannot be empty");
        if root.kind == Kind::Leaf {
            self.out.push(value.clone());
            return Ok(());
        }

        let (found_kind, found_registration) =
            self.registry
                .classify(value, self.spec.none_is_leaf, self.spec.namespace());
        let found_registration = found_registration.cloned();
        if found_kind != root.kind {
            return Err(FlattenUpToError::KindMismatch {
                expected: root.kind,
                found: found_kind,
                path: self.path.clone(),
            });
        }

        match (root.kind, value) {
            (Kind::None, Value::None) => Ok(()),
            (Kind::Tuple, Value::Tuple(items)) | (Kind::List, Value::List(items)) => {
                self.check_arity(root.kind, root.arity, items.len())?;
                self.project_children(
                    nodes,
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, child)| (PathEntry::Index(i), child)),
                    depth,
                )
            }
            (Kind::Deque, Value::Deque { items, maxlen }) => {
                let expected_maxlen = match &root.node_data {
                    Some(NodeData::MaxLen(maxlen)) => *maxlen,
                    _ => unreachable!("deque node without a maxlen"),
                };
                if expected_maxlen != *maxlen {
                    return Err(self.data_mismatch(root.kind, &expected_maxlen, maxlen));
                }
                self.check_arity(root.kind, root.arity, items.len())?;
                self.project_children(
                    nodes,
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, child)| (PathEntry::Index(i), child)),
                    depth,
                )
            }
            (Kind::NamedTuple, Value::NamedTuple { ty, items }) => {
                let expected_ty = match &root.node_data {
                    Some(NodeData::NamedTuple(ty)) => ty,
                    _ => unreachable!("namedtuple node without its type"),
                };
                if expected_ty != ty {
                    return Err(self.data_mismatch(root.kind, expected_ty, ty));
                }
                self.check_arity(root.kind, root.arity, items.len())?;
                self.project_children(
                    nodes,
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, child)| (PathEntry::Index(i), child)),
                    depth,
                )
            }
            (Kind::StructSequence, Value::StructSeq { ty, items }) => {
                let expected_ty = match &root.node_data {
                    Some(NodeData::StructSequence(ty)) => ty,
                    _ => unreachable!("struct sequence node without its type"),
                };
                if expected_ty != ty {
                    return Err(self.data_mismatch(root.kind, expected_ty, ty));
                }
                self.check_arity(root.kind, root.arity, items.len())?;
                self.project_children(
                    nodes,
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, child)| (PathEntry::Index(i), child)),
                    depth,
                )
            }
            (Kind::Dict, Value::Dict(entries))
            | (Kind::DefaultDict, Value::DefaultDict { entries, .. }) => {
                let expected_keys = match &root.node_data {
                    Some(NodeData::Keys(keys)) => keys,
                    Some(NodeData::DefaultDict { factory, keys }) => {
                        if let Value::DefaultDict {
                            factory: found_factory,
                            ..
                        } = value
                        {
                            if factory != found_factory {
                                return Err(self.data_mismatch(
                                    root.kind,
                                    factory,
                                    found_factory,
                                ));
                            }
                        }
                        keys
                    }
                    _ => unreachable!("dict node without keys"),
                };
                self.check_arity(root.kind, root.arity, entries.len())?;
                let found_keys: Vec<Key> =
                    entries.iter().map(|(key, _)| key.clone()).collect();
                if *expected_keys != sorted_keys(&found_keys) {
                    return Err(self.data_mismatch(root.kind, expected_keys, &found_keys));
                }
                self.project_children(
                    nodes,
                    expected_keys.iter().map(|key| {
                        let (_, child) = entries
                            .iter()
                            .find(|(candidate, _)| candidate == key)
                            .expect("key vanished between the set check and the lookup");
                        (PathEntry::Key(key.clone()), child)
                    }),
                    depth,
                )
            }
            (Kind::OrderedDict, Value::OrderedDict(entries)) => {
                let expected_keys = match &root.node_data {
                    Some(NodeData::Keys(keys)) => keys,
                    _ => unreachable!("ordered dict node without keys"),
                };
                self.check_arity(root.kind, root.arity, entries.len())?;
                let found_keys: Vec<Key> =
                    entries.iter().map(|(key, _)| key.clone()).collect();
                if *expected_keys != found_keys {
                    return Err(self.data_mismatch(root.kind, expected_keys, &found_keys));
                }
                self.project_children(
                    nodes,
                    entries
                        .iter()
                        .map(|(key, child)| (PathEntry::Key(key.clone()), child)),
                    depth,
                )
            }
            (Kind::Custom, _) => {
                let expected_registration = root
                    .custom
                    .as_ref()
                    .expect("custom node without a registration");
                let found_registration = found_registration
                    .expect("custom classification without a registration");
                if !Arc::ptr_eq(expected_registration, &found_registration) {
                    return Err(self.data_mismatch(
                        root.kind,
                        &expected_registration.type_name(),
                        &found_registration.type_name(),
                    ));
                }
                let parts = found_registration
                    .flatten_value(value)
                    .map_err(FlattenUpToError::Callback)?;
                let expected_aux = match &root.node_data {
                    Some(NodeData::Custom(aux)) => aux,
                    _ => unreachable!("custom node without auxiliary data"),
                };
                if expected_aux != &parts.aux {
                    return Err(self.data_mismatch(root.kind, expected_aux, &parts.aux));
                }
                self.check_arity(root.kind, root.arity, parts.children.len())?;
                let entries: Vec<PathEntry> = match parts.entries {
                    Some(entries) => entries,
                    None => (0..parts.children.len()).map(PathEntry::Index).collect(),
                };
                self.project_children(
                    nodes,
                    entries.into_iter().zip(parts.children.iter()),
                    depth,
                )
            }
            _ => unreachable!("kind classification disagrees with the value shape"),
        }
    }
}

impl TreeSpec {
    /// Projects `full_tree` against this spec, treated as a prefix of the tree's
    /// structure: returns one subtree of `full_tree` per leaf slot of the spec, in leaf
    /// order.
    ///
    /// Every interior node of the spec must agree with the corresponding node of the
    /// tree in kind, arity, and auxiliary data; at a leaf slot the tree's subtree is
    /// captured verbatim, however deep.
    ///
    /// # Errors
    /// Fails with a structural-mismatch error identifying the offending path.
    ///
    /// # Example
    /// ```rust
    /// use kindling::{flatten, FlattenOptions, Key, Value};
    ///
    /// let prefix = Value::dict([
    ///     (Key::from("a"), Value::Int(0)),
    ///     (Key::from("b"), Value::Int(0)),
    /// ]);
    /// let (_, spec) = flatten(&prefix, &FlattenOptions::default()).unwrap();
    ///
    /// let full = Value::dict([
    ///     (Key::from("a"), Value::tuple(vec![Value::Int(1), Value::Int(2)])),
    ///     (Key::from("b"), Value::tuple(vec![Value::Int(3), Value::Int(4)])),
    /// ]);
    /// let subtrees = spec.flatten_up_to(&full).unwrap();
    /// assert_eq!(
    ///     subtrees,
    ///     vec![
    ///         Value::tuple(vec![Value::Int(1), Value::Int(2)]),
    ///         Value::tuple(vec![Value::Int(3), Value::Int(4)]),
    ///     ],
    /// );
    /// ```
    pub fn flatten_up_to(&self, full_tree: &Value) -> Result<Vec<Value>, FlattenUpToError> {
        let mut projector = Projector {
            spec: self,
            registry: TypeRegistry::snapshot(),
            path: TreePath::root(),
            out: Vec::with_capacity(self.num_leaves()),
        };
        projector.project(&self.traversal, full_tree, 0)?;
        debug_assert_eq!(
            projector.out.len(),
            self.num_leaves(),
            "projection did not fill every leaf slot",
        );
        Ok(projector.out)
    }
}
