//! The flattening engine: recursive descent over a [`Value`] producing leaves and a
//! [`TreeSpec`].

use core::fmt::{self, Debug, Display, Formatter};

use smallvec::SmallVec;

use crate::registry::{Kind, TypeRegistry};
use crate::treespec::{Node, NodeData, TreeSpec};
use crate::value::{sorted_key_indices, Key, PathEntry, TreePath, Value};
use crate::{DynError, MAX_RECURSION_DEPTH};

/// Options accepted by [`flatten`] and [`flatten_with_path`].
pub struct FlattenOptions<'a> {
    /// An optional predicate forcing matching values to be treated as leaves, consulted
    /// before classification.
    pub leaf_predicate: Option<&'a (dyn Fn(&Value) -> bool + 'a)>,
    /// Whether `None` values classify as leaves instead of zero-arity `None` nodes.
    pub none_is_leaf: bool,
    /// The registry namespace used to resolve custom container types.
    pub namespace: &'a str,
}

impl Default for FlattenOptions<'_> {
    fn default() -> Self {
        Self {
            leaf_predicate: None,
            none_is_leaf: false,
            namespace: "",
        }
    }
}

impl Debug for FlattenOptions<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlattenOptions")
            .field("leaf_predicate", &self.leaf_predicate.map(|_| "<fn>"))
            .field("none_is_leaf", &self.none_is_leaf)
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// The error type returned by [`flatten`] and [`flatten_with_path`].
#[derive(Debug)]
pub enum FlattenError {
    /// The tree is deeper than [`MAX_RECURSION_DEPTH`]. Cyclic input also lands here.
    DepthExceeded {
        /// The depth at which flattening gave up.
        depth: usize,
    },
    /// A custom `to_iterable` returned a different number of path entries than children.
    EntryCountMismatch {
        /// The name of the custom type.
        type_name: &'static str,
        /// How many children it produced.
        children: usize,
        /// How many path entries it produced.
        entries: usize,
    },
    /// A custom `to_iterable` callback failed; the error is passed through unmodified.
    Callback(DynError),
}

impl Display for FlattenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DepthExceeded { depth } => write!(
                f,
                "the tree exceeds the maximum recursion depth of {} at depth {}",
                MAX_RECURSION_DEPTH, depth,
            ),
            Self::EntryCountMismatch {
                type_name,
                children,
                entries,
            } => write!(
                f,
                "custom type `{}` produced {} path entries for {} children",
                type_name, entries, children,
            ),
            Self::Callback(..) => f.write_str("a custom to_iterable callback failed"),
        }
    }
}
impl std::error::Error for FlattenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Callback(inner) => Some(&**inner),
            _ => None,
        }
    }
}

struct PathRecorder {
    stack: TreePath,
    recorded: Vec<TreePath>,
}

struct Flattener<'a> {
    registry: TypeRegistry,
    options: &'a FlattenOptions<'a>,
    traversal: SmallVec<[Node; 1]>,
    leaves: Vec<Value>,
    paths: Option<PathRecorder>,
}

impl<'a> Flattener<'a> {
    fn new(options: &'a FlattenOptions<'a>, record_paths: bool) -> Self {
        Self {
            registry: TypeRegistry::snapshot(),
            options,
            traversal: SmallVec::new(),
            leaves: Vec::new(),
            paths: record_paths.then(|| PathRecorder {
                stack: TreePath::root(),
                recorded: Vec::new(),
            }),
        }
    }

    fn push_leaf(&mut self, value: &Value) {
        if let Some(paths) = &mut self.paths {
            paths.recorded.push(paths.stack.clone());
        }
        self.leaves.push(value.clone());
        self.traversal.push(Node {
            kind: Kind::Leaf,
            arity: 0,
            node_data: None,
            node_entries: None,
            custom: None,
            num_leaves: 1,
            num_nodes: 1,
        });
    }

    fn descend(
        &mut self,
        child: &Value,
        entry: impl FnOnce() -> PathEntry,
        depth: usize,
    ) -> Result<bool, FlattenError> {
        if self.paths.is_some() {
            let entry = entry();
            if let Some(paths) = &mut self.paths {
                paths.stack.push(entry);
            }
            let found_custom = self.flatten_into(child, depth);
            if let Some(paths) = &mut self.paths {
                paths.stack.pop();
            }
            found_custom
        } else {
            self.flatten_into(child, depth)
        }
    }

    /// Appends the subtree rooted at `value` to the traversal, returning whether it
    /// contains any custom node.
    fn flatten_into(&mut self, value: &Value, depth: usize) -> Result<bool, FlattenError> {
        if depth >= MAX_RECURSION_DEPTH {
            return Err(FlattenError::DepthExceeded { depth });
        }

        let forced_leaf = self
            .options
            .leaf_predicate
            .map_or(false, |predicate| predicate(value));
        let (kind, registration) = if forced_leaf {
            (Kind::Leaf, None)
        } else {
            let (kind, registration) =
                self.registry
                    .classify(value, self.options.none_is_leaf, self.options.namespace);
            (kind, registration.cloned())
        };

        match kind {
            Kind::Leaf => {
                self.push_leaf(value);
                return Ok(false);
            }
            Kind::None => {
                self.traversal.push(Node {
                    kind: Kind::None,
                    arity: 0,
                    node_data: None,
                    node_entries: None,
                    custom: None,
                    num_leaves: 0,
                    num_nodes: 1,
                });
                return Ok(false);
            }
            _ => {}
        }

        let start_nodes = self.traversal.len();
        let start_leaves = self.leaves.len();
        let mut found_custom = kind == Kind::Custom;

        let (arity, node_data, node_entries) = match (kind, value) {
            (Kind::Tuple, Value::Tuple(items)) | (Kind::List, Value::List(items)) => {
                for (i, child) in items.iter().enumerate() {
                    found_custom |= self.descend(child, || PathEntry::Index(i), depth + 1)?;
                }
                (items.len(), None, None)
            }
            (Kind::Deque, Value::Deque { items, maxlen }) => {
                for (i, child) in items.iter().enumerate() {
                    found_custom |= self.descend(child, || PathEntry::Index(i), depth + 1)?;
                }
                (items.len(), Some(NodeData::MaxLen(*maxlen)), None)
            }
            (Kind::NamedTuple, Value::NamedTuple { ty, items }) => {
                for (i, child) in items.iter().enumerate() {
                    found_custom |= self.descend(child, || PathEntry::Index(i), depth + 1)?;
                }
                (
                    items.len(),
                    Some(NodeData::NamedTuple(ty.clone())),
                    None,
                )
            }
            (Kind::StructSequence, Value::StructSeq { ty, items }) => {
                for (i, child) in items.iter().enumerate() {
                    found_custom |= self.descend(child, || PathEntry::Index(i), depth + 1)?;
                }
                (
                    items.len(),
                    Some(NodeData::StructSequence(ty.clone())),
                    None,
                )
            }
            (Kind::Dict, Value::Dict(entries)) => {
                let keys = self.descend_sorted(entries, depth, &mut found_custom)?;
                (entries.len(), Some(NodeData::Keys(keys)), None)
            }
            (Kind::DefaultDict, Value::DefaultDict { factory, entries }) => {
                let keys = self.descend_sorted(entries, depth, &mut found_custom)?;
                (
                    entries.len(),
                    Some(NodeData::DefaultDict {
                        factory: factory.clone(),
                        keys,
                    }),
                    None,
                )
            }
            (Kind::OrderedDict, Value::OrderedDict(entries)) => {
                for (key, child) in entries {
                    found_custom |=
                        self.descend(child, || PathEntry::Key(key.clone()), depth + 1)?;
                }
                (
                    entries.len(),
                    Some(NodeData::Keys(entries.iter().map(|(key, _)| key.clone()).collect())),
                    None,
                )
            }
            (Kind::Custom, _) => {
                let registration = registration
                    .as_ref()
                    .expect("custom classification without a registration");
                let parts = registration
                    .flatten_value(value)
                    .map_err(FlattenError::Callback)?;
                if let Some(entries) = &parts.entries {
                    if entries.len() != parts.children.len() {
                        return Err(FlattenError::EntryCountMismatch {
                            type_name: registration.type_name(),
                            children: parts.children.len(),
                            entries: entries.len(),
                        });
                    }
                }
                for (i, child) in parts.children.iter().enumerate() {
                    self.descend(
                        child,
                        || match &parts.entries {
                            Some(entries) => entries[i].clone(),
                            None => PathEntry::Index(i),
                        },
                        depth + 1,
                    )?;
                }
                (
                    parts.children.len(),
                    Some(NodeData::Custom(parts.aux)),
                    parts.entries.map(Vec::into_boxed_slice),
                )
            }
            _ => unreachable!("kind classification disagrees with the value shape"),
        };

        self.traversal.push(Node {
            kind,
            arity,
            node_data,
            node_entries,
            custom: registration,
            num_leaves: self.leaves.len() - start_leaves,
            num_nodes: self.traversal.len() - start_nodes + 1,
        });
        Ok(found_custom)
    }

    /// Descends into a sorted-key mapping's children in canonical key order, returning
    /// the keys in that order.
    fn descend_sorted(
        &mut self,
        entries: &[(Key, Value)],
        depth: usize,
        found_custom: &mut bool,
    ) -> Result<Vec<Key>, FlattenError> {
        let keys: Vec<Key> = entries.iter().map(|(key, _)| key.clone()).collect();
        let mut sorted = Vec::with_capacity(keys.len());
        for index in sorted_key_indices(&keys) {
            let (key, child) = &entries[index];
            *found_custom |= self.descend(child, || PathEntry::Key(key.clone()), depth + 1)?;
            sorted.push(key.clone());
        }
        Ok(sorted)
    }

    fn finish(self, found_custom: bool) -> (Vec<TreePath>, Vec<Value>, TreeSpec) {
        let namespace = if found_custom {
            Box::from(self.options.namespace)
        } else {
            Box::from("")
        };
        let spec = TreeSpec::from_parts(self.traversal, self.options.none_is_leaf, namespace);
        let paths = self.paths.map_or_else(Vec::new, |paths| paths.recorded);
        (paths, self.leaves, spec)
    }
}

/// Flattens a tree into the ordered sequence of its leaves and the [`TreeSpec`]
/// describing its shape.
///
/// Children are visited in each kind's canonical order: natural index order for
/// sequences, canonical sorted key order for [`Dict`](Value::Dict) and
/// [`DefaultDict`](Value::DefaultDict), insertion order for
/// [`OrderedDict`](Value::OrderedDict), and whatever order a custom `to_iterable`
/// produces. The resulting spec keeps the namespace only if a custom node was actually
/// encountered.
///
/// # Errors
/// Fails if the tree is deeper than [`MAX_RECURSION_DEPTH`] or a custom callback fails.
///
/// # Example
/// ```rust
/// use kindling::{flatten, FlattenOptions, Key, Value};
///
/// let tree = Value::dict([
///     (Key::from("b"), Value::Int(1)),
///     (Key::from("a"), Value::Int(2)),
/// ]);
/// let (leaves, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
/// // Keys are visited in sorted order, no matter the insertion order.
/// assert_eq!(leaves, vec![Value::Int(2), Value::Int(1)]);
/// assert_eq!(spec.to_string(), "PyTreeSpec({'a': *, 'b': *})");
/// ```
pub fn flatten(
    tree: &Value,
    options: &FlattenOptions<'_>,
) -> Result<(Vec<Value>, TreeSpec), FlattenError> {
    let mut flattener = Flattener::new(options, false);
    let found_custom = flattener.flatten_into(tree, 0)?;
    let (_, leaves, spec) = flattener.finish(found_custom);
    Ok((leaves, spec))
}

/// Flattens a tree like [`flatten`], additionally recording the path from the root to
/// every leaf.
///
/// # Errors
/// Fails if the tree is deeper than [`MAX_RECURSION_DEPTH`] or a custom callback fails.
pub fn flatten_with_path(
    tree: &Value,
    options: &FlattenOptions<'_>,
) -> Result<(Vec<TreePath>, Vec<Value>, TreeSpec), FlattenError> {
    let mut flattener = Flattener::new(options, true);
    let found_custom = flattener.flatten_into(tree, 0)?;
    Ok(flattener.finish(found_custom))
}

/// Tests whether every value in `iterable` classifies as a leaf under the given options.
pub fn all_leaves<'a, I>(iterable: I, none_is_leaf: bool, namespace: &str) -> bool
where
    I: IntoIterator<Item = &'a Value>,
{
    let registry = TypeRegistry::snapshot();
    iterable
        .into_iter()
        .all(|value| registry.classify(value, none_is_leaf, namespace).0 == Kind::Leaf)
}
