//! The [`TreeSpec`] shape descriptor and its algebra.
//!
//! The module is home to the following items:
//! - [`TreeSpec`] — an immutable descriptor of a tree's shape, stored as a post-order
//!   node array
//! - [`flatten`], [`flatten_with_path`] and [`all_leaves`] — the flattening entry points
//! - [`NodeData`] — the kind-specific auxiliary data one node carries
//! - The per-operation error types

mod display;
mod flatten;
mod picklable;
mod project;
mod unflatten;

#[cfg(test)]
mod tests;

pub use flatten::{all_leaves, flatten, flatten_with_path, FlattenError, FlattenOptions};
pub use picklable::{FromPicklableError, PicklableNode, PicklableSpec};
pub use project::FlattenUpToError;
pub use unflatten::{UnflattenError, WalkError};

use core::fmt::{self, Display, Formatter};
use core::hash::{Hash, Hasher};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::registry::{Kind, Registration};
use crate::value::{Factory, Key, NamedTupleType, NodeType, PathEntry, StructSeqType, Value};

/// The kind-specific auxiliary data stored in one node of a [`TreeSpec`]: everything
/// about a container that its children don't capture.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeData {
    /// For a dictionary: its keys — sorted for [`Dict`](Kind::Dict), in insertion order
    /// for [`OrderedDict`](Kind::OrderedDict).
    Keys(Vec<Key>),
    /// For a dictionary with a default factory: the factory plus the sorted keys.
    DefaultDict {
        /// The default factory, if any.
        factory: Option<Factory>,
        /// The keys, sorted.
        keys: Vec<Key>,
    },
    /// For a deque: its length bound, if any.
    MaxLen(Option<usize>),
    /// For a named tuple: its runtime type.
    NamedTuple(Arc<NamedTupleType>),
    /// For a struct sequence: its runtime type.
    StructSequence(Arc<StructSeqType>),
    /// For a custom container: whatever its `to_iterable` returned as auxiliary data.
    Custom(Value),
}

/// One entry of a spec's post-order traversal.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) kind: Kind,
    pub(crate) arity: usize,
    pub(crate) node_data: Option<NodeData>,
    // Per-child path entries; only ever set for custom nodes whose `to_iterable`
    // supplied them. Not part of equality or hashing.
    pub(crate) node_entries: Option<Box<[PathEntry]>>,
    // Set iff kind is Custom.
    pub(crate) custom: Option<Arc<Registration>>,
    pub(crate) num_leaves: usize,
    pub(crate) num_nodes: usize,
}

impl Node {
    fn same_custom(a: &Option<Arc<Registration>>, b: &Option<Arc<Registration>>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn eq_shape(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.arity == other.arity
            && Self::same_custom(&self.custom, &other.custom)
            && self.node_data == other.node_data
            && self.num_leaves == other.num_leaves
            && self.num_nodes == other.num_nodes
    }

    fn hash_into<H: Hasher>(&self, state: &mut H) {
        self.kind.to_u8().hash(state);
        self.arity.hash(state);
        match &self.custom {
            Some(registration) => (Arc::as_ptr(registration) as usize).hash(state),
            None => 0_usize.hash(state),
        }
        self.num_leaves.hash(state);
        self.num_nodes.hash(state);
        // Custom auxiliary data may wrap arbitrary opaque payloads, so it stays out of
        // the hash; kind, arity, and the registration identity already discriminate.
        if self.kind == Kind::Custom {
            return;
        }
        match &self.node_data {
            None => 0_u8.hash(state),
            Some(NodeData::Keys(keys)) => keys.hash(state),
            Some(NodeData::DefaultDict { factory, keys }) => {
                factory.hash(state);
                keys.hash(state);
            }
            Some(NodeData::MaxLen(maxlen)) => maxlen.hash(state),
            Some(NodeData::NamedTuple(ty)) => ty.hash(state),
            Some(NodeData::StructSequence(ty)) => ty.hash(state),
            Some(NodeData::Custom(..)) => unreachable!("custom data on a non-custom node"),
        }
    }
}

/// An immutable descriptor of a tree's shape, precise enough to rebuild an isomorphic
/// tree from any sequence of replacement leaves.
///
/// Produced by [`flatten`], the [`leaf`](Self::leaf)/[`none`](Self::none)/
/// [`tuple`](Self::tuple) constructors, [`compose`](Self::compose),
/// [`children`](Self::children), and [`from_picklable`](Self::from_picklable). The spec
/// never retains the leaves of the tree it came from.
///
/// Internally this is a post-order array of nodes (children before parents, the root
/// last), each carrying the leaf and node counts of its subtree — which is what makes
/// equality a linear scan, `children` a slicing operation, and `compose` a concatenation.
#[derive(Clone)]
pub struct TreeSpec {
    pub(crate) traversal: SmallVec<[Node; 1]>,
    pub(crate) none_is_leaf: bool,
    pub(crate) namespace: Box<str>,
}

/// The error type returned by [`TreeSpec::compose`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComposeError {
    /// The two specs disagree on whether `None` is a leaf.
    NoneIsLeafMismatch,
    /// Both specs carry a non-empty namespace and they differ.
    NamespaceMismatch {
        /// The outer spec's namespace.
        outer: Box<str>,
        /// The inner spec's namespace.
        inner: Box<str>,
    },
}

impl Display for ComposeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoneIsLeafMismatch => {
                f.write_str("treespecs must have the same none_is_leaf value")
            }
            Self::NamespaceMismatch { outer, inner } => write!(
                f,
                "treespecs must have the same namespace, got '{}' vs. '{}'",
                outer, inner,
            ),
        }
    }
}
impl std::error::Error for ComposeError {}

/// The error type returned by [`TreeSpec::tuple`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TupleError {
    /// A child spec disagrees with the requested `none_is_leaf` value.
    NoneIsLeafMismatch {
        /// The `none_is_leaf` value the tuple was requested with.
        expected: bool,
    },
    /// Two child specs carry different non-empty namespaces.
    NamespaceMismatch {
        /// The namespace seen first.
        first: Box<str>,
        /// The conflicting namespace.
        second: Box<str>,
    },
}

impl Display for TupleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoneIsLeafMismatch { expected } => {
                write!(f, "expected treespecs with none_is_leaf={}", expected)
            }
            Self::NamespaceMismatch { first, second } => write!(
                f,
                "expected treespecs with the same namespace, got '{}' vs. '{}'",
                first, second,
            ),
        }
    }
}
impl std::error::Error for TupleError {}

impl TreeSpec {
    pub(crate) fn from_parts(
        traversal: SmallVec<[Node; 1]>,
        none_is_leaf: bool,
        namespace: Box<str>,
    ) -> Self {
        debug_assert!(!traversal.is_empty(), "a treespec traversal cannot be empty");
        Self {
            traversal,
            none_is_leaf,
            namespace,
        }
    }

    #[inline]
    pub(crate) fn root(&self) -> &Node {
        self.traversal
            .last()
            .expect("a treespec traversal cannot be empty")
    }

    /// Makes a spec representing a single leaf.
    pub fn leaf(none_is_leaf: bool) -> Self {
        let mut traversal = SmallVec::new();
        traversal.push(Node {
            kind: Kind::Leaf,
            arity: 0,
            node_data: None,
            node_entries: None,
            custom: None,
            num_leaves: 1,
            num_nodes: 1,
        });
        Self::from_parts(traversal, none_is_leaf, Box::from(""))
    }

    /// Makes a spec representing a `None` node — or a leaf, when `none_is_leaf` says so.
    pub fn none(none_is_leaf: bool) -> Self {
        if none_is_leaf {
            return Self::leaf(none_is_leaf);
        }
        let mut traversal = SmallVec::new();
        traversal.push(Node {
            kind: Kind::None,
            arity: 0,
            node_data: None,
            node_entries: None,
            custom: None,
            num_leaves: 0,
            num_nodes: 1,
        });
        Self::from_parts(traversal, none_is_leaf, Box::from(""))
    }

    /// Makes a tuple spec whose children are `specs`.
    ///
    /// The children's namespaces unify: empty ones inherit from non-empty neighbours.
    ///
    /// # Errors
    /// Fails if a child disagrees on `none_is_leaf` or two children carry conflicting
    /// non-empty namespaces.
    pub fn tuple(specs: Vec<TreeSpec>, none_is_leaf: bool) -> Result<Self, TupleError> {
        let mut namespace: Box<str> = Box::from("");
        for spec in &specs {
            if spec.none_is_leaf != none_is_leaf {
                return Err(TupleError::NoneIsLeafMismatch {
                    expected: none_is_leaf,
                });
            }
            if !spec.namespace.is_empty() {
                if namespace.is_empty() {
                    namespace = spec.namespace.clone();
                } else if namespace != spec.namespace {
                    return Err(TupleError::NamespaceMismatch {
                        first: namespace,
                        second: spec.namespace.clone(),
                    });
                }
            }
        }

        let arity = specs.len();
        let mut traversal = SmallVec::new();
        let mut num_leaves = 0;
        for spec in specs {
            num_leaves += spec.num_leaves();
            traversal.extend(spec.traversal);
        }
        let num_nodes = traversal.len() + 1;
        traversal.push(Node {
            kind: Kind::Tuple,
            arity,
            node_data: None,
            node_entries: None,
            custom: None,
            num_leaves,
            num_nodes,
        });
        Ok(Self::from_parts(traversal, none_is_leaf, namespace))
    }

    /// The number of leaves in the tree.
    #[inline]
    pub fn num_leaves(&self) -> usize {
        self.root().num_leaves
    }

    /// The number of nodes in the tree. A leaf is also a node, just one with no
    /// children.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.traversal.len()
    }

    /// The number of direct children of the root node.
    #[inline]
    pub fn num_children(&self) -> usize {
        self.root().arity
    }

    /// Whether `None` values classified as leaves when this spec was built.
    #[inline]
    pub fn none_is_leaf(&self) -> bool {
        self.none_is_leaf
    }

    /// The registry namespace used to resolve custom container types; empty unless the
    /// tree contained any.
    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The runtime type of the root node, or `None` if the root is a leaf.
    pub fn node_type(&self) -> Option<NodeType> {
        let root = self.root();
        Some(match root.kind {
            Kind::Leaf => return None,
            Kind::None => NodeType::None,
            Kind::Tuple => NodeType::Tuple,
            Kind::List => NodeType::List,
            Kind::Dict => NodeType::Dict,
            Kind::OrderedDict => NodeType::OrderedDict,
            Kind::DefaultDict => NodeType::DefaultDict,
            Kind::Deque => NodeType::Deque,
            Kind::NamedTuple => match &root.node_data {
                Some(NodeData::NamedTuple(ty)) => NodeType::NamedTuple(Arc::clone(ty)),
                _ => unreachable!("namedtuple node without its type"),
            },
            Kind::StructSequence => match &root.node_data {
                Some(NodeData::StructSequence(ty)) => NodeType::StructSequence(Arc::clone(ty)),
                _ => unreachable!("struct sequence node without its type"),
            },
            Kind::Custom => NodeType::Custom(
                root.custom
                    .as_ref()
                    .expect("custom node without a registration")
                    .type_name(),
            ),
        })
    }

    /// Tests whether the root is a leaf. With `strict`, a one-node spec representing
    /// `None` does not count.
    #[inline]
    pub fn is_leaf(&self, strict: bool) -> bool {
        if strict {
            self.num_nodes() == 1 && self.num_leaves() == 1
        } else {
            self.num_nodes() == 1
        }
    }

    /// Returns the specs rooted at the direct children of the root, in child order.
    pub fn children(&self) -> Vec<TreeSpec> {
        let root = self.root();
        let mut children: Vec<TreeSpec> = Vec::with_capacity(root.arity);
        let mut pos = self.traversal.len() - 1;
        for _ in 0..root.arity {
            let child_root = &self.traversal[pos - 1];
            debug_assert!(
                pos >= child_root.num_nodes,
                "child subtree walked off the start of the traversal",
            );
            let slice = &self.traversal[pos - child_root.num_nodes..pos];
            children.push(Self::from_parts(
                slice.iter().cloned().collect(),
                self.none_is_leaf,
                self.namespace.clone(),
            ));
            pos -= child_root.num_nodes;
        }
        debug_assert_eq!(pos, 0, "child subtrees did not cover the traversal");
        children.reverse();
        children
    }

    /// Composes two specs, substituting `inner` at every leaf slot of `self`.
    ///
    /// # Errors
    /// Fails if the specs disagree on `none_is_leaf` or carry conflicting non-empty
    /// namespaces.
    pub fn compose(&self, inner: &TreeSpec) -> Result<TreeSpec, ComposeError> {
        if self.none_is_leaf != inner.none_is_leaf {
            return Err(ComposeError::NoneIsLeafMismatch);
        }
        if !self.namespace.is_empty()
            && !inner.namespace.is_empty()
            && self.namespace != inner.namespace
        {
            return Err(ComposeError::NamespaceMismatch {
                outer: self.namespace.clone(),
                inner: inner.namespace.clone(),
            });
        }
        let namespace = if inner.namespace.is_empty() {
            self.namespace.clone()
        } else {
            inner.namespace.clone()
        };

        let inner_leaves = inner.num_leaves();
        let inner_nodes = inner.num_nodes();
        let mut traversal: SmallVec<[Node; 1]> = SmallVec::new();
        for node in &self.traversal {
            if node.kind == Kind::Leaf {
                traversal.extend(inner.traversal.iter().cloned());
            } else {
                let mut node = node.clone();
                node.num_nodes = (node.num_nodes - node.num_leaves) + node.num_leaves * inner_nodes;
                node.num_leaves *= inner_leaves;
                traversal.push(node);
            }
        }

        let composed = Self::from_parts(traversal, self.none_is_leaf, namespace);
        debug_assert_eq!(
            composed.num_leaves(),
            self.num_leaves() * inner_leaves,
            "composed leaf count mismatch",
        );
        debug_assert_eq!(
            composed.num_nodes(),
            (self.num_nodes() - self.num_leaves()) + self.num_leaves() * inner_nodes,
            "composed node count mismatch",
        );
        Ok(composed)
    }
}

impl PartialEq for TreeSpec {
    fn eq(&self, other: &Self) -> bool {
        if self.traversal.len() != other.traversal.len() || self.none_is_leaf != other.none_is_leaf
        {
            return false;
        }
        if !self.namespace.is_empty()
            && !other.namespace.is_empty()
            && self.namespace != other.namespace
        {
            return false;
        }
        self.traversal
            .iter()
            .zip(other.traversal.iter())
            .all(|(a, b)| a.eq_shape(b))
    }
}
impl Eq for TreeSpec {}

impl Hash for TreeSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // The namespace stays out: an empty namespace is equality-compatible with any
        // non-empty one, and equal specs must hash alike.
        self.none_is_leaf.hash(state);
        self.traversal.len().hash(state);
        for node in &self.traversal {
            node.hash_into(state);
        }
    }
}
