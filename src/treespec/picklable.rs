//! The persisted form of a [`TreeSpec`]: a plain-data state that can be stored, shipped,
//! and turned back into a spec by re-resolving custom types through the registry.

use core::fmt::{self, Display, Formatter};

use smallvec::SmallVec;

use crate::registry::{Kind, TypeRegistry};
use crate::treespec::{Node, NodeData, TreeSpec};
use crate::value::PathEntry;

/// The persisted form of one traversal node; see [`PicklableSpec`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PicklableNode {
    /// The node kind, as its stable numeric value.
    pub kind: u8,
    /// The number of direct children.
    pub arity: usize,
    /// The kind-specific auxiliary data.
    pub node_data: Option<NodeData>,
    /// The per-child path entries, for custom nodes that supplied them.
    pub node_entries: Option<Vec<PathEntry>>,
    /// The name of the custom type, for custom nodes.
    pub custom_type: Option<String>,
    /// The number of leaves in the subtree rooted here.
    pub num_leaves: usize,
    /// The number of nodes in the subtree rooted here.
    pub num_nodes: usize,
}

/// The persisted form of a [`TreeSpec`]: the post-order node states plus the
/// `none_is_leaf` flag and the namespace.
///
/// Produced by [`TreeSpec::to_picklable`] and consumed by [`TreeSpec::from_picklable`].
/// With the `serde` feature, `TreeSpec` itself serializes through this state.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PicklableSpec {
    /// The traversal node states, in post-order.
    pub nodes: Vec<PicklableNode>,
    /// Whether `None` classified as a leaf when the spec was built.
    pub none_is_leaf: bool,
    /// The registry namespace; custom types are re-resolved under it.
    pub namespace: String,
}

/// The error type returned by [`TreeSpec::from_picklable`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FromPicklableError {
    /// The state does not describe a well-formed treespec.
    Malformed(&'static str),
    /// A custom type could not be re-resolved through the current registry under the
    /// stored namespace.
    UnknownCustomType {
        /// The unresolved type name.
        type_name: String,
        /// The namespace resolution was attempted under.
        namespace: String,
    },
}

impl Display for FromPicklableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed treespec state: {}", reason),
            Self::UnknownCustomType {
                type_name,
                namespace,
            } => write!(
                f,
                "unknown custom type `{}` in treespec state (namespace '{}')",
                type_name, namespace,
            ),
        }
    }
}
impl std::error::Error for FromPicklableError {}

impl TreeSpec {
    /// Dumps the spec into its plain-data persisted form.
    ///
    /// The state references custom types by name only; turning it back into a spec
    /// re-resolves them through the process-wide registry.
    pub fn to_picklable(&self) -> PicklableSpec {
        PicklableSpec {
            nodes: self
                .traversal
                .iter()
                .map(|node| PicklableNode {
                    kind: node.kind.to_u8(),
                    arity: node.arity,
                    node_data: node.node_data.clone(),
                    node_entries: node.node_entries.as_ref().map(|entries| entries.to_vec()),
                    custom_type: node
                        .custom
                        .as_ref()
                        .map(|registration| registration.type_name().to_owned()),
                    num_leaves: node.num_leaves,
                    num_nodes: node.num_nodes,
                })
                .collect(),
            none_is_leaf: self.none_is_leaf,
            namespace: self.namespace.to_string(),
        }
    }

    /// Rebuilds a spec from its persisted form.
    ///
    /// The state is validated in full: node kinds, kind-appropriate auxiliary data, and
    /// the leaf/node counts (recomputed, not trusted) all have to check out, and every
    /// custom type must resolve through the current registry under the stored namespace.
    ///
    /// # Errors
    /// Fails on a malformed state or an unresolvable custom type.
    pub fn from_picklable(state: PicklableSpec) -> Result<Self, FromPicklableError> {
        if state.nodes.is_empty() {
            return Err(FromPicklableError::Malformed("empty traversal"));
        }

        let registry = TypeRegistry::snapshot();
        let mut traversal: SmallVec<[Node; 1]> = SmallVec::with_capacity(state.nodes.len());
        // Recomputed (leaves, nodes) counts of the subtrees assembled so far.
        let mut counts: Vec<(usize, usize)> = Vec::new();

        for node_state in state.nodes {
            let kind = Kind::from_u8(node_state.kind)
                .ok_or(FromPicklableError::Malformed("unknown node kind"))?;

            match (kind, &node_state.node_data) {
                (Kind::Leaf | Kind::None | Kind::Tuple | Kind::List, None) => {}
                (Kind::Dict | Kind::OrderedDict, Some(NodeData::Keys(keys)))
                    if keys.len() == node_state.arity => {}
                (Kind::DefaultDict, Some(NodeData::DefaultDict { keys, .. }))
                    if keys.len() == node_state.arity => {}
                (Kind::Deque, Some(NodeData::MaxLen(..))) => {}
                (Kind::NamedTuple, Some(NodeData::NamedTuple(ty)))
                    if ty.fields().len() == node_state.arity => {}
                (Kind::StructSequence, Some(NodeData::StructSequence(ty)))
                    if ty.n_sequence_fields() == node_state.arity => {}
                (Kind::Custom, Some(NodeData::Custom(..))) => {}
                _ => {
                    return Err(FromPicklableError::Malformed(
                        "node data does not fit the node kind",
                    ))
                }
            }

            if kind == Kind::None && state.none_is_leaf {
                return Err(FromPicklableError::Malformed(
                    "None node in a NoneIsLeaf treespec",
                ));
            }
            if matches!(kind, Kind::Leaf | Kind::None) && node_state.arity != 0 {
                return Err(FromPicklableError::Malformed(
                    "leaf or None node with a nonzero arity",
                ));
            }

            let custom = match kind {
                Kind::Custom => {
                    let type_name = node_state.custom_type.as_deref().ok_or(
                        FromPicklableError::Malformed("custom node without a type name"),
                    )?;
                    let registration = registry
                        .lookup_by_name(type_name, &state.namespace)
                        .ok_or_else(|| FromPicklableError::UnknownCustomType {
                            type_name: type_name.to_owned(),
                            namespace: state.namespace.clone(),
                        })?;
                    Some(registration.clone())
                }
                _ => {
                    if node_state.custom_type.is_some() || node_state.node_entries.is_some() {
                        return Err(FromPicklableError::Malformed(
                            "custom-only state on a non-custom node",
                        ));
                    }
                    None
                }
            };

            if counts.len() < node_state.arity {
                return Err(FromPicklableError::Malformed(
                    "node arity exceeds the subtrees before it",
                ));
            }
            let (mut num_leaves, mut num_nodes) = (0_usize, 1_usize);
            for (child_leaves, child_nodes) in counts.drain(counts.len() - node_state.arity..) {
                num_leaves += child_leaves;
                num_nodes += child_nodes;
            }
            if kind == Kind::Leaf {
                num_leaves = 1;
            }
            if num_leaves != node_state.num_leaves || num_nodes != node_state.num_nodes {
                return Err(FromPicklableError::Malformed(
                    "stored subtree counts disagree with the traversal",
                ));
            }
            counts.push((num_leaves, num_nodes));

            traversal.push(Node {
                kind,
                arity: node_state.arity,
                node_data: node_state.node_data,
                node_entries: node_state.node_entries.map(Vec::into_boxed_slice),
                custom,
                num_leaves,
                num_nodes,
            });
        }

        if counts.len() != 1 {
            return Err(FromPicklableError::Malformed(
                "traversal does not form a single tree",
            ));
        }
        Ok(Self::from_parts(
            traversal,
            state.none_is_leaf,
            state.namespace.into_boxed_str(),
        ))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for TreeSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_picklable().serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for TreeSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = PicklableSpec::deserialize(deserializer)?;
        Self::from_picklable(state).map_err(serde::de::Error::custom)
    }
}
