//! Flattening and reconstruction of structured trees of dynamic values.
//!
//! ------------------------
//!
//! # Overview
//! Kindling takes an arbitrarily nested [`Value`] — tuples, lists, several flavors of
//! mappings, deques, named tuples, struct sequences, and user-registered container types —
//! and flattens it into the ordered sequence of its leaves plus a [`TreeSpec`]: a compact,
//! hashable descriptor of the tree's shape. The spec can then rebuild an isomorphic tree
//! from any replacement sequence of leaves, project deeper trees onto itself
//! ([`TreeSpec::flatten_up_to`]), splice other specs into its leaf slots
//! ([`TreeSpec::compose`]), or fold over the structure ([`TreeSpec::walk`]).
//!
//! ```rust
//! use kindling::{flatten, FlattenOptions, Value};
//!
//! let tree = Value::list(vec![
//!     Value::Int(1),
//!     Value::tuple(vec![Value::Int(2), Value::Int(3)]),
//! ]);
//! let (leaves, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
//! assert_eq!(leaves, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
//! assert_eq!(spec.to_string(), "PyTreeSpec([*, (*, *)])");
//! assert_eq!(spec.unflatten(leaves).unwrap(), tree);
//! ```
//!
//! # Representation
//! A [`TreeSpec`] is not a pointer tree: it is a flat array of nodes in post-order, each
//! carrying cumulative leaf/node counts for the subtree it roots. Equality is a single
//! linear scan, `children` is slicing, composition is concatenation with count rescaling,
//! and the persisted form ([`TreeSpec::to_picklable`]) is a direct dump of the array.
//!
//! # Custom container types
//! The set of container kinds is extensible through a process-wide registry: see
//! [`register_node`] and [`register_node_class`]. Registrations are scoped by a non-empty
//! namespace string so that independent libraries can flatten the same type differently.
//!
//! # Feature flags
//! - `serde` (**enabled by default**) — `Serialize`/`Deserialize` for [`TreeSpec`] (routed
//!   through its picklable state), [`Value`], and the path types. Serializing a spec whose
//!   custom auxiliary data contains an opaque payload fails at serialization time.

#![warn(
    rust_2018_idioms,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unused_qualifications,
    clippy::cast_lossless,
    clippy::checked_conversions,
    clippy::copy_iterator,
    clippy::explicit_iter_loop,
    clippy::explicit_into_iter_loop,
    clippy::map_unwrap_or,
    clippy::implicit_hasher,
    clippy::inefficient_to_string,
    clippy::items_after_statements,
    clippy::match_same_arms,
    clippy::match_wild_err_arm,
    clippy::mut_mut,
    clippy::needless_continue,
    clippy::option_option,
    clippy::range_plus_one,
    clippy::redundant_closure_for_method_calls,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::string_add_assign,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::used_underscore_binding
)]
#![deny(anonymous_parameters, bare_trait_objects)]

pub mod value;
pub use value::{
    Factory, Key, NamedTupleType, NodeType, OpaqueValue, PathEntry, StructSeqType, TreePath,
    Value,
};

pub mod registry;
pub use registry::{
    register_node, register_node_class, CustomNode, Kind, NodeParts, RegisterError, Registration,
    TypeRegistry,
};

pub mod treespec;
pub use treespec::{
    all_leaves, flatten, flatten_with_path, ComposeError, FlattenError, FlattenOptions,
    FlattenUpToError, FromPicklableError, NodeData, PicklableNode, PicklableSpec, TreeSpec,
    TupleError, UnflattenError, WalkError,
};

/// A prelude containing the most used items for safe glob-importing.
pub mod prelude {
    pub use crate::registry::{register_node, register_node_class, CustomNode};
    pub use crate::treespec::{all_leaves, flatten, flatten_with_path, FlattenOptions, TreeSpec};
    pub use crate::value::{Key, Value};
}

/// The type-erased error produced by user callbacks — every hook a registration installs
/// may fail, and the engines surface those failures unmodified.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The maximum depth of a tree accepted by the flattening engines.
///
/// Exceeding it is a hard, recoverable failure ([`FlattenError::DepthExceeded`]) that
/// produces no [`TreeSpec`]. Cyclic input is not supported and manifests as this error.
#[cfg(not(windows))]
pub const MAX_RECURSION_DEPTH: usize = 5000;
/// The maximum depth of a tree accepted by the flattening engines.
///
/// Exceeding it is a hard, recoverable failure ([`FlattenError::DepthExceeded`]) that
/// produces no [`TreeSpec`]. The limit is lower here because the default thread stack is
/// considerably smaller.
#[cfg(windows)]
pub const MAX_RECURSION_DEPTH: usize = 2500;
