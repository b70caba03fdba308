//! The classification of values into node kinds and the process-wide registry of custom
//! container types.
//!
//! The module is home to the following items:
//! - [`Kind`] — the closed enumeration of node kinds
//! - [`TypeRegistry`] — the `(type, namespace)`-keyed registration table, with built-in
//!   container types pre-seeded under the global (empty) namespace
//! - [`Registration`] and [`NodeParts`] — what a custom registration is and what its
//!   `to_iterable` callback produces
//! - [`register_node`] and [`register_node_class`] — the two ways of extending the set of
//!   container types, the latter via the [`CustomNode`] trait
//!
//! Lookups try `(type, namespace)` first and fall back to `(type, "")`, so a custom
//! registration is only visible to flatten calls made with its namespace. Registrations
//! are additive: there is no way to unregister a type, which is what lets every
//! [`TreeSpec`](crate::TreeSpec) hold on to its registrations for the life of the
//! process.

use core::any::{Any, TypeId};
use core::fmt::{self, Debug, Display, Formatter};
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::value::{PathEntry, Value};
use crate::DynError;

/// The kind of one node of a tree: the closed classification of container roles.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    /// An opaque value which is not descended into.
    Leaf = 0,
    /// The empty value, a container with no children.
    None = 1,
    /// A fixed-arity heterogeneous sequence.
    Tuple = 2,
    /// A variable-length sequence.
    List = 3,
    /// A mapping flattened in sorted-key order.
    Dict = 4,
    /// A mapping flattened in insertion order.
    OrderedDict = 5,
    /// A mapping with a default factory, flattened in sorted-key order.
    DefaultDict = 6,
    /// A double-ended queue.
    Deque = 7,
    /// An instance of a concrete named-tuple type.
    NamedTuple = 8,
    /// An instance of a concrete struct-sequence type.
    StructSequence = 9,
    /// An instance of a registered custom container type.
    Custom = 10,
}

impl Kind {
    #[inline]
    pub(crate) fn to_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Leaf,
            1 => Self::None,
            2 => Self::Tuple,
            3 => Self::List,
            4 => Self::Dict,
            5 => Self::OrderedDict,
            6 => Self::DefaultDict,
            7 => Self::Deque,
            8 => Self::NamedTuple,
            9 => Self::StructSequence,
            10 => Self::Custom,
            _ => return None,
        })
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Leaf => "leaf",
            Self::None => "None",
            Self::Tuple => "tuple",
            Self::List => "list",
            Self::Dict => "dict",
            Self::OrderedDict => "OrderedDict",
            Self::DefaultDict => "defaultdict",
            Self::Deque => "deque",
            Self::NamedTuple => "namedtuple",
            Self::StructSequence => "struct sequence",
            Self::Custom => "custom type",
        })
    }
}

/// What a custom registration's `to_iterable` callback returns: the direct children of
/// the value, auxiliary data to store in the spec and hand back on reconstruction, and
/// optionally one path entry per child.
///
/// When `entries` is absent, children are addressed positionally (`[0]`, `[1]`, …) in
/// recorded paths.
#[derive(Debug)]
pub struct NodeParts {
    /// The direct children, in the order they should be flattened.
    pub children: Vec<Value>,
    /// Auxiliary data describing everything about the node that the children don't.
    pub aux: Value,
    /// One path entry per child, if the container is not positionally addressed.
    pub entries: Option<Vec<PathEntry>>,
}

type FlattenFn = dyn Fn(&Value) -> Result<NodeParts, DynError> + Send + Sync;
type UnflattenFn = dyn Fn(&Value, Vec<Value>) -> Result<Value, DynError> + Send + Sync;

struct CustomOps {
    to_iterable: Box<FlattenFn>,
    from_iterable: Box<UnflattenFn>,
}

/// One row of the [`TypeRegistry`]: a type registered as an internal node of trees.
///
/// Built-in container types are pre-seeded rows carrying their native [`Kind`]; user
/// registrations always carry [`Kind::Custom`] plus the flatten/unflatten callbacks.
/// Custom nodes in a [`TreeSpec`](crate::TreeSpec) reference their registration by
/// [`Arc`] identity.
pub struct Registration {
    kind: Kind,
    type_id: TypeId,
    type_name: &'static str,
    namespace: Box<str>,
    ops: Option<CustomOps>,
}

impl Registration {
    /// The kind values of this type classify as.
    #[inline]
    pub fn kind(&self) -> Kind {
        self.kind
    }
    /// The name of the registered type.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
    /// The namespace the type was registered under; empty for the built-ins.
    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Splits a value of the registered type into children and auxiliary data.
    pub(crate) fn flatten_value(&self, value: &Value) -> Result<NodeParts, DynError> {
        let ops = self
            .ops
            .as_ref()
            .expect("flatten_value called on a built-in registration");
        (ops.to_iterable)(value)
    }

    /// Reassembles a value of the registered type from auxiliary data and children.
    pub(crate) fn rebuild(&self, aux: &Value, children: Vec<Value>) -> Result<Value, DynError> {
        let ops = self
            .ops
            .as_ref()
            .expect("rebuild called on a built-in registration");
        (ops.from_iterable)(aux, children)
    }
}

impl Debug for Registration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("kind", &self.kind)
            .field("type_name", &self.type_name)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// The error type returned by [`register_node`] and [`register_node_class`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegisterError {
    /// User registrations require a non-empty namespace; the global namespace belongs to
    /// the built-ins.
    EmptyNamespace,
    /// The `(type, namespace)` pair is already registered.
    Duplicate {
        /// The name of the offending type.
        type_name: &'static str,
        /// The namespace the duplicate registration was attempted in.
        namespace: Box<str>,
    },
}

impl Display for RegisterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyNamespace => f.write_str("the namespace cannot be an empty string"),
            Self::Duplicate {
                type_name,
                namespace,
            } => write!(
                f,
                "type `{}` is already registered in namespace '{}'",
                type_name, namespace,
            ),
        }
    }
}
impl std::error::Error for RegisterError {}

/// A container type registered through its own methods rather than free-standing
/// callbacks; see [`register_node_class`].
pub trait CustomNode: Any + PartialEq + Debug + Send + Sync + Sized {
    /// Splits the value into its children, auxiliary data, and optional path entries.
    fn tree_flatten(&self) -> Result<NodeParts, DynError>;
    /// Reassembles a value from the auxiliary data and the children.
    fn tree_unflatten(aux: &Value, children: Vec<Value>) -> Result<Self, DynError>;
}

/// The error produced when a registered callback receives a value of the wrong type,
/// which can only happen if the same `TypeId` was somehow registered with mismatched
/// callbacks.
#[derive(Copy, Clone, Debug)]
struct NotAnInstanceError {
    expected: &'static str,
}
impl Display for NotAnInstanceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "expected an instance of `{}`", self.expected)
    }
}
impl std::error::Error for NotAnInstanceError {}

// Marker types giving the built-in container kinds stable registry identities. They are
// private: built-in behavior cannot be shadowed from a user namespace.
struct NoneMarker;
struct TupleMarker;
struct ListMarker;
struct DictMarker;
struct OrderedDictMarker;
struct DefaultDictMarker;
struct DequeMarker;

/// Returns the registry identity of a value's type, or `None` for values whose types are
/// runtime descriptors rather than host types (named tuples and struct sequences).
fn value_type_id(value: &Value) -> Option<TypeId> {
    Some(match value {
        Value::None => TypeId::of::<NoneMarker>(),
        Value::Bool(..) => TypeId::of::<bool>(),
        Value::Int(..) => TypeId::of::<i64>(),
        Value::Float(..) => TypeId::of::<f64>(),
        Value::Str(..) => TypeId::of::<String>(),
        Value::Bytes(..) => TypeId::of::<Vec<u8>>(),
        Value::Tuple(..) => TypeId::of::<TupleMarker>(),
        Value::List(..) => TypeId::of::<ListMarker>(),
        Value::Dict(..) => TypeId::of::<DictMarker>(),
        Value::OrderedDict(..) => TypeId::of::<OrderedDictMarker>(),
        Value::DefaultDict { .. } => TypeId::of::<DefaultDictMarker>(),
        Value::Deque { .. } => TypeId::of::<DequeMarker>(),
        Value::NamedTuple { .. } | Value::StructSeq { .. } => return None,
        Value::Opaque(opaque) => opaque.type_id(),
    })
}

/// The `(type, namespace)`-keyed table of container registrations.
///
/// A process-wide instance lives behind [`TypeRegistry::global`]; the flattening engines
/// work on cheap [snapshots](TypeRegistry::snapshot) of it, so a consistent view is
/// observed for the whole of each call and user callbacks may themselves register types
/// without deadlocking.
#[derive(Clone)]
pub struct TypeRegistry {
    by_type: HashMap<TypeId, HashMap<Box<str>, Arc<Registration>>>,
    by_name: HashMap<&'static str, HashMap<Box<str>, Arc<Registration>>>,
}

impl TypeRegistry {
    /// Creates a registry holding only the built-in container types.
    pub fn new() -> Self {
        let mut registry = Self {
            by_type: HashMap::new(),
            by_name: HashMap::new(),
        };
        registry.seed_builtin::<NoneMarker>(Kind::None, "NoneType");
        registry.seed_builtin::<TupleMarker>(Kind::Tuple, "tuple");
        registry.seed_builtin::<ListMarker>(Kind::List, "list");
        registry.seed_builtin::<DictMarker>(Kind::Dict, "dict");
        registry.seed_builtin::<OrderedDictMarker>(Kind::OrderedDict, "OrderedDict");
        registry.seed_builtin::<DefaultDictMarker>(Kind::DefaultDict, "defaultdict");
        registry.seed_builtin::<DequeMarker>(Kind::Deque, "deque");
        registry
    }

    fn seed_builtin<M: Any>(&mut self, kind: Kind, type_name: &'static str) {
        let registration = Arc::new(Registration {
            kind,
            type_id: TypeId::of::<M>(),
            type_name,
            namespace: Box::from(""),
            ops: None,
        });
        self.insert(registration);
    }

    fn insert(&mut self, registration: Arc<Registration>) {
        self.by_type
            .entry(registration.type_id)
            .or_default()
            .insert(registration.namespace.clone(), Arc::clone(&registration));
        self.by_name
            .entry(registration.type_name)
            .or_default()
            .insert(registration.namespace.clone(), registration);
    }

    /// The process-wide registry.
    pub fn global() -> &'static RwLock<Self> {
        static GLOBAL: Lazy<RwLock<TypeRegistry>> = Lazy::new(|| RwLock::new(TypeRegistry::new()));
        &GLOBAL
    }

    /// Clones the current state of the process-wide registry. Registrations are shared
    /// [`Arc`]s, so this is cheap.
    pub fn snapshot() -> Self {
        Self::global().read().clone()
    }

    /// Registers `T` as a custom container type in `namespace`.
    ///
    /// `to_iterable` splits a value of the type into [`NodeParts`]; `from_iterable`
    /// reassembles one from the stored auxiliary data and the children.
    ///
    /// # Errors
    /// Fails if the namespace is empty or the `(type, namespace)` pair is already
    /// registered.
    pub fn register<T, F, U>(
        &mut self,
        to_iterable: F,
        from_iterable: U,
        namespace: &str,
    ) -> Result<(), RegisterError>
    where
        T: Any,
        F: Fn(&Value) -> Result<NodeParts, DynError> + Send + Sync + 'static,
        U: Fn(&Value, Vec<Value>) -> Result<Value, DynError> + Send + Sync + 'static,
    {
        if namespace.is_empty() {
            return Err(RegisterError::EmptyNamespace);
        }
        let type_id = TypeId::of::<T>();
        let type_name = core::any::type_name::<T>();
        if self
            .by_type
            .get(&type_id)
            .map_or(false, |namespaces| namespaces.contains_key(namespace))
        {
            return Err(RegisterError::Duplicate {
                type_name,
                namespace: Box::from(namespace),
            });
        }
        self.insert(Arc::new(Registration {
            kind: Kind::Custom,
            type_id,
            type_name,
            namespace: Box::from(namespace),
            ops: Some(CustomOps {
                to_iterable: Box::new(to_iterable),
                from_iterable: Box::new(from_iterable),
            }),
        }));
        Ok(())
    }

    /// Registers a [`CustomNode`] implementor in `namespace`, deriving the callbacks from
    /// its trait methods.
    ///
    /// # Errors
    /// Fails if the namespace is empty or the `(type, namespace)` pair is already
    /// registered.
    pub fn register_class<T: CustomNode>(&mut self, namespace: &str) -> Result<(), RegisterError> {
        self.register::<T, _, _>(
            |value| {
                value
                    .downcast_ref::<T>()
                    .ok_or_else(|| {
                        Box::new(NotAnInstanceError {
                            expected: core::any::type_name::<T>(),
                        }) as DynError
                    })?
                    .tree_flatten()
            },
            |aux, children| T::tree_unflatten(aux, children).map(Value::opaque),
            namespace,
        )
    }

    /// Looks a type up, trying `(type, namespace)` first and `(type, "")` second.
    pub fn lookup(&self, type_id: TypeId, namespace: &str) -> Option<&Arc<Registration>> {
        let namespaces = self.by_type.get(&type_id)?;
        if !namespace.is_empty() {
            if let Some(found) = namespaces.get(namespace) {
                return Some(found);
            }
        }
        namespaces.get("")
    }

    /// Looks a type up by name, with the same namespace fallback as [`lookup`]. Used to
    /// re-resolve custom types when restoring a spec from its persisted form.
    ///
    /// [`lookup`]: Self::lookup
    pub fn lookup_by_name(&self, type_name: &str, namespace: &str) -> Option<&Arc<Registration>> {
        let namespaces = self.by_name.get(type_name)?;
        if !namespace.is_empty() {
            if let Some(found) = namespaces.get(namespace) {
                return Some(found);
            }
        }
        namespaces.get("")
    }

    /// Classifies a value into its node kind, resolving custom registrations under
    /// `namespace`. The returned registration is present exactly when the kind is
    /// [`Kind::Custom`].
    pub fn classify(
        &self,
        value: &Value,
        none_is_leaf: bool,
        namespace: &str,
    ) -> (Kind, Option<&Arc<Registration>>) {
        if let Value::None = value {
            return (if none_is_leaf { Kind::Leaf } else { Kind::None }, None);
        }
        if let Some(type_id) = value_type_id(value) {
            if let Some(registration) = self.lookup(type_id, namespace) {
                if registration.kind == Kind::Custom {
                    return (Kind::Custom, Some(registration));
                }
                return (registration.kind, None);
            }
        }
        match value {
            Value::NamedTuple { .. } => (Kind::NamedTuple, None),
            Value::StructSeq { .. } => (Kind::StructSequence, None),
            _ => (Kind::Leaf, None),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for TypeRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field(
                "registrations",
                &self.by_type.values().map(HashMap::len).sum::<usize>(),
            )
            .finish_non_exhaustive()
    }
}

/// Registers `T` as a custom container type in the process-wide registry.
///
/// This is the single mutation point of the registry. Registrations are additive and
/// scoped: a flatten call only sees the registration if it passes the same namespace.
///
/// # Errors
/// Fails if the namespace is empty or the `(type, namespace)` pair is already registered.
///
/// # Example
/// ```rust
/// use kindling::{register_node, flatten, FlattenOptions, NodeParts, Value};
///
/// #[derive(Debug, PartialEq)]
/// struct Pair(i64, i64);
///
/// register_node::<Pair, _, _>(
///     |value| {
///         let pair = value.downcast_ref::<Pair>().expect("registered for Pair");
///         Ok(NodeParts {
///             children: vec![Value::Int(pair.0), Value::Int(pair.1)],
///             aux: Value::None,
///             entries: None,
///         })
///     },
///     |_aux, children| {
///         let mut children = children.into_iter();
///         let (a, b) = (children.next().unwrap(), children.next().unwrap());
///         match (a, b) {
///             (Value::Int(a), Value::Int(b)) => Ok(Value::opaque(Pair(a, b))),
///             _ => Err("expected two integer children".into()),
///         }
///     },
///     "doc-pair",
/// )
/// .unwrap();
///
/// let options = FlattenOptions { namespace: "doc-pair", ..FlattenOptions::default() };
/// let (leaves, spec) = flatten(&Value::opaque(Pair(1, 2)), &options).unwrap();
/// assert_eq!(leaves, vec![Value::Int(1), Value::Int(2)]);
/// assert_eq!(spec.unflatten(leaves).unwrap(), Value::opaque(Pair(1, 2)));
/// ```
pub fn register_node<T, F, U>(
    to_iterable: F,
    from_iterable: U,
    namespace: &str,
) -> Result<(), RegisterError>
where
    T: Any,
    F: Fn(&Value) -> Result<NodeParts, DynError> + Send + Sync + 'static,
    U: Fn(&Value, Vec<Value>) -> Result<Value, DynError> + Send + Sync + 'static,
{
    TypeRegistry::global()
        .write()
        .register::<T, F, U>(to_iterable, from_iterable, namespace)
}

/// Registers a [`CustomNode`] implementor in the process-wide registry.
///
/// # Errors
/// Fails if the namespace is empty or the `(type, namespace)` pair is already registered.
pub fn register_node_class<T: CustomNode>(namespace: &str) -> Result<(), RegisterError> {
    TypeRegistry::global().write().register_class::<T>(namespace)
}
