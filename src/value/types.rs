//! Runtime type descriptors for the container kinds that carry a concrete type identity.

use core::fmt::{self, Debug, Display, Formatter};
use core::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::value::Value;

/// The runtime type of a named-tuple container: a type name plus an ordered tuple of
/// string field names.
///
/// Two descriptors with the same name and fields are the same type for every purpose in
/// this crate — spec equality, projection, and the persisted form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NamedTupleType {
    name: Box<str>,
    fields: Box<[Box<str>]>,
}

impl NamedTupleType {
    /// Creates a named-tuple type descriptor.
    pub fn new(name: impl Into<Box<str>>, fields: impl IntoIterator<Item = impl Into<Box<str>>>) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
    /// The name of the type.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The field names, in declaration order. One per child of a value of this type.
    #[inline]
    pub fn fields(&self) -> &[Box<str>] {
        &self.fields
    }
}

impl Display for NamedTupleType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The runtime type of a struct-sequence container: a tuple subtype with a fixed set of
/// named, sequence-visible fields and possibly further unnamed ones.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StructSeqType {
    name: Box<str>,
    fields: Box<[Box<str>]>,
    n_unnamed_fields: usize,
}

impl StructSeqType {
    /// Creates a struct-sequence type descriptor. `fields` are the sequence-visible
    /// named fields; `n_unnamed_fields` counts the fields not exposed by indexing.
    pub fn new(
        name: impl Into<Box<str>>,
        fields: impl IntoIterator<Item = impl Into<Box<str>>>,
        n_unnamed_fields: usize,
    ) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            n_unnamed_fields,
        }
    }
    /// The name of the type.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The sequence-visible field names, in declaration order.
    #[inline]
    pub fn fields(&self) -> &[Box<str>] {
        &self.fields
    }
    /// The number of fields exposed by indexing. Equals the arity of values of this type.
    #[inline]
    pub fn n_sequence_fields(&self) -> usize {
        self.fields.len()
    }
    /// The total number of fields, named and unnamed.
    #[inline]
    pub fn n_fields(&self) -> usize {
        self.fields.len() + self.n_unnamed_fields
    }
    /// The number of unnamed fields.
    #[inline]
    pub fn n_unnamed_fields(&self) -> usize {
        self.n_unnamed_fields
    }
}

impl Display for StructSeqType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The default factory of a [`DefaultDict`](crate::Value::DefaultDict).
///
/// The engine itself never invokes the factory: it is carried through flattening,
/// reconstruction, and the persisted form as metadata. Equality, hashing, and
/// serialization all go by name, so a spec survives a persistence round-trip even though
/// the closure does not.
#[derive(Clone)]
pub struct Factory {
    name: Box<str>,
    make: Option<Arc<dyn Fn() -> Value + Send + Sync>>,
}

impl Factory {
    /// Creates a factory with a producing closure.
    pub fn new(name: impl Into<Box<str>>, make: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            make: Some(Arc::new(make)),
        }
    }
    /// Creates a factory that only carries a name, e.g. one recovered from the persisted
    /// form.
    pub fn named(name: impl Into<Box<str>>) -> Self {
        Self {
            name: name.into(),
            make: None,
        }
    }
    /// The name of the factory.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Produces a default value, if this factory still carries its closure.
    #[inline]
    pub fn produce(&self) -> Option<Value> {
        self.make.as_ref().map(|make| make())
    }
}

impl PartialEq for Factory {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for Factory {}
impl Hash for Factory {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
impl Debug for Factory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Factory").field(&self.name).finish()
    }
}
impl Display for Factory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Factory {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}
#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Factory {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::named)
    }
}

/// The runtime type of the container at a [`TreeSpec`](crate::TreeSpec) root, as reported
/// by [`TreeSpec::node_type`](crate::TreeSpec::node_type).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// The type of the empty value.
    None,
    /// The tuple type.
    Tuple,
    /// The list type.
    List,
    /// The dictionary type.
    Dict,
    /// The insertion-ordered dictionary type.
    OrderedDict,
    /// The dictionary-with-default-factory type.
    DefaultDict,
    /// The double-ended queue type.
    Deque,
    /// A concrete named-tuple type.
    NamedTuple(Arc<NamedTupleType>),
    /// A concrete struct-sequence type.
    StructSequence(Arc<StructSeqType>),
    /// A registered custom type, identified by its type name.
    Custom(&'static str),
}

impl NodeType {
    /// Returns `true` if this is a named-tuple type.
    #[inline]
    pub fn is_namedtuple(&self) -> bool {
        matches!(self, Self::NamedTuple(..))
    }
    /// Returns `true` if this is a struct-sequence type.
    #[inline]
    pub fn is_structseq(&self) -> bool {
        matches!(self, Self::StructSequence(..))
    }
    /// The field names of a named-tuple or struct-sequence type, `None` for every other
    /// type.
    #[inline]
    pub fn fields(&self) -> Option<&[Box<str>]> {
        match self {
            Self::NamedTuple(ty) => Some(ty.fields()),
            Self::StructSequence(ty) => Some(ty.fields()),
            _ => None,
        }
    }
}
