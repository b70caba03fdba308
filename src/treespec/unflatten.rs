//! The reconstruction engine: rebuilding a [`Value`] from a spec and a sequence of
//! leaves, and the generalized bottom-up fold over a spec.

use core::fmt::{self, Display, Formatter};

use smallvec::SmallVec;

use crate::registry::Kind;
use crate::treespec::{Node, NodeData, TreeSpec};
use crate::value::Value;
use crate::DynError;

/// The error type returned by [`TreeSpec::unflatten`].
#[derive(Debug)]
pub enum UnflattenError {
    /// The leaves iterable ran out before every leaf slot was filled.
    TooFewLeaves {
        /// How many leaves the spec requires.
        expected: usize,
        /// How many the iterable produced.
        got: usize,
    },
    /// The leaves iterable had elements left over after every leaf slot was filled.
    TooManyLeaves {
        /// How many leaves the spec requires.
        expected: usize,
    },
    /// A custom `from_iterable` callback failed; the error is passed through unmodified.
    Callback(DynError),
}

impl Display for UnflattenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewLeaves { expected, got } => {
                write!(f, "too few leaves: expected {}, got {}", expected, got)
            }
            Self::TooManyLeaves { expected } => {
                write!(f, "too many leaves: expected {}", expected)
            }
            Self::Callback(..) => f.write_str("a custom from_iterable callback failed"),
        }
    }
}
impl std::error::Error for UnflattenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Callback(inner) => Some(&**inner),
            _ => None,
        }
    }
}

/// The error type returned by [`TreeSpec::walk`].
#[derive(Debug)]
pub enum WalkError {
    /// The leaves iterable ran out before every leaf slot was filled.
    TooFewLeaves {
        /// How many leaves the spec requires.
        expected: usize,
        /// How many the iterable produced.
        got: usize,
    },
    /// The leaves iterable had elements left over after every leaf slot was filled.
    TooManyLeaves {
        /// How many leaves the spec requires.
        expected: usize,
    },
    /// A walk callback failed; the error is passed through unmodified.
    Callback(DynError),
}

impl Display for WalkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewLeaves { expected, got } => {
                write!(f, "too few leaves: expected {}, got {}", expected, got)
            }
            Self::TooManyLeaves { expected } => {
                write!(f, "too many leaves: expected {}", expected)
            }
            Self::Callback(..) => f.write_str("a walk callback failed"),
        }
    }
}
impl std::error::Error for WalkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Callback(inner) => Some(&**inner),
            _ => None,
        }
    }
}

/// Assembles a concrete container from a non-leaf node and its already-rebuilt children.
pub(crate) fn make_node(node: &Node, children: Vec<Value>) -> Result<Value, UnflattenError> {
    debug_assert_eq!(children.len(), node.arity, "node arity mismatch");
    Ok(match node.kind {
        Kind::Leaf => unreachable!("make_node is not implemented for leaves"),
        Kind::None => Value::None,
        Kind::Tuple => Value::Tuple(children),
        Kind::List => Value::List(children),
        Kind::Deque => match &node.node_data {
            Some(NodeData::MaxLen(maxlen)) => Value::Deque {
                items: children,
                maxlen: *maxlen,
            },
            _ => unreachable!("deque node without a maxlen"),
        },
        Kind::NamedTuple => match &node.node_data {
            Some(NodeData::NamedTuple(ty)) => Value::NamedTuple {
                ty: ty.clone(),
                items: children,
            },
            _ => unreachable!("namedtuple node without its type"),
        },
        Kind::StructSequence => match &node.node_data {
            Some(NodeData::StructSequence(ty)) => Value::StructSeq {
                ty: ty.clone(),
                items: children,
            },
            _ => unreachable!("struct sequence node without its type"),
        },
        // Keys are reinserted in the stored order: sorted for Dict/DefaultDict,
        // insertion order for OrderedDict.
        Kind::Dict => match &node.node_data {
            Some(NodeData::Keys(keys)) => {
                debug_assert_eq!(keys.len(), node.arity, "key count mismatch");
                Value::Dict(keys.iter().cloned().zip(children).collect())
            }
            _ => unreachable!("dict node without keys"),
        },
        Kind::OrderedDict => match &node.node_data {
            Some(NodeData::Keys(keys)) => {
                debug_assert_eq!(keys.len(), node.arity, "key count mismatch");
                Value::OrderedDict(keys.iter().cloned().zip(children).collect())
            }
            _ => unreachable!("ordered dict node without keys"),
        },
        Kind::DefaultDict => match &node.node_data {
            Some(NodeData::DefaultDict { factory, keys }) => {
                debug_assert_eq!(keys.len(), node.arity, "key count mismatch");
                Value::DefaultDict {
                    factory: factory.clone(),
                    entries: keys.iter().cloned().zip(children).collect(),
                }
            }
            _ => unreachable!("defaultdict node without its data"),
        },
        Kind::Custom => {
            let registration = node
                .custom
                .as_ref()
                .expect("custom node without a registration");
            let aux = match &node.node_data {
                Some(NodeData::Custom(aux)) => aux,
                _ => unreachable!("custom node without auxiliary data"),
            };
            registration
                .rebuild(aux, children)
                .map_err(UnflattenError::Callback)?
        }
    })
}

impl TreeSpec {
    /// Reconstructs a tree from the leaves, walking the traversal with an explicit
    /// stack.
    ///
    /// # Errors
    /// Fails if the iterable yields fewer or more than [`num_leaves`](Self::num_leaves)
    /// leaves, or a custom `from_iterable` callback fails.
    ///
    /// # Example
    /// ```rust
    /// use kindling::{flatten, FlattenOptions, Value};
    ///
    /// let tree = Value::tuple(vec![Value::Int(1), Value::list(vec![Value::Int(2)])]);
    /// let (leaves, spec) = flatten(&tree, &FlattenOptions::default()).unwrap();
    /// // Rebuild with fresh leaves: same shape, new contents.
    /// let rebuilt = spec.unflatten(vec![Value::Int(10), Value::Int(20)]).unwrap();
    /// assert_eq!(
    ///     rebuilt,
    ///     Value::tuple(vec![Value::Int(10), Value::list(vec![Value::Int(20)])]),
    /// );
    /// ```
    pub fn unflatten<I>(&self, leaves: I) -> Result<Value, UnflattenError>
    where
        I: IntoIterator<Item = Value>,
    {
        let expected = self.num_leaves();
        let mut leaves = leaves.into_iter();
        let mut taken = 0_usize;
        let mut agenda: SmallVec<[Value; 8]> = SmallVec::new();

        for node in &self.traversal {
            if node.kind == Kind::Leaf {
                let leaf = leaves
                    .next()
                    .ok_or(UnflattenError::TooFewLeaves {
                        expected,
                        got: taken,
                    })?;
                taken += 1;
                agenda.push(leaf);
            } else {
                debug_assert!(agenda.len() >= node.arity, "too few values for container");
                let children: Vec<Value> = agenda.drain(agenda.len() - node.arity..).collect();
                agenda.push(make_node(node, children)?);
            }
        }
        if leaves.next().is_some() {
            return Err(UnflattenError::TooManyLeaves { expected });
        }

        debug_assert_eq!(agenda.len(), 1, "unflatten did not yield a single value");
        Ok(agenda.pop().expect("unflatten yielded no value"))
    }

    /// Folds over the tree structure bottom-up, producing one value.
    ///
    /// Each leaf consumes one element of `leaves`, passed through `f_leaf` when one is
    /// given. Each interior node — `None` nodes included — pops its children's partial
    /// results and becomes `f_node(children, node_data)`.
    ///
    /// # Errors
    /// Fails if the iterable yields fewer or more than [`num_leaves`](Self::num_leaves)
    /// elements, or a callback fails.
    pub fn walk<T, I>(
        &self,
        f_node: &mut dyn FnMut(Vec<T>, Option<&NodeData>) -> Result<T, DynError>,
        mut f_leaf: Option<&mut dyn FnMut(T) -> Result<T, DynError>>,
        leaves: I,
    ) -> Result<T, WalkError>
    where
        I: IntoIterator<Item = T>,
    {
        let expected = self.num_leaves();
        let mut leaves = leaves.into_iter();
        let mut taken = 0_usize;
        let mut agenda: Vec<T> = Vec::new();

        for node in &self.traversal {
            if node.kind == Kind::Leaf {
                let leaf = leaves
                    .next()
                    .ok_or(WalkError::TooFewLeaves {
                        expected,
                        got: taken,
                    })?;
                taken += 1;
                let leaf = match f_leaf.as_mut() {
                    Some(f_leaf) => f_leaf(leaf).map_err(WalkError::Callback)?,
                    None => leaf,
                };
                agenda.push(leaf);
            } else {
                debug_assert!(agenda.len() >= node.arity, "too few values for container");
                let children = agenda.split_off(agenda.len() - node.arity);
                let folded =
                    f_node(children, node.node_data.as_ref()).map_err(WalkError::Callback)?;
                agenda.push(folded);
            }
        }
        if leaves.next().is_some() {
            return Err(WalkError::TooManyLeaves { expected });
        }

        debug_assert_eq!(agenda.len(), 1, "walk did not yield a single value");
        Ok(agenda.pop().expect("walk yielded no value"))
    }
}
