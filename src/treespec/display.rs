//! The human-readable string form of a [`TreeSpec`].

use core::fmt::{self, Debug, Display, Formatter, Write};

use crate::registry::Kind;
use crate::treespec::{NodeData, TreeSpec};

impl TreeSpec {
    /// Renders the tree structure with `*` at the leaf slots, using each container
    /// kind's native textual conventions.
    fn write_structure(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut agenda: Vec<String> = Vec::new();
        for node in &self.traversal {
            debug_assert!(agenda.len() >= node.arity, "too few elements for container");
            let children = agenda.split_off(agenda.len() - node.arity);
            let mut repr = String::new();
            match node.kind {
                Kind::Leaf => {
                    agenda.push("*".to_owned());
                    continue;
                }
                Kind::None => repr.push_str("None"),
                Kind::Tuple => {
                    repr.push('(');
                    repr.push_str(&children.join(", "));
                    // A singleton tuple carries a trailing comma.
                    if node.arity == 1 {
                        repr.push(',');
                    }
                    repr.push(')');
                }
                Kind::List => {
                    repr.push('[');
                    repr.push_str(&children.join(", "));
                    repr.push(']');
                }
                Kind::Deque => {
                    let maxlen = match &node.node_data {
                        Some(NodeData::MaxLen(maxlen)) => maxlen,
                        _ => unreachable!("deque node without a maxlen"),
                    };
                    repr.push_str("deque([");
                    repr.push_str(&children.join(", "));
                    repr.push(']');
                    if let Some(maxlen) = maxlen {
                        write!(repr, ", maxlen={}", maxlen).expect("infallible write");
                    }
                    repr.push(')');
                }
                Kind::Dict => {
                    let keys = match &node.node_data {
                        Some(NodeData::Keys(keys)) => keys,
                        _ => unreachable!("dict node without keys"),
                    };
                    debug_assert_eq!(keys.len(), node.arity, "key count mismatch");
                    repr.push('{');
                    for (i, (key, child)) in keys.iter().zip(&children).enumerate() {
                        if i > 0 {
                            repr.push_str(", ");
                        }
                        write!(repr, "{}: {}", key, child).expect("infallible write");
                    }
                    repr.push('}');
                }
                Kind::OrderedDict => {
                    let keys = match &node.node_data {
                        Some(NodeData::Keys(keys)) => keys,
                        _ => unreachable!("ordered dict node without keys"),
                    };
                    debug_assert_eq!(keys.len(), node.arity, "key count mismatch");
                    repr.push_str("OrderedDict([");
                    for (i, (key, child)) in keys.iter().zip(&children).enumerate() {
                        if i > 0 {
                            repr.push_str(", ");
                        }
                        write!(repr, "({}, {})", key, child).expect("infallible write");
                    }
                    repr.push_str("])");
                }
                Kind::DefaultDict => {
                    let (factory, keys) = match &node.node_data {
                        Some(NodeData::DefaultDict { factory, keys }) => (factory, keys),
                        _ => unreachable!("defaultdict node without its data"),
                    };
                    debug_assert_eq!(keys.len(), node.arity, "key count mismatch");
                    repr.push_str("defaultdict(");
                    match factory {
                        Some(factory) => {
                            write!(repr, "{}", factory).expect("infallible write");
                        }
                        None => repr.push_str("None"),
                    }
                    repr.push_str(", {");
                    for (i, (key, child)) in keys.iter().zip(&children).enumerate() {
                        if i > 0 {
                            repr.push_str(", ");
                        }
                        write!(repr, "{}: {}", key, child).expect("infallible write");
                    }
                    repr.push_str("})");
                }
                Kind::NamedTuple => {
                    let ty = match &node.node_data {
                        Some(NodeData::NamedTuple(ty)) => ty,
                        _ => unreachable!("namedtuple node without its type"),
                    };
                    debug_assert_eq!(ty.fields().len(), node.arity, "field count mismatch");
                    write!(repr, "{}(", ty.name()).expect("infallible write");
                    for (i, (field, child)) in ty.fields().iter().zip(&children).enumerate() {
                        if i > 0 {
                            repr.push_str(", ");
                        }
                        write!(repr, "{}={}", field, child).expect("infallible write");
                    }
                    repr.push(')');
                }
                Kind::StructSequence => {
                    let ty = match &node.node_data {
                        Some(NodeData::StructSequence(ty)) => ty,
                        _ => unreachable!("struct sequence node without its type"),
                    };
                    debug_assert_eq!(ty.fields().len(), node.arity, "field count mismatch");
                    write!(repr, "{}(", ty.name()).expect("infallible write");
                    for (i, (field, child)) in ty.fields().iter().zip(&children).enumerate() {
                        if i > 0 {
                            repr.push_str(", ");
                        }
                        write!(repr, "{}={}", field, child).expect("infallible write");
                    }
                    repr.push(')');
                }
                Kind::Custom => {
                    let registration = node
                        .custom
                        .as_ref()
                        .expect("custom node without a registration");
                    let aux = match &node.node_data {
                        Some(NodeData::Custom(aux)) => aux,
                        _ => unreachable!("custom node without auxiliary data"),
                    };
                    let name = registration
                        .type_name()
                        .rsplit("::")
                        .next()
                        .expect("rsplit yields at least one segment");
                    write!(
                        repr,
                        "CustomTreeNode({}[{:?}], [{}])",
                        name,
                        aux,
                        children.join(", "),
                    )
                    .expect("infallible write");
                }
            }
            agenda.push(repr);
        }

        debug_assert_eq!(agenda.len(), 1, "traversal did not yield a singleton");
        f.write_str(&agenda.pop().expect("traversal yielded no representation"))
    }
}

impl Display for TreeSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("PyTreeSpec(")?;
        self.write_structure(f)?;
        if self.none_is_leaf {
            f.write_str(", NoneIsLeaf")?;
        }
        if !self.namespace.is_empty() {
            write!(f, ", namespace='{}'", self.namespace.escape_debug())?;
        }
        f.write_str(")")
    }
}

impl Debug for TreeSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}
