//! Mapping keys and the total-order sort used to canonicalize dictionary entries.

use core::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
};

/// A key of a mapping container ([`Dict`], [`OrderedDict`], [`DefaultDict`]).
///
/// Keys carry their own equality and hashing (floats go by bit pattern, so `NaN` keys are
/// equal to themselves) and a *partial* natural ordering: integers and floats compare
/// numerically with each other, every other pair of distinct key types — and any pair
/// involving `NaN` or [`Key::None`] — is incomparable. Incomparability is what demotes a
/// key list to the next tier of [the total-order sort](sorted_key_indices).
///
/// [`Dict`]: crate::Value::Dict
/// [`OrderedDict`]: crate::Value::OrderedDict
/// [`DefaultDict`]: crate::Value::DefaultDict
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Key {
    /// The empty key.
    None,
    /// A boolean key.
    Bool(bool),
    /// A signed integer key.
    Int(i64),
    /// A floating-point key.
    Float(f64),
    /// A string key.
    Str(String),
    /// A byte-string key.
    Bytes(Vec<u8>),
    /// A composite key made of other keys.
    Tuple(Vec<Key>),
}

impl Key {
    /// Returns the name of the key's type, used as the primary criterion of the second
    /// sort tier.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(..) => "bool",
            Self::Int(..) => "int",
            Self::Float(..) => "float",
            Self::Str(..) => "str",
            Self::Bytes(..) => "bytes",
            Self::Tuple(..) => "tuple",
        }
    }

    /// Compares two keys in their natural order, returning `None` for incomparable pairs.
    ///
    /// Integers and floats form one numeric family; all other comparisons require both
    /// sides to be the same key type. Tuples compare lexicographically and are
    /// incomparable as soon as a decisive element pair is.
    pub fn natural_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Bytes(a), Self::Bytes(b)) => Some(a.cmp(b)),
            (Self::Tuple(a), Self::Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.natural_cmp(y)? {
                        Ordering::Equal => continue,
                        decisive => return Some(decisive),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Compares two keys by `(type_name, natural order)`, the second sort tier. `None`
    /// means the keys are of the same type yet still incomparable, which demotes the sort
    /// to insertion order.
    fn type_ordered_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.type_name().cmp(other.type_name()) {
            Ordering::Equal => self.natural_cmp(other),
            decisive => Some(decisive),
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::None => {}
            Self::Bool(x) => x.hash(state),
            Self::Int(x) => x.hash(state),
            Self::Float(x) => x.to_bits().hash(state),
            Self::Str(x) => x.hash(state),
            Self::Bytes(x) => x.hash(state),
            Self::Tuple(x) => x.hash(state),
        }
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(x) => write!(f, "{}", x),
            Self::Int(x) => write!(f, "{}", x),
            Self::Float(x) => write!(f, "{:?}", x),
            Self::Str(x) => write!(f, "'{}'", x.escape_debug()),
            Self::Bytes(x) => {
                f.write_str("b'")?;
                for byte in x {
                    write!(f, "{}", core::ascii::escape_default(*byte))?;
                }
                f.write_str("'")
            }
            Self::Tuple(x) => {
                f.write_str("(")?;
                for (i, key) in x.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", key)?;
                }
                if x.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<i64> for Key {
    fn from(x: i64) -> Self {
        Self::Int(x)
    }
}
impl From<bool> for Key {
    fn from(x: bool) -> Self {
        Self::Bool(x)
    }
}
impl From<f64> for Key {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}
impl From<&str> for Key {
    fn from(x: &str) -> Self {
        Self::Str(x.to_owned())
    }
}
impl From<String> for Key {
    fn from(x: String) -> Self {
        Self::Str(x)
    }
}

/// A stable insertion sort of `indices` by the keys they point at, bailing out on the
/// first incomparable pair it happens to consult. Like a host runtime raising mid-sort,
/// detection is best-effort: pairs the algorithm never compares cannot demote the tier.
fn try_sort_indices(
    indices: &mut [usize],
    keys: &[Key],
    cmp: impl Fn(&Key, &Key) -> Option<Ordering>,
) -> bool {
    for i in 1..indices.len() {
        let mut j = i;
        while j > 0 {
            match cmp(&keys[indices[j - 1]], &keys[indices[j]]) {
                Some(Ordering::Greater) => {
                    indices.swap(j - 1, j);
                    j -= 1;
                }
                Some(..) => break,
                None => return false,
            }
        }
    }
    true
}

/// Returns the permutation that puts `keys` into the canonical total order.
///
/// Three tiers, each applying to the key list as a whole:
/// 1. the natural order of [`Key::natural_cmp`];
/// 2. on any incomparable pair, `(type_name, key)` — so mixed-type key sets still sort
///    reproducibly;
/// 3. on a pair that is incomparable even then (same type, unorderable values, e.g.
///    `NaN`), the original insertion order.
pub fn sorted_key_indices(keys: &[Key]) -> Vec<usize> {
    let identity: Vec<usize> = (0..keys.len()).collect();

    let mut order = identity.clone();
    if try_sort_indices(&mut order, keys, Key::natural_cmp) {
        return order;
    }
    order.copy_from_slice(&identity);
    if try_sort_indices(&mut order, keys, Key::type_ordered_cmp) {
        return order;
    }
    identity
}

/// Returns `keys` reordered into the canonical total order.
pub fn sorted_keys(keys: &[Key]) -> Vec<Key> {
    sorted_key_indices(keys)
        .into_iter()
        .map(|i| keys[i].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_tier() {
        let keys = vec![Key::from("b"), Key::from("a"), Key::from("c")];
        assert_eq!(
            sorted_keys(&keys),
            vec![Key::from("a"), Key::from("b"), Key::from("c")],
        );
    }

    #[test]
    fn numeric_family_is_comparable() {
        let keys = vec![Key::Float(2.5), Key::Int(2), Key::Int(3)];
        assert_eq!(
            sorted_keys(&keys),
            vec![Key::Int(2), Key::Float(2.5), Key::Int(3)],
        );
    }

    #[test]
    fn mixed_types_fall_back_to_type_names() {
        // "int" < "str", so every integer sorts before every string.
        let keys = vec![Key::from("b"), Key::from(10_i64), Key::from("a"), Key::from(2_i64)];
        assert_eq!(
            sorted_keys(&keys),
            vec![Key::from(2_i64), Key::from(10_i64), Key::from("a"), Key::from("b")],
        );
    }

    #[test]
    fn unorderable_values_preserve_insertion_order() {
        let keys = vec![Key::Float(f64::NAN), Key::Float(1.0), Key::Float(f64::NAN)];
        assert_eq!(sorted_key_indices(&keys), vec![0, 1, 2]);
    }

    #[test]
    fn nan_keys_equal_themselves() {
        assert_eq!(Key::Float(f64::NAN), Key::Float(f64::NAN));
        assert_ne!(Key::Float(0.0), Key::Float(-0.0));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Key::from("a").to_string(), "'a'");
        assert_eq!(Key::from(42_i64).to_string(), "42");
        assert_eq!(Key::Float(1.0).to_string(), "1.0");
        assert_eq!(
            Key::Tuple(vec![Key::from(1_i64)]).to_string(),
            "(1,)",
        );
        assert_eq!(Key::Bytes(b"ab".to_vec()).to_string(), "b'ab'");
    }
}
