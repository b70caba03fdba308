//! Paths from the root of a tree down to its leaves and subtrees.

use core::fmt::{self, Display, Formatter};

use crate::value::Key;

/// One step of a [`TreePath`]: how a child is reached from its parent container.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PathEntry {
    /// Positional access into a sequence container.
    Index(usize),
    /// Keyed access into a mapping container.
    Key(Key),
}

impl Display for PathEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "[{}]", i),
            Self::Key(key) => write!(f, "[{}]", key),
        }
    }
}

/// A path from the root of a tree to one of its nodes, as recorded by
/// [`flatten_with_path`](crate::flatten_with_path) and carried by structural-mismatch
/// errors.
///
/// Renders as chained subscripts, e.g. `[0]['weight']`; the empty path renders as
/// `tree root`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreePath(Vec<PathEntry>);

impl TreePath {
    /// The empty path, pointing at the root itself.
    #[inline]
    pub fn root() -> Self {
        Self(Vec::new())
    }
    /// The entries of the path, outermost first.
    #[inline]
    pub fn entries(&self) -> &[PathEntry] {
        &self.0
    }
    /// Returns `true` if the path points at the root.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub(crate) fn push(&mut self, entry: PathEntry) {
        self.0.push(entry);
    }
    #[inline]
    pub(crate) fn pop(&mut self) {
        self.0.pop();
    }
}

impl From<Vec<PathEntry>> for TreePath {
    fn from(entries: Vec<PathEntry>) -> Self {
        Self(entries)
    }
}

impl Display for TreePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("tree root");
        }
        for entry in &self.0 {
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}
