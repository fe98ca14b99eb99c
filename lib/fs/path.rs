//! Path to table name.
//!
//! The mount has exactly one directory. Everything below the root is addressed by its final path
//! component alone; any directories a caller puts in front of it are ignored.

const SEPARATOR: char = '/';

/// Result of resolving a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolved<'a> {
    /// The mount root.
    Root,
    /// A table, named by the last path component. May be empty (e.g. for `"/users/"`), which
    /// never names a table.
    Table(&'a str),
}

impl<'a> Resolved<'a> {
    /// Whether the path named the root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }

    /// The table name, if the path did not name the root.
    #[must_use]
    pub fn table_name(&self) -> Option<&'a str> {
        match self {
            Self::Root => None,
            Self::Table(name) => Some(name),
        }
    }
}

/// Resolves `path` in the flat namespace.
#[must_use]
pub fn resolve(path: &str) -> Resolved<'_> {
    if path == "/" {
        return Resolved::Root;
    }
    match path.rfind(SEPARATOR) {
        Some(idx) => Resolved::Table(&path[idx + SEPARATOR.len_utf8()..]),
        None => Resolved::Table(path),
    }
}
