//! Materialized table content.
//!
//! An [`Entry`] is one table rendered as a flat file; a [`Snapshot`] is the complete set of
//! entries the filesystem serves at one point in time. Both are immutable: a snapshot is assembled
//! with a [`SnapshotBuilder`] away from readers, published as a whole through
//! [`SnapshotStore`](store::SnapshotStore), and never edited afterwards.

/// Row serialization.
pub mod encode;
/// The published-snapshot holder.
pub mod store;

pub use encode::RowEncoder;
pub use store::{SnapshotHandle, SnapshotStore};

use std::collections::BTreeMap;
use std::time::SystemTime;

use bytes::Bytes;

use crate::fs::InodePerms;

/// File metadata reported for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryMeta {
    /// Permission bits.
    pub perm: InodePerms,
    /// Owning user.
    pub uid: u32,
    /// Owning group.
    pub gid: u32,
    /// Hard link count.
    pub nlink: u32,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
}

impl EntryMeta {
    /// Metadata for a freshly loaded table: read-only for everyone, all timestamps at `loaded_at`.
    #[must_use]
    pub fn table_file(uid: u32, gid: u32, loaded_at: SystemTime) -> Self {
        Self {
            perm: InodePerms::OWNER_READ | InodePerms::GROUP_READ | InodePerms::OTHER_READ,
            uid,
            gid,
            nlink: 2,
            atime: loaded_at,
            mtime: loaded_at,
            ctime: loaded_at,
        }
    }
}

/// One table's cached content and metadata.
///
/// The size is always the content length; there is no separate field to fall out of sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    name: String,
    row_count: u64,
    content: Bytes,
    meta: EntryMeta,
}

impl Entry {
    /// Creates an entry. `name` becomes the file name under the mount root.
    #[must_use]
    pub fn new(name: impl Into<String>, row_count: u64, content: Bytes, meta: EntryMeta) -> Self {
        Self {
            name: name.into(),
            row_count,
            content,
            meta,
        }
    }

    /// The table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of rows serialized into the content.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// The serialized rows.
    #[must_use]
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// File size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    /// File metadata.
    #[must_use]
    pub fn meta(&self) -> &EntryMeta {
        &self.meta
    }
}

/// An immutable mapping from table name to [`Entry`].
///
/// Iteration is ordered by name, so two listings of the same snapshot are identical.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: BTreeMap<String, Entry>,
    created_at: SystemTime,
}

impl Snapshot {
    /// A snapshot with no tables.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            created_at: SystemTime::now(),
        }
    }

    /// Starts assembling a new snapshot.
    #[must_use]
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    /// Looks up a table by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Whether a table with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Table names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all content sizes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(Entry::size).sum()
    }

    /// When the snapshot was built.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Collects entries for a [`Snapshot`] that nobody can see yet.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    entries: BTreeMap<String, Entry>,
}

impl SnapshotBuilder {
    /// Adds an entry, replacing any earlier entry with the same name.
    pub fn insert(&mut self, entry: Entry) -> &mut Self {
        self.entries.insert(entry.name.clone(), entry);
        self
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, entry: Entry) -> Self {
        self.insert(entry);
        self
    }

    /// Number of entries collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Seals the snapshot.
    #[must_use]
    pub fn build(self) -> Snapshot {
        Snapshot {
            entries: self.entries,
            created_at: SystemTime::now(),
        }
    }
}

impl FromIterator<Entry> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        let mut builder = Snapshot::builder();
        for entry in iter {
            builder.insert(entry);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, content: &'static str) -> Entry {
        Entry::new(
            name,
            1,
            Bytes::from_static(content.as_bytes()),
            EntryMeta::table_file(0, 0, SystemTime::UNIX_EPOCH),
        )
    }

    #[test]
    fn size_tracks_content_length() {
        let e = entry("users", "1;alice;\n2;bob;\n");
        assert_eq!(e.size(), 16);
        assert_eq!(e.size(), e.content().len() as u64);
    }

    #[test]
    fn later_insert_replaces_same_name() {
        let snapshot = Snapshot::builder()
            .with(entry("users", "old\n"))
            .with(entry("users", "newer\n"))
            .build();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.get("users").map(|e| e.content().as_ref()),
            Some(b"newer\n".as_ref())
        );
    }

    #[test]
    fn names_are_sorted() {
        let snapshot: Snapshot = [entry("b", ""), entry("c", ""), entry("a", "")]
            .into_iter()
            .collect();
        assert_eq!(snapshot.names().collect::<Vec<_>>(), ["a", "b", "c"]);
    }

    #[test]
    fn table_file_is_read_only() {
        let meta = EntryMeta::table_file(10, 20, SystemTime::UNIX_EPOCH);
        assert_eq!(meta.perm.bits(), 0o444);
        assert_eq!(meta.nlink, 2);
        assert_eq!((meta.uid, meta.gid), (10, 20));
    }
}
