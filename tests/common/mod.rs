#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use dbfs::fs::DbFs;
use dbfs::snapshot::{Entry, EntryMeta, RowEncoder, Snapshot};
use dbfs::source::{DataSource, SourceError};

pub const OWNER: (u32, u32) = (1000, 1000);

pub const USERS_TWO_ROWS: &str = "1;alice;\n2;bob;\n";
pub const USERS_THREE_ROWS: &str = "1;alice;\n2;bob;\n3;carol;\n";

type Row = Vec<Option<String>>;

#[derive(Debug, Clone)]
struct MockTable {
    owner: String,
    rows: Vec<Row>,
}

/// In-memory [`DataSource`] with settable tables, failure injection and a load counter.
#[derive(Debug, Default)]
pub struct MockSource {
    tables: Mutex<BTreeMap<String, MockTable>>,
    fail: AtomicBool,
    loads: AtomicUsize,
    delay: Mutex<Duration>,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sets a table from `"a;b;\nc;d;\n"`-style text. Empty fields become NULL.
    pub fn set_table(&self, owner: &str, name: &str, text: &str) {
        let rows = text
            .lines()
            .map(|line| {
                let line = line.strip_suffix(';').unwrap_or(line);
                if line.is_empty() {
                    return Vec::new();
                }
                line.split(';')
                    .map(|f| (!f.is_empty()).then(|| f.to_owned()))
                    .collect()
            })
            .collect();
        self.set_rows(owner, name, rows);
    }

    pub fn set_rows(&self, owner: &str, name: &str, rows: Vec<Row>) {
        self.tables.lock().unwrap().insert(
            name.to_owned(),
            MockTable {
                owner: owner.to_owned(),
                rows,
            },
        );
    }

    pub fn drop_table(&self, name: &str) {
        self.tables.lock().unwrap().remove(name);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Makes every load block its thread for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn build<'a>(
        &self,
        select: impl Fn(&str, &MockTable) -> bool,
        required: impl IntoIterator<Item = &'a String>,
    ) -> Result<Snapshot, SourceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("injected failure".to_owned()));
        }

        let tables = self.tables.lock().unwrap();
        for name in required {
            if !tables.contains_key(name) {
                return Err(SourceError::Unavailable(format!(
                    "relation \"{name}\" does not exist"
                )));
            }
        }

        let now = SystemTime::now();
        Ok(tables
            .iter()
            .filter(|(name, table)| select(name, table))
            .map(|(name, table)| {
                let mut encoder = RowEncoder::new();
                for row in &table.rows {
                    encoder.push_row(row.iter().map(Option::as_deref));
                }
                let (rows, content) = encoder.finish();
                Entry::new(
                    name.clone(),
                    rows,
                    content,
                    EntryMeta::table_file(OWNER.0, OWNER.1, now),
                )
            })
            .collect())
    }
}

impl DataSource for MockSource {
    fn load_by_owner(
        &self,
        owner: &str,
    ) -> impl Future<Output = Result<Snapshot, SourceError>> + Send {
        let result = if owner.is_empty() {
            Err(SourceError::EmptyOwner)
        } else {
            self.build(|_, table| table.owner == owner, [])
        };
        std::future::ready(result)
    }

    fn load_by_list(
        &self,
        names: &[String],
    ) -> impl Future<Output = Result<Snapshot, SourceError>> + Send {
        std::future::ready(self.build(|name, _| names.iter().any(|n| n == name), names))
    }
}

/// A single-table snapshot with the given content.
pub fn snapshot_of(tables: &[(&str, &str)]) -> Snapshot {
    let now = SystemTime::now();
    tables
        .iter()
        .map(|(name, content)| {
            Entry::new(
                *name,
                content.lines().count() as u64,
                Bytes::copy_from_slice(content.as_bytes()),
                EntryMeta::table_file(OWNER.0, OWNER.1, now),
            )
        })
        .collect()
}

/// A filesystem serving `tables`.
pub fn fs_with(tables: &[(&str, &str)]) -> Arc<DbFs> {
    Arc::new(DbFs::new(snapshot_of(tables), OWNER))
}

/// Names listed under the root, without `.` and `..`.
pub fn table_names(fs: &DbFs) -> Vec<String> {
    fs.list("/")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .filter(|n| n != "." && n != "..")
        .collect()
}

/// The whole content of a table as a string.
pub fn read_all(fs: &DbFs, path: &str) -> String {
    let data = fs.read(path, 0, usize::MAX).unwrap();
    String::from_utf8(data.to_vec()).unwrap()
}

/// Polls `cond` until it holds, or panics after a second.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("{what} did not happen within 1 second");
}
