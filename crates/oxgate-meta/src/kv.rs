//! Wide-column store seam.
//!
//! The metadata store is modeled as a set of named tables whose rows are
//! binary keys mapping to `family -> qualifier -> bytes` cells, which is the
//! shape prefix scans and compare-and-set mutations need. [`MemoryKvStore`]
//! is the in-process implementation used by tests and single-node
//! deployments; production deployments plug a wire client into the same
//! [`KvStore`] trait.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::MetaError;

// ---------------------------------------------------------------------------
// Tables and cells
// ---------------------------------------------------------------------------

/// The fixed set of metadata tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Bucket rows keyed by bucket name.
    Buckets,
    /// Object version rows with compound binary keys.
    Objects,
    /// Null-version pointers keyed by (bucket, key).
    ObjMap,
    /// User rows keyed by user id.
    Users,
    /// In-progress multipart uploads.
    Multiparts,
    /// Orphan blob records awaiting reclamation.
    GarbageCollection,
    /// Blob cluster descriptors keyed by fsid.
    Cluster,
}

impl Table {
    /// All tables, used to pre-create table maps.
    pub const ALL: [Table; 7] = [
        Table::Buckets,
        Table::Objects,
        Table::ObjMap,
        Table::Users,
        Table::Multiparts,
        Table::GarbageCollection,
        Table::Cluster,
    ];

    /// The on-disk table name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Buckets => "buckets",
            Table::Objects => "objects",
            Table::ObjMap => "objmap",
            Table::Users => "users",
            Table::Multiparts => "multiparts",
            Table::GarbageCollection => "garbageCollection",
            Table::Cluster => "cluster",
        }
    }
}

/// Cell values of one row: `family -> qualifier -> value`.
pub type Cells = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// Build a [`Cells`] value with a single family from `(qualifier, value)`
/// pairs.
#[must_use]
pub fn cells_with_family(family: &str, pairs: Vec<(String, Vec<u8>)>) -> Cells {
    let mut cells = Cells::new();
    cells.insert(family.to_owned(), pairs.into_iter().collect());
    cells
}

/// Compute the tight exclusive upper bound for a prefix scan: the prefix
/// with its last byte incremented. Scanning `[prefix, stop_row)` visits
/// exactly the rows that start with `prefix`.
#[must_use]
pub fn scan_stop_row(prefix: &[u8]) -> Vec<u8> {
    let mut stop = prefix.to_vec();
    if let Some(last) = stop.last_mut() {
        *last = last.wrapping_add(1);
    }
    stop
}

// ---------------------------------------------------------------------------
// KvStore trait
// ---------------------------------------------------------------------------

/// Wide-column store operations the metadata adapter is built on.
///
/// `put` merges cells into an existing row. `scan` returns rows in byte
/// order of their keys, `start` inclusive, `stop` exclusive (an empty `stop`
/// means unbounded). `check_and_put` applies the put only when the current
/// value of `(family, qualifier)` equals `expected`; an empty `expected`
/// matches a missing or empty cell.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch one row. Returns `None` when the row does not exist.
    async fn get(&self, table: Table, row: &[u8]) -> Result<Option<Cells>, MetaError>;

    /// Merge `cells` into the row, creating it if absent.
    async fn put(&self, table: Table, row: &[u8], cells: Cells) -> Result<(), MetaError>;

    /// Remove the whole row. Removing a missing row is a no-op.
    async fn delete(&self, table: Table, row: &[u8]) -> Result<(), MetaError>;

    /// Scan rows in `[start, stop)` key order, returning at most `limit`.
    async fn scan(
        &self,
        table: Table,
        start: &[u8],
        stop: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Cells)>, MetaError>;

    /// Atomically apply the put iff `(family, qualifier)` currently holds
    /// `expected`. Returns whether the put was applied.
    async fn check_and_put(
        &self,
        table: Table,
        row: &[u8],
        family: &str,
        qualifier: &str,
        expected: &[u8],
        cells: Cells,
    ) -> Result<bool, MetaError>;
}

// ---------------------------------------------------------------------------
// MemoryKvStore
// ---------------------------------------------------------------------------

/// In-process [`KvStore`] backed by one ordered map per table.
///
/// Rows are kept in `BTreeMap`s so scans observe byte order, which the
/// compound row-key layout depends on.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    tables: RwLock<HashMap<Table, BTreeMap<Vec<u8>, Cells>>>,
}

impl MemoryKvStore {
    /// Create an empty store with every table present.
    #[must_use]
    pub fn new() -> Self {
        let mut tables = HashMap::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            tables.insert(table, BTreeMap::new());
        }
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Number of rows currently stored in `table`.
    #[must_use]
    pub fn row_count(&self, table: Table) -> usize {
        self.tables
            .read()
            .get(&table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, table: Table, row: &[u8]) -> Result<Option<Cells>, MetaError> {
        let tables = self.tables.read();
        Ok(tables.get(&table).and_then(|t| t.get(row)).cloned())
    }

    async fn put(&self, table: Table, row: &[u8], cells: Cells) -> Result<(), MetaError> {
        let mut tables = self.tables.write();
        let rows = tables.entry(table).or_default();
        let existing = rows.entry(row.to_vec()).or_default();
        for (family, qualifiers) in cells {
            existing.entry(family).or_default().extend(qualifiers);
        }
        Ok(())
    }

    async fn delete(&self, table: Table, row: &[u8]) -> Result<(), MetaError> {
        let mut tables = self.tables.write();
        if let Some(rows) = tables.get_mut(&table) {
            rows.remove(row);
        }
        Ok(())
    }

    async fn scan(
        &self,
        table: Table,
        start: &[u8],
        stop: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Cells)>, MetaError> {
        let tables = self.tables.read();
        let Some(rows) = tables.get(&table) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (key, cells) in rows.range(start.to_vec()..) {
            if !stop.is_empty() && key.as_slice() >= stop {
                break;
            }
            out.push((key.clone(), cells.clone()));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    async fn check_and_put(
        &self,
        table: Table,
        row: &[u8],
        family: &str,
        qualifier: &str,
        expected: &[u8],
        cells: Cells,
    ) -> Result<bool, MetaError> {
        let mut tables = self.tables.write();
        let rows = tables.entry(table).or_default();

        let current = rows
            .get(row)
            .and_then(|c| c.get(family))
            .and_then(|f| f.get(qualifier));
        let matches = match current {
            None => expected.is_empty(),
            Some(value) => value.as_slice() == expected,
        };
        if !matches {
            return Ok(false);
        }

        let existing = rows.entry(row.to_vec()).or_default();
        for (fam, qualifiers) in cells {
            existing.entry(fam).or_default().extend(qualifiers);
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
