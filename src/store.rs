//! Persistent record storage.
//!
//! A thin adapter over an embedded ordered byte-KV (`sled`). Records live
//! in a single tree named `records`, keyed `owner.|TYPE` (see
//! [`crate::record::record_key`]), with JSON-encoded record arrays as
//! values. Prefix ordering on the owner portion of the key is what makes
//! wildcard and zone-transfer scans correct, so keys are always written in
//! the normalized lower-case FQDN form.
//!
//! Reads go straight to the tree; writes go through `Tree::transaction`,
//! which gives the serializable semantics the ingestion pipeline relies
//! on. I/O errors always propagate to the caller.

use std::path::Path;

use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use sled::Tree;
use tracing::info;

use crate::error::Error;
use crate::record::{owner_prefix, record_key, DnsRecord};
use hickory_proto::rr::RecordType;

/// Name of the tree holding all record sets.
const RECORDS_TREE: &str = "records";

/// Handle on the embedded record database. Cheap to clone.
#[derive(Clone)]
pub struct RecordStore {
    db: sled::Db,
    tree: Tree,
}

impl RecordStore {
    /// Open (or create) the store at `path`. Failure here is fatal for the
    /// process, which cannot serve without its record set.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let db = sled::open(path.as_ref())?;
        let tree = db.open_tree(RECORDS_TREE)?;

        info!(
            path = %path.as_ref().display(),
            records = tree.len(),
            "opened record store"
        );

        Ok(Self { db, tree })
    }

    /// Fetch the raw value under a key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    /// Fetch and decode the record set for `(owner, rtype)`.
    pub fn record_set(
        &self,
        owner: &str,
        rtype: RecordType,
    ) -> Result<Option<Vec<DnsRecord>>, Error> {
        match self.get(&record_key(owner, rtype))? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        self.tree
            .scan_prefix(prefix)
            .map(|entry| {
                let (k, v) = entry?;
                Ok((k.to_vec(), v.to_vec()))
            })
            .collect()
    }

    /// All keys an owner has, i.e. everything under the `owner.|` prefix.
    pub fn owner_entries(&self, owner: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        self.scan_prefix(&owner_prefix(owner))
    }

    /// Iterate over every entry in the store, in key order.
    pub fn iter(&self) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>), Error>> {
        self.tree.iter().map(|entry| {
            let (k, v) = entry?;
            Ok((k.to_vec(), v.to_vec()))
        })
    }

    /// Run `f` inside a write transaction. All puts and deletes issued by
    /// `f` commit atomically or not at all.
    pub fn update<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: Fn(&TransactionalTree) -> ConflictableTransactionResult<T, Error>,
    {
        Ok(self.tree.transaction(f)?)
    }

    /// Store `value` under `key` in its own transaction.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.update(|tx| {
            tx.insert(key, value)?;
            Ok(())
        })
    }

    /// Number of stored record sets.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the store holds no record sets.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flush outstanding writes to disk. Called once on shutdown.
    pub fn close(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }
}

/// Decode a stored value into its record set.
pub fn decode_value(bytes: &[u8]) -> Result<Vec<DnsRecord>, Error> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::MalformedRecord(format!("undecodable stored value: {e}")))
}

/// Encode a record set into its canonical stored form.
pub fn encode_value(records: &[DnsRecord]) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(records)
        .map_err(|e| Error::MalformedRecord(format!("unencodable record set: {e}")))
}
