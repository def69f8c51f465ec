//! Report-by-exception: suppress writes of fields that did not change.
//!
//! For each key, the last observed record per `id_` is kept in
//! [`LocalStorage`](crate::storage::LocalStorage) under
//! `REPORT_BY_EXCEPTION_<key>`. Each call to [`ReportByException::next`]
//! diffs the incoming records against that state and returns only the
//! fields that changed (plus `id_`), dropping records that end up empty.

use std::collections::BTreeMap;
use std::sync::Arc;

use datalink_core::{Error, Record, ID_FIELD};

use crate::storage::{LocalStorage, LocalStorageExt};

/// Reserved local-storage namespace prefix for diff state.
pub const STORAGE_KEY_PREFIX: &str = "REPORT_BY_EXCEPTION";

/// Records without an `id_` share this state slot: successive anonymous
/// records diff against one accumulated record.
const ANONYMOUS_ID: &str = "";

type State = BTreeMap<String, Record>;

/// Per-key record diffing against the last observed state.
pub struct ReportByException {
    storage: Arc<dyn LocalStorage>,
}

impl ReportByException {
    /// Creates a differ over the given storage.
    #[must_use]
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self { storage }
    }

    /// The local-storage key holding the state for `key`.
    #[must_use]
    pub fn storage_key(key: &str) -> String {
        format!("{STORAGE_KEY_PREFIX}_{key}")
    }

    /// Diffs `records` against the stored state for `key`.
    ///
    /// First observation of an id passes the record through whole. Later
    /// observations keep `id_` plus every field that is new or changed.
    /// Records that end up with nothing beyond `id_` and `t` are dropped.
    /// The merged state is persisted before returning, so the result
    /// depends only on the ordered history of calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the state cannot be read or
    /// persisted; the input records are not consumed in that case.
    pub fn next(&self, key: &str, records: &[Record]) -> Result<Vec<Record>, Error> {
        let storage_key = Self::storage_key(key);
        let mut state: State = self.storage.get_as(&storage_key)?;
        let mut out = Vec::new();

        for record in records {
            let id = record.id().unwrap_or(ANONYMOUS_ID).to_string();

            let diffed = match state.get(&id) {
                None => record.clone(),
                Some(previous) => {
                    let mut diff = Record::new();
                    for (field, value) in record {
                        if field.as_str() == ID_FIELD || previous.get(field) != Some(value) {
                            diff.set(field.clone(), value.clone());
                        }
                    }
                    diff
                }
            };

            state.entry(id).or_default().merge(record);

            if diffed.payload_len() > 0 {
                out.push(diffed);
            }
        }

        self.storage.set_as(&storage_key, &state)?;
        Ok(out)
    }
}
