use std::collections::HashMap;

use crate::resolver::{key_string, row_keys, ResolverId, Row};

/// Rows and page-boundary metadata fetched for one resolver and one parent
/// group. Rows are always in forward display order.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub rows: Vec<Row>,
    pub has_previous_page: bool,
    pub has_next_page: bool,
    pub after_cursor: Option<String>,
    pub before_cursor: Option<String>,
    pub total_count: Option<u64>,
}

#[derive(Debug)]
pub(crate) enum FetchEntry {
    /// Root resolvers fetch exactly one result.
    Single(FetchResult),
    /// Child resolvers fetch one result per distinct parent join-key tuple.
    /// Parents with no matching children resolve to the shared empty result.
    Keyed {
        key_columns: Vec<String>,
        by_key: HashMap<String, FetchResult>,
        empty: FetchResult,
    },
}

/// The single channel through which a parent resolver discovers its
/// already-fetched children: populated during the fetch phase, read-only
/// during assembly.
#[derive(Debug, Default)]
pub struct FetchMap {
    entries: HashMap<ResolverId, FetchEntry>,
}

impl FetchMap {
    pub(crate) fn insert(&mut self, id: ResolverId, entry: FetchEntry) {
        self.entries.insert(id, entry);
    }

    pub(crate) fn extend(&mut self, entries: Vec<(ResolverId, FetchEntry)>) {
        for (id, entry) in entries {
            self.insert(id, entry);
        }
    }

    pub fn result_for(&self, id: ResolverId, parent_row: Option<&Row>) -> Option<&FetchResult> {
        match self.entries.get(&id)? {
            FetchEntry::Single(result) => Some(result),
            FetchEntry::Keyed { key_columns, by_key, empty } => match parent_row {
                Some(row) => {
                    let keys = row_keys(row, key_columns);
                    Some(by_key.get(&key_string(&keys)).unwrap_or(empty))
                }
                None => Some(empty),
            },
        }
    }
}
