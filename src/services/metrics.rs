use serde::Serialize;

use crate::models::FileRecord;

/// Bytes not re-stored because of deduplication: `size * (refs - 1)`
pub fn storage_savings(record: &FileRecord) -> i64 {
    savings_for(record.size_bytes, record.reference_count)
}

fn savings_for(size_bytes: i64, reference_count: i64) -> i64 {
    size_bytes.saturating_mul((reference_count - 1).max(0))
}

/// Store-wide deduplication totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageSummary {
    pub total_records: i64,
    pub total_references: i64,
    /// Bytes actually held by the blob store
    pub physical_bytes: i64,
    /// Bytes clients uploaded, duplicates included
    pub logical_bytes: i64,
    pub storage_savings: i64,
}

impl StorageSummary {
    pub fn from_totals(
        total_records: i64,
        total_references: i64,
        physical_bytes: i64,
        logical_bytes: i64,
    ) -> Self {
        Self {
            total_records,
            total_references,
            physical_bytes,
            logical_bytes,
            storage_savings: logical_bytes.saturating_sub(physical_bytes),
        }
    }
}
