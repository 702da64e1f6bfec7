//! Grouping of annotation records into threads

use std::collections::BTreeMap;

use super::types::AnnotationRecord;

/// Map of thread ID to the annotations in that thread, oldest first
pub type ThreadMap = BTreeMap<String, Vec<AnnotationRecord>>;

/// Group records by thread ID and order each thread by creation time
///
/// The sort is stable, so records created at the same instant keep the order
/// they arrived in.
pub fn build_thread_map(records: Vec<AnnotationRecord>) -> ThreadMap {
    let mut thread_map = ThreadMap::new();

    for record in records {
        thread_map
            .entry(record.thread_id.clone())
            .or_default()
            .push(record);
    }

    for records in thread_map.values_mut() {
        records.sort_by_key(|record| record.created_at);
    }

    thread_map
}
