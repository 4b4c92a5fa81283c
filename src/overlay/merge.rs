//! Directory listing merge strategies

use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::DirEntry;

/// Merges a lower-priority listing (`incoming`) into the listing gathered so
/// far (`merged`). Called once per owning backend, in priority order.
pub type DirsMerger = Arc<dyn Fn(Vec<DirEntry>, Vec<DirEntry>) -> Vec<DirEntry> + Send + Sync>;

/// The merger used when none is configured: [`merge_by_name`].
pub fn default_dirs_merger() -> DirsMerger {
    Arc::new(merge_by_name)
}

/// Append every entry of `incoming` whose name is not already in `merged`.
///
/// Entries already present always win, so the higher-priority backend's entry
/// survives and its position is kept.
pub fn merge_by_name(mut merged: Vec<DirEntry>, incoming: Vec<DirEntry>) -> Vec<DirEntry> {
    if merged.is_empty() {
        merged.extend(incoming);
        return merged;
    }
    let mut seen: HashSet<String> = merged.iter().map(|e| e.name().to_string()).collect();
    for entry in incoming {
        if seen.insert(entry.name().to_string()) {
            merged.push(entry);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileType, Metadata};
    use std::time::SystemTime;

    fn entry(name: &str, size: u64) -> DirEntry {
        DirEntry::new(Metadata::new(
            name,
            FileType::File,
            size,
            0o644,
            SystemTime::UNIX_EPOCH,
        ))
    }

    #[test]
    fn test_earlier_entry_wins() {
        let merged = merge_by_name(
            vec![entry("x.txt", 1), entry("y.txt", 1)],
            vec![entry("x.txt", 2), entry("z.txt", 2)],
        );
        let names: Vec<_> = merged.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["x.txt", "y.txt", "z.txt"]);
        assert_eq!(merged[0].metadata().len(), 1);
    }

    #[test]
    fn test_merge_into_empty() {
        let merged = merge_by_name(Vec::new(), vec![entry("a", 0), entry("b", 0)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_default_merger_is_name_based() {
        let merger = default_dirs_merger();
        let merged = merger(vec![entry("a", 0)], vec![entry("a", 0), entry("b", 0)]);
        assert_eq!(merged.len(), 2);
    }
}
