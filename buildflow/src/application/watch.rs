// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Watch Batch Dedupe
//!
//! A debounce window can capture several events for the same path: a save
//! observed as delete-then-create, an editor writing twice, a file created
//! and immediately modified. The rebuild wants exactly one [`ChangedFile`]
//! per path, with the *effective* change kind and the canonical contents.
//!
//! ## Effective kind
//!
//! Events for one path are sorted by modification time, ascending, and the
//! first and last kinds decide:
//!
//! | first | last | effective |
//! |---|---|---|
//! | anything | `Deleted` | `Deleted` |
//! | not `Created` | `Created` | `Modified` — it existed before, vanished, came back |
//! | `Created` | `Modified` | `Created` — the whole burst is the file's birth |
//! | otherwise | — | the last kind |
//!
//! ## Canonical contents
//!
//! The latest event that actually carried contents supplies the bytes; if
//! none did, the file enters the run with an empty buffer.
//!
//! The watch *loop* — merging plugin streams, eager `change` events,
//! debouncing, dispatching partial runs — lives on the engine facade; this
//! module is the pure part.

use std::collections::HashMap;

use buildflow_domain::{ChangeKind, ChangedFile, WatchEvent};

/// Collapses one debounced batch into one change per path. Path order
/// follows first appearance in the batch; order across paths carries no
/// guarantee beyond that.
pub fn dedupe_batch(events: Vec<WatchEvent>) -> Vec<ChangedFile> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<WatchEvent>> = HashMap::new();
    for event in events {
        let key = event.change().path().to_slash_string();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(event);
    }

    order
        .into_iter()
        .map(|key| collapse_group(groups.remove(&key).expect("group exists for ordered key")))
        .collect()
}

fn collapse_group(mut group: Vec<WatchEvent>) -> ChangedFile {
    if group.len() == 1 {
        return group.pop().expect("single-event group").into_change();
    }

    group.sort_by_key(|event| event.change().file().modified_at());
    let first_kind = group.first().expect("non-empty group").change().kind();
    let last_kind = group.last().expect("non-empty group").change().kind();
    let kind = effective_kind(first_kind, last_kind);

    let canonical: Option<Vec<u8>> = group
        .iter()
        .rev()
        .find(|event| event.has_contents())
        .map(|event| event.change().file().contents().to_vec());

    let mut file = group.pop().expect("non-empty group").into_change().into_file();
    match canonical {
        Some(bytes) => {
            if bytes != file.contents() {
                file.set_contents(bytes);
            }
        }
        None => {
            if !file.is_empty() {
                file.set_contents(Vec::new());
            }
        }
    }
    ChangedFile::new(file, kind)
}

fn effective_kind(first: ChangeKind, last: ChangeKind) -> ChangeKind {
    match (first, last) {
        (_, ChangeKind::Deleted) => ChangeKind::Deleted,
        (first, ChangeKind::Created) if first != ChangeKind::Created => ChangeKind::Modified,
        (ChangeKind::Created, ChangeKind::Modified) => ChangeKind::Created,
        (_, last) => last,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildflow_domain::{ChangedFileSpec, FileSpec};
    use chrono::{Duration, Utc};

    fn event(path: &str, kind: ChangeKind, text: Option<&str>, offset_ms: i64) -> WatchEvent {
        let at = Utc::now() + Duration::milliseconds(offset_ms);
        let mut spec = FileSpec::new(path).with_modified_at(at);
        if let Some(text) = text {
            spec = spec.with_text(text);
        }
        WatchEvent::from_spec(ChangedFileSpec::new(spec, kind), "plugin://watch").unwrap()
    }

    #[test]
    fn test_single_events_pass_through() {
        let deduped = dedupe_batch(vec![event("a.txt", ChangeKind::Created, Some("x"), 0)]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].kind(), ChangeKind::Created);
        assert_eq!(deduped[0].file().contents(), b"x");
    }

    #[test]
    fn test_delete_then_create_is_a_modification() {
        // The save-as-replace pattern: the file existed, vanished, came back.
        let deduped = dedupe_batch(vec![
            event("file1.txt", ChangeKind::Deleted, Some("Old contents"), 0),
            event("file1.txt", ChangeKind::Created, Some("New contents"), 10),
        ]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].kind(), ChangeKind::Modified);
        assert_eq!(deduped[0].file().contents(), b"New contents");
    }

    #[test]
    fn test_create_then_modify_is_a_creation() {
        let deduped = dedupe_batch(vec![
            event("new.txt", ChangeKind::Created, Some("v1"), 0),
            event("new.txt", ChangeKind::Modified, Some("v2"), 10),
        ]);
        assert_eq!(deduped[0].kind(), ChangeKind::Created);
        assert_eq!(deduped[0].file().contents(), b"v2");
    }

    #[test]
    fn test_last_deleted_wins_regardless_of_history() {
        let deduped = dedupe_batch(vec![
            event("gone.txt", ChangeKind::Created, Some("x"), 0),
            event("gone.txt", ChangeKind::Modified, Some("y"), 10),
            event("gone.txt", ChangeKind::Deleted, None, 20),
        ]);
        assert_eq!(deduped[0].kind(), ChangeKind::Deleted);
    }

    #[test]
    fn test_contents_come_from_latest_carrier() {
        // The last event carries nothing; the middle one has the bytes.
        let deduped = dedupe_batch(vec![
            event("a.txt", ChangeKind::Modified, Some("first"), 0),
            event("a.txt", ChangeKind::Modified, Some("second"), 10),
            event("a.txt", ChangeKind::Modified, None, 20),
        ]);
        assert_eq!(deduped[0].file().contents(), b"second");
    }

    #[test]
    fn test_no_carrier_means_empty_buffer() {
        let deduped = dedupe_batch(vec![
            event("a.txt", ChangeKind::Modified, None, 0),
            event("a.txt", ChangeKind::Modified, None, 10),
        ]);
        assert!(deduped[0].file().is_empty());
    }

    #[test]
    fn test_paths_stay_separate() {
        let deduped = dedupe_batch(vec![
            event("a.txt", ChangeKind::Deleted, None, 0),
            event("b.txt", ChangeKind::Deleted, None, 1),
            event("c.txt", ChangeKind::Deleted, None, 2),
        ]);
        assert_eq!(deduped.len(), 3);
        assert!(deduped.iter().all(|c| c.kind() == ChangeKind::Deleted));
    }

    #[test]
    fn test_modify_then_modify_keeps_modified() {
        let deduped = dedupe_batch(vec![
            event("a.txt", ChangeKind::Modified, Some("1"), 0),
            event("a.txt", ChangeKind::Modified, Some("2"), 10),
        ]);
        assert_eq!(deduped[0].kind(), ChangeKind::Modified);
    }

    #[test]
    fn test_create_then_create_stays_created() {
        let deduped = dedupe_batch(vec![
            event("a.txt", ChangeKind::Created, Some("1"), 0),
            event("a.txt", ChangeKind::Created, Some("2"), 10),
        ]);
        assert_eq!(deduped[0].kind(), ChangeKind::Created);
    }
}
