// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Changed File Entity
//!
//! A [`ChangedFile`] is a virtual file paired with the kind of filesystem
//! change a watcher observed. Watch plugins report loose
//! [`ChangedFileSpec`]s; the plugin controller validates them (a spec with
//! no change kind is a validation fault) and builds [`WatchEvent`]s, which
//! additionally record whether the plugin actually supplied contents — the
//! watch coordinator needs that flag to pick the canonical bytes when it
//! collapses a burst of events for one path.

use serde::{Deserialize, Serialize};

use crate::entities::{FileSpec, VirtualFile};
use crate::value_objects::{ChangeKind, RelativePath};
use crate::EngineError;

/// A file plus the kind of change that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedFile {
    file: VirtualFile,
    kind: ChangeKind,
}

impl ChangedFile {
    /// Pairs a file with its change kind.
    pub fn new(file: VirtualFile, kind: ChangeKind) -> Self {
        ChangedFile { file, kind }
    }

    /// The changed file.
    pub fn file(&self) -> &VirtualFile {
        &self.file
    }

    /// Mutable access to the changed file.
    pub fn file_mut(&mut self) -> &mut VirtualFile {
        &mut self.file
    }

    /// The change kind.
    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Shortcut for the file's path.
    pub fn path(&self) -> &RelativePath {
        self.file.path()
    }

    /// Consumes the record, yielding the file.
    pub fn into_file(self) -> VirtualFile {
        self.file
    }
}

/// The loose on-wire shape a watch plugin reports.
///
/// `kind` is optional here only because the plugin boundary is where it gets
/// validated: a spec without a change kind is rejected with a validation
/// fault before it can enter the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangedFileSpec {
    /// The file the change applies to.
    pub file: FileSpec,
    /// The observed change kind. Required; validated at the boundary.
    pub kind: Option<ChangeKind>,
}

impl ChangedFileSpec {
    /// Creates a spec with an explicit kind.
    pub fn new(file: FileSpec, kind: ChangeKind) -> Self {
        ChangedFileSpec { file, kind: Some(kind) }
    }

    /// Shorthand for a creation event.
    pub fn created(file: FileSpec) -> Self {
        Self::new(file, ChangeKind::Created)
    }

    /// Shorthand for a modification event.
    pub fn modified(file: FileSpec) -> Self {
        Self::new(file, ChangeKind::Modified)
    }

    /// Shorthand for a deletion event.
    pub fn deleted(file: FileSpec) -> Self {
        Self::new(file, ChangeKind::Deleted)
    }
}

/// A validated watch event: the changed file plus whether the reporting
/// plugin actually supplied contents.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    change: ChangedFile,
    has_contents: bool,
}

impl WatchEvent {
    /// Validates a loose spec into a watch event, tagging the file with the
    /// given origin.
    ///
    /// # Errors
    /// Returns `EngineError::Validation` when the spec has no change kind,
    /// and propagates file-spec validation failures.
    pub fn from_spec(spec: ChangedFileSpec, origin: impl Into<String>) -> Result<Self, EngineError> {
        let kind = spec.kind.ok_or_else(|| {
            EngineError::validation(format!("Change event for {} has no change kind", spec.file.path))
        })?;
        let has_contents = spec.file.has_contents();
        let file = VirtualFile::from_spec(spec.file, origin)?;
        Ok(WatchEvent {
            change: ChangedFile::new(file, kind),
            has_contents,
        })
    }

    /// The validated change record.
    pub fn change(&self) -> &ChangedFile {
        &self.change
    }

    /// Whether the plugin supplied contents with this event.
    pub fn has_contents(&self) -> bool {
        self.has_contents
    }

    /// Consumes the event, yielding the change record.
    pub fn into_change(self) -> ChangedFile {
        self.change
    }

    /// Splits the event into its parts.
    pub fn into_parts(self) -> (ChangedFile, bool) {
        (self.change, self.has_contents)
    }
}
