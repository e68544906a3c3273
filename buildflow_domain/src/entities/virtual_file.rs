// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Virtual File Entity
//!
//! This module provides the `VirtualFile` entity: the unit of work that flows
//! through the pipeline. A virtual file is created by a source plugin (or
//! derived by a processor), mutated in place by the plugins it passes
//! through, and freed once the output channel that holds it is drained.
//!
//! ## Overview
//!
//! A virtual file carries:
//!
//! - **Origin**: a URI-ish tag naming the plugin that produced it
//! - **Path**: a validated [`RelativePath`] — absolute paths cannot exist
//!   inside the engine
//! - **Timestamps**: creation and modification times
//! - **Metadata**: an open string-keyed map plugins use to pass values to
//!   each other
//! - **Contents**: a byte buffer, possibly empty
//!
//! ## Construction
//!
//! Files are constructed from a [`FileSpec`], the on-wire shape plugins
//! exchange: only `path` is required, and contents may be supplied as bytes
//! or as text. Construction validates the path and rejects a spec carrying
//! both content forms.
//!
//! ## Ownership
//!
//! Files are by-value: whichever channel (or plugin invocation) currently
//! holds a file owns it. A processor that fans one file out into several
//! uses [`VirtualFile::derived`] so the new files inherit the input's origin
//! and creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;

use crate::value_objects::RelativePath;
use crate::EngineError;

/// The on-wire shape from which a [`VirtualFile`] is constructed.
///
/// Only `path` is required. Contents may be supplied as raw bytes or as
/// UTF-8 text, but not both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileSpec {
    /// Relative path of the file. Required.
    pub path: String,
    /// Creation timestamp; defaults to now.
    pub created_at: Option<DateTime<Utc>>,
    /// Modification timestamp; defaults to now.
    pub modified_at: Option<DateTime<Utc>>,
    /// Open metadata map.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Raw byte contents.
    pub contents: Option<Vec<u8>>,
    /// UTF-8 text contents. Mutually exclusive with `contents`.
    pub text: Option<String>,
}

impl FileSpec {
    /// Creates a spec for the given path with no contents.
    pub fn new(path: impl Into<String>) -> Self {
        FileSpec {
            path: path.into(),
            ..FileSpec::default()
        }
    }

    /// Sets text contents.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Sets byte contents.
    pub fn with_contents(mut self, contents: impl Into<Vec<u8>>) -> Self {
        self.contents = Some(contents.into());
        self
    }

    /// Adds one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sets the creation timestamp.
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Sets the modification timestamp.
    pub fn with_modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.modified_at = Some(at);
        self
    }

    /// Whether the spec actually supplies contents (bytes or text).
    pub fn has_contents(&self) -> bool {
        self.contents.is_some() || self.text.is_some()
    }
}

/// A virtual file flowing through the pipeline.
///
/// Mutable by plugins; immutable in shape. The path and origin are fixed at
/// construction, while contents, metadata, and the modification timestamp
/// change as the file moves through processor steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualFile {
    origin: String,
    path: RelativePath,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    metadata: HashMap<String, serde_json::Value>,
    contents: Vec<u8>,
}

impl VirtualFile {
    /// Constructs a file from its on-wire spec, tagging it with the origin
    /// of the plugin that produced it.
    ///
    /// # Errors
    /// Returns `EngineError::Validation` when the path is absolute or
    /// otherwise invalid, or when the spec carries both `text` and
    /// `contents`.
    pub fn from_spec(spec: FileSpec, origin: impl Into<String>) -> Result<Self, EngineError> {
        let path = RelativePath::new(&spec.path)?;
        if spec.contents.is_some() && spec.text.is_some() {
            return Err(EngineError::validation(format!(
                "File spec for {} carries both text and byte contents",
                spec.path
            )));
        }

        let now = Utc::now();
        let contents = match (spec.contents, spec.text) {
            (Some(bytes), None) => bytes,
            (None, Some(text)) => text.into_bytes(),
            _ => Vec::new(),
        };

        Ok(VirtualFile {
            origin: origin.into(),
            path,
            created_at: spec.created_at.unwrap_or(now),
            modified_at: spec.modified_at.unwrap_or(now),
            metadata: spec.metadata,
            contents,
        })
    }

    /// Builds a new file from a spec, inheriting this file's origin,
    /// creation time, and metadata. Used by processors that fan one input
    /// file out into several outputs.
    pub fn derived(&self, spec: FileSpec) -> Result<VirtualFile, EngineError> {
        let mut metadata = self.metadata.clone();
        let inherited_created = spec.created_at.unwrap_or(self.created_at);
        let spec = FileSpec {
            created_at: Some(inherited_created),
            ..spec
        };
        let mut file = VirtualFile::from_spec(spec, self.origin.clone())?;
        metadata.extend(file.metadata.drain());
        file.metadata = metadata;
        Ok(file)
    }

    /// URI-ish tag of the plugin that produced this file.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The file's path, always relative.
    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last-modification timestamp.
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    /// Read-only metadata view.
    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Mutable metadata view.
    pub fn metadata_mut(&mut self) -> &mut HashMap<String, serde_json::Value> {
        &mut self.metadata
    }

    /// The file contents.
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// Mutable contents. Does not touch the modification timestamp; use
    /// [`VirtualFile::set_contents`] for wholesale replacement.
    pub fn contents_mut(&mut self) -> &mut Vec<u8> {
        &mut self.contents
    }

    /// Replaces the contents and updates the modification timestamp.
    pub fn set_contents(&mut self, contents: impl Into<Vec<u8>>) {
        self.contents = contents.into();
        self.modified_at = Utc::now();
    }

    /// Replaces the contents with UTF-8 text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.set_contents(text.into().into_bytes());
    }

    /// The contents decoded as UTF-8, lossily.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.contents)
    }

    /// Size of the contents in bytes.
    pub fn size(&self) -> u64 {
        self.contents.len() as u64
    }

    /// Whether the file has no contents.
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec_requires_relative_path() {
        let err = VirtualFile::from_spec(FileSpec::new("/abs/path.txt"), "plugin://test").unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_from_spec_defaults() {
        let file = VirtualFile::from_spec(FileSpec::new("a.txt"), "plugin://src").unwrap();
        assert_eq!(file.origin(), "plugin://src");
        assert_eq!(file.size(), 0);
        assert!(file.is_empty());
        assert!(file.metadata().is_empty());
    }

    #[test]
    fn test_text_becomes_bytes() {
        let file = VirtualFile::from_spec(FileSpec::new("a.txt").with_text("Hello, world!"), "plugin://src").unwrap();
        assert_eq!(file.size(), 13);
        assert_eq!(file.text_lossy(), "Hello, world!");
    }

    #[test]
    fn test_both_content_forms_rejected() {
        let spec = FileSpec::new("a.txt").with_text("x").with_contents(vec![1, 2]);
        assert!(VirtualFile::from_spec(spec, "plugin://src").is_err());
    }

    #[test]
    fn test_set_contents_touches_modified_at() {
        let mut file = VirtualFile::from_spec(FileSpec::new("a.txt"), "plugin://src").unwrap();
        let before = file.modified_at();
        file.set_text("12345");
        assert_eq!(file.size(), 5);
        assert!(file.modified_at() >= before);
    }

    #[test]
    fn test_derived_inherits_origin_and_metadata() {
        let mut base = VirtualFile::from_spec(FileSpec::new("page.md").with_text("# hi"), "plugin://reader").unwrap();
        base.metadata_mut().insert("lang".into(), serde_json::json!("en"));

        let child = base
            .derived(FileSpec::new("page.html").with_text("<h1>hi</h1>"))
            .unwrap();
        assert_eq!(child.origin(), "plugin://reader");
        assert_eq!(child.created_at(), base.created_at());
        assert_eq!(child.metadata()["lang"], serde_json::json!("en"));
        assert_eq!(child.path().to_slash_string(), "page.html");
    }

    #[test]
    fn test_derived_spec_metadata_wins() {
        let mut base = VirtualFile::from_spec(FileSpec::new("a.md"), "plugin://r").unwrap();
        base.metadata_mut().insert("k".into(), serde_json::json!(1));
        let child = base
            .derived(FileSpec::new("b.md").with_metadata("k", serde_json::json!(2)))
            .unwrap();
        assert_eq!(child.metadata()["k"], serde_json::json!(2));
    }
}
