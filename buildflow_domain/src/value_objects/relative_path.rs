// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Relative Path Value Object
//!
//! This module provides the `RelativePath` value object: the path of a
//! virtual file inside a run. Paths are always relative, always normalized,
//! and validated at construction — an invalid path cannot exist inside the
//! engine.
//!
//! ## Validation Rules
//!
//! - Absolute paths are rejected (POSIX roots, Windows drive prefixes, and
//!   UNC prefixes alike)
//! - Parent-directory traversal (`..`) is rejected
//! - Empty paths are rejected
//! - `.` components and repeated separators are removed
//! - Both `/` and `\` are accepted as separators on input; the stored form
//!   uses the host separator
//!
//! ## Design Principles
//!
//! Follows the value-object discipline used across the domain: immutable,
//! compared by value, self-validating. Glob filters match against the
//! slash-normalized form so filter patterns behave identically on every
//! platform.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use crate::EngineError;

/// A validated, normalized, always-relative file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelativePath {
    /// Path components, in order. Joined with the host separator on demand.
    components: Vec<String>,
}

impl RelativePath {
    /// Creates a new relative path from loose input.
    ///
    /// Accepts `/` or `\` as separators, strips `.` components and empty
    /// segments, and rejects absolute paths, traversal, and empty input.
    ///
    /// # Errors
    /// Returns `EngineError::Validation` when the input is absolute, empty,
    /// or escapes the root via `..`.
    pub fn new(input: impl AsRef<str>) -> Result<Self, EngineError> {
        let raw = input.as_ref();

        if raw.trim().is_empty() {
            return Err(EngineError::validation("File path cannot be empty"));
        }
        if Self::looks_absolute(raw) {
            return Err(EngineError::validation(format!(
                "File path must be relative: {}",
                raw
            )));
        }

        let mut components = Vec::new();
        for segment in raw.split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => {
                    return Err(EngineError::validation(format!(
                        "File path must not traverse outside the root: {}",
                        raw
                    )));
                }
                name => components.push(name.to_string()),
            }
        }

        if components.is_empty() {
            return Err(EngineError::validation(format!("File path has no components: {}", raw)));
        }

        Ok(RelativePath { components })
    }

    fn looks_absolute(raw: &str) -> bool {
        if raw.starts_with('/') || raw.starts_with('\\') {
            return true;
        }
        // Windows drive prefix, e.g. "C:\..." or "C:/..."
        let bytes = raw.as_bytes();
        if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
            return true;
        }
        Path::new(raw).is_absolute()
    }

    /// The path components, in order.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The final component.
    pub fn file_name(&self) -> &str {
        self.components.last().map(String::as_str).unwrap_or_default()
    }

    /// The extension of the final component, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => Some(&name[idx + 1..]),
            _ => None,
        }
    }

    /// The path joined with the host separator.
    pub fn to_path_buf(&self) -> PathBuf {
        self.components.iter().collect()
    }

    /// The path joined with `/`, regardless of host. Glob filters and the
    /// worker wire format use this form.
    pub fn to_slash_string(&self) -> String {
        self.components.join("/")
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_path_buf().display())
    }
}

impl TryFrom<&str> for RelativePath {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        RelativePath::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_simple_relative_paths() {
        let path = RelativePath::new("posts/hello.md").unwrap();
        assert_eq!(path.components(), ["posts".to_string(), "hello.md".to_string()].as_slice());
        assert_eq!(path.file_name(), "hello.md");
        assert_eq!(path.extension(), Some("md"));
        assert_eq!(path.to_slash_string(), "posts/hello.md");
    }

    #[test]
    fn test_rejects_absolute_paths() {
        assert!(RelativePath::new("/etc/passwd").is_err());
        assert!(RelativePath::new("\\\\server\\share").is_err());
        assert!(RelativePath::new("C:\\Windows").is_err());
        assert!(RelativePath::new("c:/temp").is_err());
    }

    #[test]
    fn test_rejects_traversal_and_empty() {
        assert!(RelativePath::new("../outside").is_err());
        assert!(RelativePath::new("a/../../b").is_err());
        assert!(RelativePath::new("").is_err());
        assert!(RelativePath::new("   ").is_err());
        assert!(RelativePath::new("./.").is_err());
    }

    #[test]
    fn test_normalizes_dot_segments_and_separators() {
        let path = RelativePath::new("./a//b\\c/./d.txt").unwrap();
        assert_eq!(path.to_slash_string(), "a/b/c/d.txt");
    }

    #[test]
    fn test_extension_of_dotfile_is_none() {
        let path = RelativePath::new(".gitignore").unwrap();
        assert_eq!(path.extension(), None);
    }

    proptest! {
        #[test]
        fn prop_normalized_form_is_stable(segments in proptest::collection::vec("[a-zA-Z0-9_.-]{1,8}", 1..5)) {
            prop_assume!(segments.iter().all(|s| s != "." && s != ".."));
            let joined = segments.join("/");
            let path = RelativePath::new(&joined).unwrap();
            // Re-parsing the normalized form yields the same value
            let reparsed = RelativePath::new(path.to_slash_string()).unwrap();
            prop_assert_eq!(path, reparsed);
        }
    }
}
