// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Change Kind Value Object
//!
//! The kind of filesystem change reported by a watch plugin. Watch-mode
//! dedupe collapses bursts of these into a single effective kind per path
//! (see the watch coordinator).

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::EngineError;

/// The kind of change a watcher observed for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The file did not exist before and now does.
    Created,
    /// The file existed and its contents or metadata changed.
    Modified,
    /// The file existed and no longer does.
    Deleted,
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for ChangeKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(ChangeKind::Created),
            "modified" => Ok(ChangeKind::Modified),
            "deleted" => Ok(ChangeKind::Deleted),
            other => Err(EngineError::validation(format!("Unknown change kind: {}", other))),
        }
    }
}
