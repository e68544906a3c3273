// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain entities: virtual files, change records, and the run lifecycle.

mod changed_file;
mod run;
mod virtual_file;

pub use changed_file::{ChangedFile, ChangedFileSpec, WatchEvent};
pub use run::{RunContext, RunSummary, RunTiming, StreamTotals};
pub use virtual_file::{FileSpec, VirtualFile};
