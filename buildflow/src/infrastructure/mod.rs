// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Infrastructure layer: stream primitives, plugin adapters, worker pool,
//! and logging.

pub mod adapters;
pub mod logging;
pub mod streams;
pub mod workers;
