// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the pipeline's tables.

pub mod attempts;
pub mod payloads;
pub mod records;
pub mod repeaters;
