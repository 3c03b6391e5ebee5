// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test-only fixtures for RedirFS Core
//!
//! A seeded in-memory tree plus filters that record every callback they
//! receive, so unit tests can check dispatch order without a real filter.

#[cfg(test)]
pub mod fixtures;
