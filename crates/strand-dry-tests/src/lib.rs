// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Strand crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`fixtures`] - Stream ids and pre-tagged entities seeded into memory documents
//! - [`flow`] - Scriptable dataflow host that records invalidations and recompute requests
//! - [`producers`] - Scripted producing nodes
//! - [`tracing`] - Test log capture

pub mod config;
pub mod fixtures;
pub mod flow;
pub mod producers;
pub mod tracing;

pub use config::InMemoryConfigStore;
pub use fixtures::{seed_conflict, seed_tracked, stream_id, tracked_positions};
pub use flow::FakeFlow;
pub use producers::{EntityProducer, FailingProducer, ProducerRun};
pub use tracing::init_test_tracing;
