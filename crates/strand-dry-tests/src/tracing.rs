// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Test log capture.

use tracing_subscriber::EnvFilter;

/// Installs a test-writer subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `strand_core=debug`. Later calls (and
/// calls from tests running in parallel) are no-ops.
pub fn init_test_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strand_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
