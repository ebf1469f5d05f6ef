//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use stagepipe::{CompiledPipeline, Completion};
use std::time::Duration;

/// Generous upper bound for a pipeline run in tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Wait for `completion`, failing the test instead of hanging
pub fn assert_completes(completion: &Completion) {
    assert!(
        completion.wait_timeout(test_timeout()),
        "pipeline did not complete within {:?}",
        test_timeout()
    );
}

/// Wait for a started pipeline to run to completion on its own
pub fn run_to_completion(compiled: &CompiledPipeline) {
    assert_completes(&compiled.completion());
    assert_eq!(compiled.running_stages(), 0);
}
