pub mod assertions;
pub mod setup;

// Re-export main utilities for use by test files
#[allow(unused_imports)]
pub use assertions::{assert_error_kind, read_json};
#[allow(unused_imports)]
pub use setup::{TestSetup, TestSetupBuilder, EC_KEY, RSA_KEY};
