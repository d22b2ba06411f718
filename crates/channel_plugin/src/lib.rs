pub mod message;
pub mod plugin;

#[cfg(feature = "test-utils")]
pub mod plugin_test_util;
