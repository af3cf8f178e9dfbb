//! Shared helpers for coordinator integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use courier_test_utils::TestHarness;
use courier_types::{Account, AccountAttributes};

/// Registration attributes for a typical primary device.
pub fn attributes() -> AccountAttributes {
    AccountAttributes {
        fetches_messages: true,
        registration_id: 42,
        name: Some("primary".into()),
        ..AccountAttributes::default()
    }
}

/// Registers an account with the default attributes.
pub async fn register(harness: &TestHarness, number: &str) -> Account {
    harness
        .manager
        .create(number, "password", Some("test-agent"), &attributes(), Vec::new())
        .await
        .expect("registration should succeed")
}
