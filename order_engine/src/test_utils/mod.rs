//! Helpers for tests that need a real database and a controllable payment gateway.
mod fake_provider;
mod prepare_env;

pub use fake_provider::{FakeProvider, FakeQuery, FAKE_SECRET, FAKE_SIGNATURE_HEADER};
pub use prepare_env::{prepare_test_env, seed_product, TestEnv};
