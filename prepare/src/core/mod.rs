//! Deterministic, pure logic shared by resolution and execution.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! documents and scopes and return deterministic outputs suitable for tests.

pub mod protocol;
pub mod reference;
pub mod schema;
pub mod scope;
pub mod substitute;
pub mod types;
