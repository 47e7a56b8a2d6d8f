//! Side-effecting collaborators: filesystem, git, processes.
//!
//! Each concern sits behind a small trait so resolution and execution can be
//! driven by scripted fakes in tests.

pub mod cache;
pub mod config;
pub mod document;
pub mod git;
pub mod process;
pub mod provision;
pub mod validator;
