//! Runner for prepare-assignment pipelines.
//!
//! A pipeline (`prepare.yml`) lists jobs; each job is an ordered list of
//! invocations that either run a shell command or use an action fetched from
//! a git repository. The crate is split the same way a run is:
//!
//! - **[`core`]**: Pure logic (references, documents, scopes, substitution,
//!   the structured output protocol, generated schemas). No I/O.
//! - **[`io`]**: Side-effecting collaborators (cache, git, processes,
//!   provisioning, schema validation, config) behind small traits.
//!
//! [`resolve`] makes every used action available before anything runs;
//! [`engine`] then executes the jobs. [`tasks`] backs the cache management
//! commands.

pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod resolve;
pub mod tasks;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
