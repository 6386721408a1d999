//! kiln-lib: build orchestration for declarative package descriptors
//!
//! A package flows through one linear pipeline:
//! - `descriptor`: parse and validate a package descriptor
//! - `resolve`: match its dependencies against installed records
//! - `fetch`: download, verify and unpack the source archive
//! - `build`: run the build steps in an isolated environment
//! - `stage`: publish mapped outputs into the prefix atomically
//! - `test_runner`: smoke-test the installed package
//!
//! `pipeline` drives these stages; `uninstall` reverses a staged install.

pub mod build;
pub mod config;
pub mod consts;
pub mod descriptor;
pub mod fetch;
pub mod layout;
pub mod lock;
pub mod pipeline;
pub mod platform;
pub mod process;
pub mod record;
pub mod resolve;
pub mod stage;
pub mod test_runner;
pub mod uninstall;
pub mod util;
