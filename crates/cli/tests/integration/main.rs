//! End-to-end tests driving the kiln binary against real source archives.

mod common;
mod install_tests;
