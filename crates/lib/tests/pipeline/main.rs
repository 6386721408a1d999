//! Integration tests for the install pipeline.

mod common;
mod concurrency_tests;
mod install_tests;
mod uninstall_tests;
