//! Test helpers for exercising dispatcher groups without a remote site.

pub mod group;
pub mod memory;
