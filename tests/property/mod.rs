// tests/property/mod.rs

//! Property-based invariant checks for the generation-window arithmetic.

pub mod window_test;
