// tests/property_test.rs

//! Property-based invariant checks for the generation-window arithmetic
//! (group laws of `m255p1add`, validity/currLife equivalence).

mod property {
    pub mod window_test;
}
