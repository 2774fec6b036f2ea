// tests/property/window_test.rs

use gcbf::window::{m255p1add, GenerationWindow};
use proptest::prelude::*;

proptest! {
    /// `m255p1add` forms a group of order 255 on `{1..=255}`: zero is the
    /// identity, and the operation is associative.
    #[test]
    fn m255p1add_identity_and_associativity(a in 1u8..=255, b in 0u8..=255, c in 0u8..=255) {
        prop_assert_eq!(m255p1add(a, 0), a);
        prop_assert_eq!(m255p1add(m255p1add(a, b), c), m255p1add(a, m255p1add(b, c)));
    }

    /// Every element has an inverse: there's some `b` that brings `a`
    /// back to itself after the round trip `a -> a+b -> (a+b)+b'`.
    #[test]
    fn m255p1add_has_inverses(a in 1u8..=255, b in 0u8..=255) {
        let advanced = m255p1add(a, b);
        let inverse = 255 - b;
        prop_assert_eq!(m255p1add(advanced, inverse), a);
    }

    /// `curr_life` and `is_valid` agree: a value has nonzero remaining
    /// life iff the window considers it valid.
    #[test]
    fn curr_life_agrees_with_is_valid(bottom in 1u8..=255, max_life in 1u8..=255, v in 0u8..=255) {
        let top = m255p1add(bottom, max_life - 1);
        let w = GenerationWindow::from_parts(bottom, top, max_life);
        prop_assert_eq!(w.curr_life(v) != 0, w.is_valid(v));
    }

    /// A value written by `value_for_life(life)` is immediately valid and
    /// reports back exactly `life` remaining generations.
    #[test]
    fn value_for_life_roundtrips_through_curr_life(bottom in 1u8..=255, max_life in 1u8..=255) {
        let top = m255p1add(bottom, max_life - 1);
        let w = GenerationWindow::from_parts(bottom, top, max_life);
        for life in 1..=max_life {
            let v = w.value_for_life(life);
            prop_assert!(w.is_valid(v));
            prop_assert_eq!(w.curr_life(v), life);
        }
    }

    /// Advancing by `n` then by `255 - n` returns the window to where it
    /// started (the 255-cycle wraps back to identity).
    #[test]
    fn advance_by_full_cycle_is_identity(bottom in 1u8..=255, max_life in 1u8..=255, n in 0u8..=255) {
        let top = m255p1add(bottom, max_life - 1);
        let mut w = GenerationWindow::from_parts(bottom, top, max_life);
        w.advance(n);
        w.advance(255 - n);
        prop_assert_eq!(w.bottom(), bottom);
        prop_assert_eq!(w.top(), top);
    }
}
