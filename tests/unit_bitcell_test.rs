// tests/unit_bitcell_test.rs

//! S6 — cell-width packing, exercised against the public `BitCellArray` API.

use gcbf::bitcell::BitCellArray;

#[test]
fn s6_cell_width_packing() {
    for nbits in [1u8, 2, 4, 8] {
        let mut arr = BitCellArray::new(100, nbits).unwrap();
        let max = 1u16 << nbits;
        for i in 0..100 {
            arr.put(i, (i as u8) % max as u8);
        }
        for i in 0..100 {
            assert_eq!(arr.get(i), (i as u8) % max as u8, "nbits={nbits} i={i}");
        }
    }
}
