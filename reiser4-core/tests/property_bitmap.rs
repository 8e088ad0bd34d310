//! Property tests for `alloc::bitmap` (spec §4.3), in the style of
//! `examples/RedHatOnTop-kernel-performed-illegal-operation`'s
//! `tools/kpio-test/tests/property_*.rs` files: one strategy per input
//! shape, one `proptest!` block per invariant.

use proptest::prelude::*;
use reiser4_core::alloc::bitmap::{blocks_per_bitmap_block, Bitmap};

proptest! {
    /// Marking a block and immediately clearing it again leaves the bitmap's
    /// used-block count exactly where it started, regardless of what else
    /// was already marked.
    #[test]
    fn mark_then_clear_restores_used_count(total in 1u64..4096, blk in 0u64..4095) {
        prop_assume!(blk < total);
        let mut bm = Bitmap::new(total);
        let before = bm.count_used();
        bm.mark(blk).unwrap();
        bm.clear(blk).unwrap();
        prop_assert_eq!(bm.count_used(), before);
    }

    /// After growing a bitmap's covered region, every newly marked block in
    /// the grown span is a stride-aligned bitmap-block address — never an
    /// address that merely happens to sit at the old region's boundary.
    #[test]
    fn resize_only_marks_stride_aligned_bitmap_blocks(
        old_total in 1u64..2048,
        grow in 1u64..2048,
        block_size in 1u32..16,
    ) {
        let stride = blocks_per_bitmap_block(block_size);
        let mut bm = Bitmap::new(old_total);
        bm.resize(0, grow as i64, stride).unwrap();

        let new_total = old_total + grow;
        for blk in old_total..new_total {
            if bm.test(blk).unwrap() {
                prop_assert_eq!(blk % stride, 0, "marked block {} is not stride-aligned", blk);
            }
        }
    }
}
