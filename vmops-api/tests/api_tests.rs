//! API tests
//!
//! Tests for the shared types and helper functions.

use proptest::prelude::*;
use vmops_api::memory::{align_up, layout, page_size, MemoryRegion};
use vmops_api::{Error, ErrorContext, NumaPolicy, Result, VirtAddr};

#[test]
fn test_numa_policy_names() {
    assert_eq!(NumaPolicy::default(), NumaPolicy::Fill);
    assert_eq!(NumaPolicy::Fill.to_string(), "fill");
    assert_eq!(NumaPolicy::Interleave.as_str(), "interleave");
}

#[test]
fn test_virt_addr_alignment() {
    let addr = VirtAddr::new(layout::GB512);
    assert!(addr.is_aligned(page_size::MB2));
    assert!(!(addr + page_size::KB4).is_aligned(page_size::MB2));
    assert_eq!((addr + page_size::KB4).to_string(), "0x8000001000");
}

#[test]
fn test_io_error_conversion() {
    fn read_missing() -> Result<String> {
        let s = std::fs::read_to_string("/nonexistent/vmops/cpulist")?;
        Ok(s)
    }
    let err = read_missing().context("node0").unwrap_err();
    match err {
        Error::Io(msg) => assert!(msg.starts_with("node0: ")),
        other => panic!("unexpected error {other:?}"),
    }
}

proptest! {
    #[test]
    fn prop_align_up_is_smallest_multiple(size in 1usize..(1 << 40)) {
        let aligned = align_up(size, page_size::MB2);
        prop_assert!(aligned >= size);
        prop_assert_eq!(aligned % page_size::MB2, 0);
        prop_assert!(aligned - size < page_size::MB2);
    }

    #[test]
    fn prop_adjacent_regions_never_overlap(start in 0usize..(1 << 40), size in 1usize..(1 << 30)) {
        let a = MemoryRegion::new(VirtAddr::new(start), size);
        let b = MemoryRegion::new(VirtAddr::new(start + size), size);
        prop_assert!(!a.overlaps(&b));
        prop_assert!(a.overlaps(&a));
    }
}
