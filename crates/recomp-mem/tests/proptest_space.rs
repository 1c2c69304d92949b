use proptest::prelude::*;
use recomp_mem::layout::{BasePreference, MemoryLayout, Section};
use recomp_mem::{AddressSpace, GuestMemory, HeapReserver, SpaceConfig};

const HEAP_BASE: u32 = 0x0002_0000;
const HEAP_SIZE: u32 = 0x0001_0000;

fn config() -> SpaceConfig {
    SpaceConfig {
        layout: MemoryLayout {
            map_start: 0,
            sections: vec![Section {
                name: ".rdata",
                va: 0x1000,
                raw_size: 0x100,
                file_offset: 0,
                read_only: true,
                required: true,
            }],
            kernel_data: 0x4000,
            stack_base: 0x1_0000,
            stack_size: 0x1_0000,
            heap_base: HEAP_BASE,
            heap_size: HEAP_SIZE,
        },
        candidates: vec![BasePreference::HostChooses],
    }
}

fn space() -> AddressSpace {
    AddressSpace::init_with(&[0x5A; 0x100], &mut HeapReserver, &config()).unwrap()
}

prop_compose! {
    fn alloc_request()(size in 0u32..0x800, shift in 0u32..8) -> (u32, u32) {
        (size, 1u32 << shift)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn translation_offset_is_constant(addrs in proptest::collection::vec(0u32..0x3_0000, 1..32)) {
        let mut space = space();
        let offset = space.offset();
        for addr in addrs {
            prop_assert_eq!(space.translate(addr) as usize as i64 - i64::from(addr), offset);
            // Host writes through the translated pointer are visible to sized reads.
            if (0x5000..0x2_FFF0).contains(&addr) {
                space.write_u32(addr, addr ^ 0xA5A5_A5A5);
                // SAFETY: `addr` is inside the live reservation.
                let host = unsafe { space.translate(addr).cast::<u32>().read_unaligned() };
                prop_assert_eq!(u32::from_le(host), addr ^ 0xA5A5_A5A5);
            }
        }
        prop_assert_eq!(space.offset(), offset);
    }

    #[test]
    fn heap_is_monotonic_aligned_and_bounded(reqs in proptest::collection::vec(alloc_request(), 1..96)) {
        let mut space = space();
        let mut last = 0u32;
        for (size, align) in reqs {
            let used = space.heap_used();
            let addr = space.alloc_from_heap(size, align);
            if addr == 0 {
                // Exhaustion never moves the cursor.
                prop_assert_eq!(space.heap_used(), used);
                continue;
            }
            prop_assert!(addr > last);
            prop_assert_eq!(addr % align.max(4), 0);
            prop_assert!(addr >= HEAP_BASE);
            prop_assert!(u64::from(addr) + u64::from(size) <= u64::from(HEAP_BASE + HEAP_SIZE));
            last = addr;
        }
    }
}
