use unicore_mem::{Access, AddressSpace, MemError, Prot, RegionInfo};

#[cfg(not(target_arch = "wasm32"))]
use proptest::prelude::*;

const PAGE: u64 = 0x1000;

fn assert_disjoint(space: &AddressSpace) {
    let regions: Vec<RegionInfo> = space.regions().collect();
    for pair in regions.windows(2) {
        assert!(
            pair[0].last() < pair[1].base,
            "regions overlap or are unsorted: {:?} / {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn write_then_read_round_trips() {
    let mut space = AddressSpace::new();
    space.map(0x1000, 0x1000, Prot::ALL).unwrap();

    let data: Vec<u8> = (0..=255u8).collect();
    space.write(0x1080, &data).unwrap();

    let mut back = vec![0u8; data.len()];
    space.read(0x1080, &mut back).unwrap();
    assert_eq!(back, data);
}

#[test]
fn one_byte_past_the_end_is_unmapped() {
    let mut space = AddressSpace::new();
    space.map(0x1000, 0x1000, Prot::ALL).unwrap();

    let mut buf = [0u8; 2];
    assert_eq!(
        space.read(0x1FFF, &mut buf),
        Err(MemError::Unmapped {
            addr: 0x2000,
            len: 2,
            access: Access::Read
        })
    );
    assert_eq!(
        space.write(0x2000, &[0]),
        Err(MemError::Unmapped {
            addr: 0x2000,
            len: 1,
            access: Access::Write
        })
    );
    // The in-bounds byte was not written by the failed access.
    space.write(0x1FFF, &[0x5A]).unwrap();
    assert!(space.write(0x1FFF, &[0x11, 0x22]).is_err());
    let mut last = [0u8; 1];
    space.read(0x1FFF, &mut last).unwrap();
    assert_eq!(last, [0x5A]);
}

#[test]
fn unmap_then_identical_map_reads_as_fresh_zeroed_region() {
    let mut space = AddressSpace::new();
    space.map(0x4000, 0x2000, Prot::READ | Prot::WRITE).unwrap();
    let before: Vec<RegionInfo> = space.regions().collect();

    space.unmap(0x4000, 0x2000).unwrap();
    space.map(0x4000, 0x2000, Prot::READ | Prot::WRITE).unwrap();

    assert_eq!(space.regions().collect::<Vec<_>>(), before);
    let mut buf = [0xFFu8; 8];
    space.read(0x5FF8, &mut buf).unwrap();
    assert_eq!(buf, [0u8; 8]);
    space.write(0x4000, &[1, 2, 3]).unwrap();
}

#[test]
fn regions_serialize_for_embedders() {
    let mut space = AddressSpace::new();
    space.map(0x1000, 0x1000, Prot::READ | Prot::EXEC).unwrap();

    let regions: Vec<RegionInfo> = space.regions().collect();
    let json = serde_json::to_string(&regions).unwrap();
    let back: Vec<RegionInfo> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, regions);
}

#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone)]
enum Op {
    Map { page: u64, pages: u64 },
    Unmap { page: u64, pages: u64 },
    Protect { page: u64, pages: u64, perms: u32 },
}

#[cfg(not(target_arch = "wasm32"))]
fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..32, 1u64..8).prop_map(|(page, pages)| Op::Map { page, pages }),
        (0u64..32, 1u64..8).prop_map(|(page, pages)| Op::Unmap { page, pages }),
        (0u64..32, 1u64..8, 0u32..8).prop_map(|(page, pages, perms)| Op::Protect {
            page,
            pages,
            perms
        }),
    ]
}

#[cfg(not(target_arch = "wasm32"))]
proptest! {
    #[test]
    fn regions_never_overlap(ops in proptest::collection::vec(arb_op(), 1..64)) {
        let mut space = AddressSpace::new();
        // Shadow model: mapped state per page.
        let mut shadow = [false; 40];

        for op in ops {
            match op {
                Op::Map { page, pages } => {
                    let free = (page..page + pages).all(|p| !shadow[p as usize]);
                    let res = space.map(page * PAGE, pages * PAGE, Prot::ALL);
                    prop_assert_eq!(res.is_ok(), free);
                    if free {
                        for p in page..page + pages {
                            shadow[p as usize] = true;
                        }
                    }
                }
                Op::Unmap { page, pages } => {
                    let covered = (page..page + pages).all(|p| shadow[p as usize]);
                    let res = space.unmap(page * PAGE, pages * PAGE);
                    prop_assert_eq!(res.is_ok(), covered);
                    if covered {
                        for p in page..page + pages {
                            shadow[p as usize] = false;
                        }
                    }
                }
                Op::Protect { page, pages, perms } => {
                    let covered = (page..page + pages).all(|p| shadow[p as usize]);
                    let res = space.protect(page * PAGE, pages * PAGE, Prot::from_bits_truncate(perms));
                    prop_assert_eq!(res.is_ok(), covered);
                }
            }
            assert_disjoint(&space);
            for (p, mapped) in shadow.iter().enumerate() {
                prop_assert_eq!(space.is_mapped(p as u64 * PAGE), *mapped);
            }
        }
    }

    #[test]
    fn round_trip_anywhere_in_a_mapping(offset in 0u64..0x3800, data in proptest::collection::vec(any::<u8>(), 1..0x1000)) {
        let mut space = AddressSpace::new();
        space.map(0x10000, 0x4000, Prot::ALL).unwrap();

        let addr = 0x10000 + offset;
        let fits = offset + data.len() as u64 <= 0x4000;
        let res = space.write(addr, &data);
        prop_assert_eq!(res.is_ok(), fits);

        if fits {
            let mut back = vec![0u8; data.len()];
            space.read(addr, &mut back).unwrap();
            prop_assert_eq!(back, data);
        }
    }
}
