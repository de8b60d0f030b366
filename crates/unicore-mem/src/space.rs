use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Access, MemError, MemResult, Prot};

pub const DEFAULT_PAGE_SIZE: u64 = 0x1000;

/// Public view of one mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub base: u64,
    pub size: u64,
    pub perms: Prot,
}

impl RegionInfo {
    /// Last byte address covered by the region (inclusive).
    pub fn last(&self) -> u64 {
        self.base + (self.size - 1)
    }
}

#[derive(Debug)]
struct Region {
    size: u64,
    perms: Prot,
    /// Backing pages keyed by page index within the region. Missing pages read as zero.
    pages: BTreeMap<u64, Box<[u8]>>,
}

impl Region {
    fn new(size: u64, perms: Prot) -> Self {
        Self {
            size,
            perms,
            pages: BTreeMap::new(),
        }
    }

    #[inline]
    fn last(&self, base: u64) -> u64 {
        base + (self.size - 1)
    }

    /// Split the region at `offset` (page aligned), returning the tail.
    fn split_off(&mut self, offset: u64, page_size: u64) -> Region {
        let first_tail_page = offset / page_size;
        let tail_pages = self
            .pages
            .split_off(&first_tail_page)
            .into_iter()
            .map(|(idx, page)| (idx - first_tail_page, page))
            .collect();
        let tail = Region {
            size: self.size - offset,
            perms: self.perms,
            pages: tail_pages,
        };
        self.size = offset;
        tail
    }

    fn read(&self, offset: u64, dst: &mut [u8], page_size: u64) {
        let mut done = 0usize;
        while done < dst.len() {
            let off = offset + done as u64;
            let page = off / page_size;
            let in_page = (off % page_size) as usize;
            let n = (page_size as usize - in_page).min(dst.len() - done);
            match self.pages.get(&page) {
                Some(bytes) => dst[done..done + n].copy_from_slice(&bytes[in_page..in_page + n]),
                None => dst[done..done + n].fill(0),
            }
            done += n;
        }
    }

    fn write(&mut self, offset: u64, src: &[u8], page_size: u64) {
        let mut done = 0usize;
        while done < src.len() {
            let off = offset + done as u64;
            let page = off / page_size;
            let in_page = (off % page_size) as usize;
            let n = (page_size as usize - in_page).min(src.len() - done);
            let bytes = self
                .pages
                .entry(page)
                .or_insert_with(|| vec![0u8; page_size as usize].into_boxed_slice());
            bytes[in_page..in_page + n].copy_from_slice(&src[done..done + n]);
            done += n;
        }
    }
}

/// Flat, paged guest address space.
///
/// Regions are kept sorted by base address and are pairwise disjoint. `map`
/// never merges or splits existing regions; `unmap` and `protect` split
/// regions at the requested boundaries when they only cover part of one.
#[derive(Debug)]
pub struct AddressSpace {
    page_size: u64,
    regions: BTreeMap<u64, Region>,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace {
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            regions: BTreeMap::new(),
        }
    }

    pub fn with_page_size(page_size: u64) -> MemResult<Self> {
        if page_size < 0x100 || !page_size.is_power_of_two() {
            return Err(MemError::InvalidPageSize(page_size));
        }
        Ok(Self {
            page_size,
            regions: BTreeMap::new(),
        })
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Map `[base, base + size)` with `perms`. The new region reads as zero.
    pub fn map(&mut self, base: u64, size: u64, perms: Prot) -> MemResult<()> {
        let last = self.check_page_range(base, size)?;
        if self.overlaps(base, last) {
            return Err(MemError::Overlap { base, size });
        }
        self.regions.insert(base, Region::new(size, perms));
        Ok(())
    }

    /// Unmap `[base, base + size)`, which must be fully covered by mappings.
    ///
    /// The range may span several adjacent regions and may cut regions at its
    /// edges; the parts outside the range stay mapped with their contents.
    pub fn unmap(&mut self, base: u64, size: u64) -> MemResult<()> {
        let last = self.check_page_range(base, size)?;
        self.check_covered(base, last)
            .ok_or(MemError::NotMapped { base, size })?;

        self.split_range(base, last);
        let doomed: Vec<u64> = self.regions.range(base..=last).map(|(&b, _)| b).collect();
        for b in doomed {
            self.regions.remove(&b);
        }
        Ok(())
    }

    /// Change the protection of `[base, base + size)`, which must be fully mapped.
    pub fn protect(&mut self, base: u64, size: u64, perms: Prot) -> MemResult<()> {
        let last = self.check_page_range(base, size)?;
        self.check_covered(base, last)
            .ok_or(MemError::NotMapped { base, size })?;

        self.split_range(base, last);
        for (_, region) in self.regions.range_mut(base..=last) {
            region.perms = perms;
        }
        Ok(())
    }

    /// Verify that every byte of `[addr, addr + len)` is mapped and allows `access`.
    pub fn check(&self, addr: u64, len: usize, access: Access) -> MemResult<()> {
        self.check_access(addr, len, access, Some(access.required()))
    }

    /// Guest read: requires [`Prot::READ`] on every byte.
    pub fn read(&self, addr: u64, dst: &mut [u8]) -> MemResult<()> {
        self.check(addr, dst.len(), Access::Read)?;
        self.copy_out(addr, dst);
        Ok(())
    }

    /// Guest write: requires [`Prot::WRITE`] on every byte.
    pub fn write(&mut self, addr: u64, src: &[u8]) -> MemResult<()> {
        self.check(addr, src.len(), Access::Write)?;
        self.copy_in(addr, src);
        Ok(())
    }

    /// Instruction fetch: requires [`Prot::EXEC`] on every byte.
    pub fn fetch(&self, addr: u64, dst: &mut [u8]) -> MemResult<()> {
        self.check(addr, dst.len(), Access::Fetch)?;
        self.copy_out(addr, dst);
        Ok(())
    }

    /// Host-side read that only requires the range to be mapped.
    pub fn read_unprotected(&self, addr: u64, dst: &mut [u8]) -> MemResult<()> {
        self.check_access(addr, dst.len(), Access::Read, None)?;
        self.copy_out(addr, dst);
        Ok(())
    }

    /// Host-side write that only requires the range to be mapped, used to load
    /// code into read-only or execute-only regions.
    pub fn write_unprotected(&mut self, addr: u64, src: &[u8]) -> MemResult<()> {
        self.check_access(addr, src.len(), Access::Write, None)?;
        self.copy_in(addr, src);
        Ok(())
    }

    /// Number of executable bytes readable from `addr`, capped at `max`.
    ///
    /// Fails only when the first byte itself cannot be fetched; a window that
    /// runs into an unmapped or non-executable byte is truncated there.
    pub fn fetch_window(&self, addr: u64, max: usize) -> MemResult<usize> {
        let mut avail = 0usize;
        let mut cursor = addr;
        while avail < max {
            let Some((base, region)) = self.region_at(cursor) else {
                break;
            };
            if !region.perms.contains(Prot::EXEC) {
                if avail == 0 {
                    return Err(MemError::Protection {
                        addr,
                        len: max,
                        access: Access::Fetch,
                    });
                }
                break;
            }
            let in_region = region.last(base) - cursor;
            let take = (max - avail).min(usize::try_from(in_region).unwrap_or(usize::MAX).saturating_add(1));
            avail += take;
            match cursor.checked_add(take as u64) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        if avail == 0 && max > 0 {
            return Err(MemError::Unmapped {
                addr,
                len: max,
                access: Access::Fetch,
            });
        }
        Ok(avail)
    }

    pub fn is_mapped(&self, addr: u64) -> bool {
        self.region_at(addr).is_some()
    }

    /// Protection of the region containing `addr`, if any.
    pub fn perms_at(&self, addr: u64) -> Option<Prot> {
        self.region_at(addr).map(|(_, r)| r.perms)
    }

    /// Mapped regions in ascending address order.
    pub fn regions(&self) -> impl Iterator<Item = RegionInfo> + '_ {
        self.regions.iter().map(|(&base, r)| RegionInfo {
            base,
            size: r.size,
            perms: r.perms,
        })
    }

    /// Total number of mapped bytes.
    pub fn mapped_bytes(&self) -> u64 {
        self.regions.values().map(|r| r.size).sum()
    }

    /// Number of backing pages allocated so far.
    pub fn allocated_pages(&self) -> usize {
        self.regions.values().map(|r| r.pages.len()).sum()
    }

    fn check_page_range(&self, base: u64, size: u64) -> MemResult<u64> {
        if size == 0 {
            return Err(MemError::EmptyRange { base });
        }
        let mask = self.page_size - 1;
        if base & mask != 0 || size & mask != 0 {
            return Err(MemError::Alignment {
                base,
                size,
                page_size: self.page_size,
            });
        }
        base.checked_add(size - 1)
            .ok_or(MemError::AddressOverflow { base, size })
    }

    fn region_at(&self, addr: u64) -> Option<(u64, &Region)> {
        let (&base, region) = self.regions.range(..=addr).next_back()?;
        (region.last(base) >= addr).then_some((base, region))
    }

    fn overlaps(&self, base: u64, last: u64) -> bool {
        // Regions are disjoint, so the one starting closest below `last` also ends furthest.
        self.regions
            .range(..=last)
            .next_back()
            .is_some_and(|(&start, r)| r.last(start) >= base)
    }

    fn check_covered(&self, base: u64, last: u64) -> Option<()> {
        let mut cursor = base;
        loop {
            let (start, region) = self.region_at(cursor)?;
            let region_last = region.last(start);
            if region_last >= last {
                return Some(());
            }
            cursor = region_last + 1;
        }
    }

    /// Ensure region boundaries exist at `base` and `last + 1`.
    fn split_range(&mut self, base: u64, last: u64) {
        self.split_at(base);
        if let Some(end) = last.checked_add(1) {
            self.split_at(end);
        }
    }

    fn split_at(&mut self, addr: u64) {
        let Some((&start, region)) = self.regions.range_mut(..=addr).next_back() else {
            return;
        };
        if start == addr || region.last(start) < addr {
            return;
        }
        let tail = region.split_off(addr - start, self.page_size);
        self.regions.insert(addr, tail);
    }

    fn check_access(
        &self,
        addr: u64,
        len: usize,
        access: Access,
        required: Option<Prot>,
    ) -> MemResult<()> {
        if len == 0 {
            return Ok(());
        }
        let last = addr
            .checked_add(len as u64 - 1)
            .ok_or(MemError::Unmapped { addr, len, access })?;

        let mut cursor = addr;
        loop {
            let (start, region) = self.region_at(cursor).ok_or(MemError::Unmapped {
                addr: cursor,
                len,
                access,
            })?;
            if let Some(required) = required {
                if !region.perms.contains(required) {
                    return Err(MemError::Protection {
                        addr: cursor,
                        len,
                        access,
                    });
                }
            }
            let region_last = region.last(start);
            if region_last >= last {
                return Ok(());
            }
            cursor = region_last + 1;
        }
    }

    // Callers must have validated the whole range.
    fn copy_out(&self, addr: u64, dst: &mut [u8]) {
        let mut done = 0usize;
        while done < dst.len() {
            let cursor = addr + done as u64;
            let Some((start, region)) = self.region_at(cursor) else {
                return;
            };
            let avail = region.last(start) - cursor;
            let n = usize::try_from(avail)
                .unwrap_or(usize::MAX)
                .saturating_add(1)
                .min(dst.len() - done);
            region.read(cursor - start, &mut dst[done..done + n], self.page_size);
            done += n;
        }
    }

    fn copy_in(&mut self, addr: u64, src: &[u8]) {
        let page_size = self.page_size;
        let mut done = 0usize;
        while done < src.len() {
            let cursor = addr + done as u64;
            let Some((&start, region)) = self.regions.range_mut(..=cursor).next_back() else {
                return;
            };
            if region.last(start) < cursor {
                return;
            }
            let avail = region.last(start) - cursor;
            let n = usize::try_from(avail)
                .unwrap_or(usize::MAX)
                .saturating_add(1)
                .min(src.len() - done);
            region.write(cursor - start, &src[done..done + n], page_size);
            done += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_rejects_misaligned_and_empty_ranges() {
        let mut space = AddressSpace::new();
        assert!(matches!(
            space.map(0x1001, 0x1000, Prot::ALL),
            Err(MemError::Alignment { .. })
        ));
        assert!(matches!(
            space.map(0x1000, 0x800, Prot::ALL),
            Err(MemError::Alignment { .. })
        ));
        assert_eq!(
            space.map(0x1000, 0, Prot::ALL),
            Err(MemError::EmptyRange { base: 0x1000 })
        );
        assert_eq!(space.regions().count(), 0);
    }

    #[test]
    fn map_rejects_overlap_without_touching_existing_regions() {
        let mut space = AddressSpace::new();
        space.map(0x2000, 0x2000, Prot::READ).unwrap();

        for (base, size) in [(0x1000, 0x2000), (0x3000, 0x1000), (0x2000, 0x1000), (0x0, 0x10000)] {
            assert_eq!(
                space.map(base, size, Prot::ALL),
                Err(MemError::Overlap { base, size })
            );
        }

        // Adjacent on both sides is fine.
        space.map(0x1000, 0x1000, Prot::ALL).unwrap();
        space.map(0x4000, 0x1000, Prot::ALL).unwrap();
        assert_eq!(space.regions().count(), 3);
    }

    #[test]
    fn top_of_address_space_can_be_mapped() {
        let mut space = AddressSpace::new();
        space.map(0xFFFF_FFFF_FFFF_F000, 0x1000, Prot::ALL).unwrap();
        space.write(0xFFFF_FFFF_FFFF_FFFC, &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        space.read(0xFFFF_FFFF_FFFF_FFFC, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        assert!(matches!(
            space.read(0xFFFF_FFFF_FFFF_FFFE, &mut buf),
            Err(MemError::Unmapped { .. })
        ));
        assert_eq!(
            space.map(0xFFFF_FFFF_FFFF_F000, 0x2000, Prot::ALL),
            Err(MemError::AddressOverflow {
                base: 0xFFFF_FFFF_FFFF_F000,
                size: 0x2000
            })
        );
        space.unmap(0xFFFF_FFFF_FFFF_F000, 0x1000).unwrap();
        assert_eq!(space.regions().count(), 0);
    }

    #[test]
    fn unmap_splits_regions_and_keeps_outer_contents() {
        let mut space = AddressSpace::new();
        space.map(0x1000, 0x3000, Prot::ALL).unwrap();
        space.write(0x1000, &[0xAA]).unwrap();
        space.write(0x3FFF, &[0xBB]).unwrap();

        space.unmap(0x2000, 0x1000).unwrap();

        let regions: Vec<_> = space.regions().collect();
        assert_eq!(
            regions,
            vec![
                RegionInfo {
                    base: 0x1000,
                    size: 0x1000,
                    perms: Prot::ALL
                },
                RegionInfo {
                    base: 0x3000,
                    size: 0x1000,
                    perms: Prot::ALL
                },
            ]
        );

        let mut b = [0u8; 1];
        space.read(0x1000, &mut b).unwrap();
        assert_eq!(b, [0xAA]);
        space.read(0x3FFF, &mut b).unwrap();
        assert_eq!(b, [0xBB]);
        assert!(!space.is_mapped(0x2000));
    }

    #[test]
    fn unmap_requires_full_coverage() {
        let mut space = AddressSpace::new();
        space.map(0x1000, 0x1000, Prot::ALL).unwrap();
        space.map(0x3000, 0x1000, Prot::ALL).unwrap();

        assert_eq!(
            space.unmap(0x1000, 0x3000),
            Err(MemError::NotMapped {
                base: 0x1000,
                size: 0x3000
            })
        );
        // Nothing was removed.
        assert_eq!(space.regions().count(), 2);

        // Adjacent regions can be unmapped together.
        space.map(0x2000, 0x1000, Prot::READ).unwrap();
        space.unmap(0x1000, 0x3000).unwrap();
        assert_eq!(space.regions().count(), 0);
    }

    #[test]
    fn protect_splits_and_changes_only_the_covered_pages() {
        let mut space = AddressSpace::new();
        space.map(0x0, 0x4000, Prot::ALL).unwrap();
        space.protect(0x1000, 0x1000, Prot::READ).unwrap();

        assert_eq!(space.perms_at(0x0), Some(Prot::ALL));
        assert_eq!(space.perms_at(0x1000), Some(Prot::READ));
        assert_eq!(space.perms_at(0x2000), Some(Prot::ALL));
        assert_eq!(space.regions().count(), 3);

        assert_eq!(
            space.write(0x1800, &[1]),
            Err(MemError::Protection {
                addr: 0x1800,
                len: 1,
                access: Access::Write
            })
        );
        assert_eq!(
            space.protect(0x3000, 0x2000, Prot::NONE),
            Err(MemError::NotMapped {
                base: 0x3000,
                size: 0x2000
            })
        );
    }

    #[test]
    fn cross_region_access_is_all_or_nothing() {
        let mut space = AddressSpace::new();
        space.map(0x1000, 0x1000, Prot::ALL).unwrap();
        space.map(0x2000, 0x1000, Prot::READ).unwrap();

        // Straddles a writable and a read-only region: nothing may be written.
        assert_eq!(
            space.write(0x1FFE, &[1, 2, 3, 4]),
            Err(MemError::Protection {
                addr: 0x2000,
                len: 4,
                access: Access::Write
            })
        );
        let mut buf = [0xFFu8; 4];
        space.read(0x1FFE, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[test]
    fn reads_do_not_allocate_pages() {
        let mut space = AddressSpace::new();
        space.map(0, 0x1_0000_0000, Prot::ALL).unwrap();

        let mut buf = [0xEEu8; 16];
        space.read(0x8000_0000, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
        assert_eq!(space.allocated_pages(), 0);

        space.write(0x8000_0FFF, &[1, 2]).unwrap();
        assert_eq!(space.allocated_pages(), 2, "write straddles two pages");
    }

    #[test]
    fn fetch_window_truncates_at_non_executable_bytes() {
        let mut space = AddressSpace::new();
        space.map(0x1000, 0x1000, Prot::READ | Prot::EXEC).unwrap();
        space.map(0x2000, 0x1000, Prot::READ).unwrap();

        assert_eq!(space.fetch_window(0x1000, 4), Ok(4));
        assert_eq!(space.fetch_window(0x1FFE, 4), Ok(2));
        assert_eq!(
            space.fetch_window(0x2000, 4),
            Err(MemError::Protection {
                addr: 0x2000,
                len: 4,
                access: Access::Fetch
            })
        );
        assert_eq!(
            space.fetch_window(0x5000, 4),
            Err(MemError::Unmapped {
                addr: 0x5000,
                len: 4,
                access: Access::Fetch
            })
        );
    }

    #[test]
    fn unprotected_access_still_requires_a_mapping() {
        let mut space = AddressSpace::new();
        space.map(0x1000, 0x1000, Prot::EXEC).unwrap();

        space.write_unprotected(0x1000, &[0xDE, 0xAD]).unwrap();
        let mut buf = [0u8; 2];
        space.read_unprotected(0x1000, &mut buf).unwrap();
        assert_eq!(buf, [0xDE, 0xAD]);
        assert!(matches!(space.read(0x1000, &mut buf), Err(MemError::Protection { .. })));
        assert!(matches!(
            space.write_unprotected(0x1FFF, &[0, 0]),
            Err(MemError::Unmapped { addr: 0x2000, .. })
        ));
    }

    #[test]
    fn rejects_bad_page_sizes() {
        assert_eq!(
            AddressSpace::with_page_size(0x1800).unwrap_err(),
            MemError::InvalidPageSize(0x1800)
        );
        assert!(AddressSpace::with_page_size(0x80).is_err());
        assert_eq!(AddressSpace::with_page_size(0x400).unwrap().page_size(), 0x400);
    }
}
