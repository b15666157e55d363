//! Table Engine.
//!
//! Root-pointer location, table-set resolution, and identity propagation
//! across the modern and legacy copies of the ACPI discovery structures.
//! Everything here is generic over [`PhysMemory`] and the service traits,
//! so the whole engine runs against synthetic fixtures under test.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

use core::mem;

use crate::acpi_table::{equal_bytes, update_checksum, AcpiTableHeader, OemIdentity, Rsdp};
use crate::config::PatchBreadth;
use crate::error::SlicError;
use crate::phys::PhysMemory;
use crate::service::{BootServices, LegacyRegion, LegacyRegionGuard};
use crate::signature::{
    ACPI_10_TABLE_GUID, ACPI_20_TABLE_GUID, ACPI_CHECKSUM_OFFSET, ACPI_HEADER_LEN, ACPI_LENGTH_OFFSET,
    ACPI_OEM_ID_OFFSET, ACPI_OEM_TABLE_ID_OFFSET, BIOS_RO_WINDOW_END, BIOS_RO_WINDOW_START, EBDA_SEGMENT_PTR,
    EBDA_WINDOW_LEN,
    RSDP_CHECKSUM_OFFSET, RSDP_EXT_CHECKSUM_OFFSET, RSDP_LENGTH_OFFSET, RSDP_OEM_ID_OFFSET, RSDP_REVISION_OFFSET,
    RSDP_RSDT_ADDRESS_OFFSET, RSDP_SCAN_STRIDE, RSDP_SHORT_LEN, RSDP_SIGNATURE, RSDP_XSDT_ADDRESS_OFFSET,
};

/// Resolved discovery chain(s) for one root descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TableSet {
    pub primary: u64,
    pub extended: Option<u64>,
}

/// Root descriptor published in the firmware configuration-table registry,
/// current identity first, legacy identity on miss.
pub(crate) fn find_root_descriptor<B: BootServices + ?Sized>(boot: &B) -> Option<u64> {
    boot.configuration_table(&ACPI_20_TABLE_GUID).or_else(|| boot.configuration_table(&ACPI_10_TABLE_GUID))
}

/// Scan for the legacy root pointer.
///
/// The fixed BIOS read-only window is searched first; other firmware may
/// have relocated the pointer into the EBDA, so that is the fallback. Both
/// scans run in 16-byte strides, lowest matching address wins.
pub(crate) fn find_legacy_root_pointer<M: PhysMemory + ?Sized>(phys: &M) -> Option<u64> {
    let mut addr = BIOS_RO_WINDOW_START;
    while addr < BIOS_RO_WINDOW_END {
        if phys.read_u64(addr) == RSDP_SIGNATURE {
            return Some(addr);
        }
        addr += RSDP_SCAN_STRIDE;
    }

    let ebda = u64::from(phys.read_u16(EBDA_SEGMENT_PTR)) << 4;
    let mut offset = 0;
    while offset < EBDA_WINDOW_LEN {
        if phys.read_u64(ebda + offset) == RSDP_SIGNATURE {
            return Some(ebda + offset);
        }
        offset += RSDP_SCAN_STRIDE;
    }

    None
}

/// Dereference a root descriptor into its table chain(s).
///
/// Revision 0 yields only the primary chain and never reads the extension
/// fields; revision 2 yields both. Any other revision aborts the whole
/// patch attempt.
pub(crate) fn resolve_table_set<M: PhysMemory + ?Sized>(phys: &M, rsdp_addr: u64) -> Result<TableSet, SlicError> {
    let rsdp = Rsdp::read_from(phys, rsdp_addr);
    match rsdp.revision {
        0 => Ok(TableSet { primary: u64::from({ rsdp.rsdt_address }), extended: None }),
        2 => Ok(TableSet { primary: u64::from({ rsdp.rsdt_address }), extended: Some({ rsdp.xsdt_address }) }),
        _ => Err(SlicError::UnsupportedRevision),
    }
}

/// Propagate the source identity through one resolved table set.
///
/// Per chain, deep mode rewrites member tables first: membership is judged
/// against the chain table's identity as it stood before the chain header
/// itself is rewritten. The root descriptor's short checksum is finalized
/// before the extended checksum, which covers it.
pub(crate) fn propagate_identity<M: PhysMemory + ?Sized>(
    phys: &mut M,
    rsdp_addr: u64,
    set: &TableSet,
    source: &OemIdentity,
    breadth: PatchBreadth,
) {
    if breadth == PatchBreadth::Untouched {
        return;
    }
    let deep = breadth == PatchBreadth::AllTables;

    if deep {
        patch_members(phys, set.primary, mem::size_of::<u32>(), source);
    }
    patch_chain_header(phys, set.primary, source);

    phys.write(rsdp_addr + RSDP_OEM_ID_OFFSET as u64, &source.oem_id);
    update_checksum(phys, rsdp_addr, RSDP_SHORT_LEN, RSDP_CHECKSUM_OFFSET);

    if let Some(extended) = set.extended {
        if deep {
            patch_members(phys, extended, mem::size_of::<u64>(), source);
        }
        let declared = phys.read_u32(rsdp_addr + RSDP_LENGTH_OFFSET as u64) as usize;
        update_checksum(phys, rsdp_addr, declared, RSDP_EXT_CHECKSUM_OFFSET);
        patch_chain_header(phys, extended, source);
    }
}

/// Rewrite one chain-table header with the source identity pair.
fn patch_chain_header<M: PhysMemory + ?Sized>(phys: &mut M, table: u64, source: &OemIdentity) {
    phys.write(table + ACPI_OEM_ID_OFFSET as u64, &source.oem_id);
    phys.write(table + ACPI_OEM_TABLE_ID_OFFSET as u64, &source.oem_table_id);
    let length = phys.read_u32(table + ACPI_LENGTH_OFFSET as u64) as usize;
    update_checksum(phys, table, length, ACPI_CHECKSUM_OFFSET);
}

/// Deep propagation across one chain.
///
/// Rewrites every member whose identity matches the chain's OEM group.
/// Null entries are skipped, not errors; a non-zero entry is taken as a
/// valid pointer as published. Extended entries dereference only their low
/// 32 bits.
fn patch_members<M: PhysMemory + ?Sized>(phys: &mut M, chain: u64, entry_size: usize, source: &OemIdentity) {
    let header = AcpiTableHeader::read_from(phys, chain);
    let group = header.identity();
    let length = header.length as usize;
    if length < ACPI_HEADER_LEN {
        return;
    }

    let entries = (length - ACPI_HEADER_LEN) / entry_size;
    for index in 0..entries {
        let slot = chain + (ACPI_HEADER_LEN + index * entry_size) as u64;
        let member = match entry_size {
            8 => phys.read_u64(slot) & 0xFFFF_FFFF,
            _ => u64::from(phys.read_u32(slot)),
        };
        if member == 0 {
            continue;
        }

        let member_header = AcpiTableHeader::read_from(phys, member);
        if equal_bytes(&member_header.oem_id, &group.oem_id)
            && equal_bytes(&member_header.oem_table_id, &group.oem_table_id)
        {
            phys.write(member + ACPI_OEM_ID_OFFSET as u64, &source.oem_id);
            phys.write(member + ACPI_OEM_TABLE_ID_OFFSET as u64, &source.oem_table_id);
            update_checksum(phys, member, member_header.length as usize, ACPI_CHECKSUM_OFFSET);
        }
    }
}

/// Best-effort mirror of the modern root descriptor into its legacy copy.
///
/// Only the OEM id and the table addresses are carried over; the legacy
/// descriptor keeps its own revision and length, and its extension fields
/// are written only when its own revision byte says they exist. A missing
/// pointer or a denied unlock leaves the legacy copy untouched.
pub(crate) fn propagate_to_legacy_root<M: PhysMemory + ?Sized>(
    phys: &mut M,
    modern_rsdp: u64,
    region: Option<&dyn LegacyRegion>,
) {
    let Some(legacy) = find_legacy_root_pointer(phys) else {
        log::debug!("legacy root pointer not present, skipping mirror");
        return;
    };
    let Some(region) = region else {
        log::debug!("legacy region service not published, skipping mirror");
        return;
    };
    let guard = match LegacyRegionGuard::unlock(region) {
        Ok(guard) => guard,
        Err(_) => {
            log::warn!("legacy region unlock denied, skipping mirror");
            return;
        }
    };

    let oem_id: [u8; 6] = phys.read_array(modern_rsdp + RSDP_OEM_ID_OFFSET as u64);
    let rsdt_address = phys.read_u32(modern_rsdp + RSDP_RSDT_ADDRESS_OFFSET as u64);
    phys.write(legacy + RSDP_OEM_ID_OFFSET as u64, &oem_id);
    phys.write_u32(legacy + RSDP_RSDT_ADDRESS_OFFSET as u64, rsdt_address);
    update_checksum(phys, legacy, RSDP_SHORT_LEN, RSDP_CHECKSUM_OFFSET);

    if phys.read_u8(legacy + RSDP_REVISION_OFFSET as u64) == 2 {
        let xsdt_address = phys.read_u64(modern_rsdp + RSDP_XSDT_ADDRESS_OFFSET as u64);
        phys.write_u64(legacy + RSDP_XSDT_ADDRESS_OFFSET as u64, xsdt_address);
        let declared = phys.read_u32(legacy + RSDP_LENGTH_OFFSET as u64) as usize;
        update_checksum(phys, legacy, declared, RSDP_EXT_CHECKSUM_OFFSET);
    }

    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        rsdp_bytes, rsdt_bytes, sum_region, table_bytes, xsdt_bytes, FakeLegacyRegion, FakeMemory,
    };
    use alloc::vec;

    const SOURCE: OemIdentity = OemIdentity { oem_id: *b"ABCDEF", oem_table_id: *b"12345678" };
    const GROUP_OEM: [u8; 6] = *b"GHIJKL";
    const GROUP_TABLE: [u8; 8] = *b"87654321";

    fn map_empty_legacy_windows(memory: &mut FakeMemory) {
        memory.map(BIOS_RO_WINDOW_START, vec![0u8; 0x20000]);
        memory.map(EBDA_SEGMENT_PTR, vec![0xC0, 0x9F]);
        memory.map(0x9FC00, vec![0u8; EBDA_WINDOW_LEN as usize]);
    }

    #[test]
    fn locator_returns_the_lowest_match_in_the_bios_window() {
        let mut memory = FakeMemory::new();
        map_empty_legacy_windows(&mut memory);
        memory.write(0xE1230, &RSDP_SIGNATURE.to_le_bytes());
        memory.write(0xF8000, &RSDP_SIGNATURE.to_le_bytes());

        assert_eq!(find_legacy_root_pointer(&memory), Some(0xE1230));
    }

    #[test]
    fn locator_falls_back_to_the_ebda_window() {
        let mut memory = FakeMemory::new();
        map_empty_legacy_windows(&mut memory);
        memory.write(0x9FC40, &RSDP_SIGNATURE.to_le_bytes());

        assert_eq!(find_legacy_root_pointer(&memory), Some(0x9FC40));
    }

    #[test]
    fn locator_reports_not_found_when_both_windows_are_exhausted() {
        let mut memory = FakeMemory::new();
        map_empty_legacy_windows(&mut memory);

        assert_eq!(find_legacy_root_pointer(&memory), None);
    }

    #[test]
    fn revision_zero_resolves_primary_only() {
        let mut memory = FakeMemory::new();
        // Only the 20-byte legacy descriptor is mapped; touching the
        // extension fields would panic the fixture.
        memory.map(0x1000, rsdp_bytes(0, &GROUP_OEM, 0x2000, 0));

        let set = resolve_table_set(&memory, 0x1000).unwrap();
        assert_eq!(set, TableSet { primary: 0x2000, extended: None });
    }

    #[test]
    fn revision_two_resolves_both_chains() {
        let mut memory = FakeMemory::new();
        memory.map(0x1000, rsdp_bytes(2, &GROUP_OEM, 0x2000, 0x4000));

        let set = resolve_table_set(&memory, 0x1000).unwrap();
        assert_eq!(set, TableSet { primary: 0x2000, extended: Some(0x4000) });
    }

    #[test]
    fn unknown_revision_aborts_resolution() {
        let mut memory = FakeMemory::new();
        memory.map(0x1000, rsdp_bytes(0, &GROUP_OEM, 0x2000, 0));
        memory.write_u8(0x1000 + RSDP_REVISION_OFFSET as u64, 1);

        assert_eq!(resolve_table_set(&memory, 0x1000), Err(SlicError::UnsupportedRevision));
    }

    #[test]
    fn root_propagation_rewrites_header_and_descriptor() {
        let mut memory = FakeMemory::new();
        memory.map(0x1000, rsdp_bytes(0, &GROUP_OEM, 0x2000, 0));
        let mut rsdt = rsdt_bytes(&GROUP_OEM, &GROUP_TABLE, &[0x3000]);
        rsdt[ACPI_CHECKSUM_OFFSET] = 0; // stale on entry
        let rsdt_len = rsdt.len();
        memory.map(0x2000, rsdt);
        // The member at 0x3000 stays unmapped: root breadth must not touch it.

        let set = resolve_table_set(&memory, 0x1000).unwrap();
        propagate_identity(&mut memory, 0x1000, &set, &SOURCE, PatchBreadth::RootTables);

        let rsdt_after = memory.bytes(0x2000, rsdt_len);
        assert_eq!(&rsdt_after[ACPI_OEM_ID_OFFSET..ACPI_OEM_ID_OFFSET + 6], b"ABCDEF");
        assert_eq!(&rsdt_after[ACPI_OEM_TABLE_ID_OFFSET..ACPI_OEM_TABLE_ID_OFFSET + 8], b"12345678");
        assert_eq!(sum_region(&memory, 0x2000, rsdt_len), 0);

        let rsdp_after = memory.bytes(0x1000, RSDP_SHORT_LEN);
        assert_eq!(&rsdp_after[RSDP_OEM_ID_OFFSET..RSDP_OEM_ID_OFFSET + 6], b"ABCDEF");
        assert_eq!(sum_region(&memory, 0x1000, RSDP_SHORT_LEN), 0);
    }

    #[test]
    fn deep_propagation_only_rewrites_the_premutation_group() {
        let mut memory = FakeMemory::new();
        memory.map(0x1000, rsdp_bytes(0, &GROUP_OEM, 0x2000, 0));
        memory.map(0x2000, rsdt_bytes(&GROUP_OEM, &GROUP_TABLE, &[0x3000, 0x3100]));
        memory.map(0x3000, table_bytes(b"APIC", 64, &GROUP_OEM, &GROUP_TABLE));
        memory.map(0x3100, table_bytes(b"HPET", 64, b"OTHER_", b"OTHRTBLE"));
        let foreign_before = memory.bytes(0x3100, 64);

        let set = resolve_table_set(&memory, 0x1000).unwrap();
        propagate_identity(&mut memory, 0x1000, &set, &SOURCE, PatchBreadth::AllTables);

        let matching = memory.bytes(0x3000, 64);
        assert_eq!(&matching[ACPI_OEM_ID_OFFSET..ACPI_OEM_ID_OFFSET + 6], b"ABCDEF");
        assert_eq!(&matching[ACPI_OEM_TABLE_ID_OFFSET..ACPI_OEM_TABLE_ID_OFFSET + 8], b"12345678");
        assert_eq!(sum_region(&memory, 0x3000, 64), 0);

        assert_eq!(memory.bytes(0x3100, 64), foreign_before, "foreign table must stay untouched");
    }

    #[test]
    fn deep_propagation_skips_null_entries() {
        let mut memory = FakeMemory::new();
        memory.map(0x1000, rsdp_bytes(0, &GROUP_OEM, 0x2000, 0));
        memory.map(0x2000, rsdt_bytes(&GROUP_OEM, &GROUP_TABLE, &[0, 0x3000]));
        memory.map(0x3000, table_bytes(b"APIC", 64, &GROUP_OEM, &GROUP_TABLE));

        let set = resolve_table_set(&memory, 0x1000).unwrap();
        propagate_identity(&mut memory, 0x1000, &set, &SOURCE, PatchBreadth::AllTables);

        assert_eq!(sum_region(&memory, 0x3000, 64), 0);
    }

    #[test]
    fn extended_entries_dereference_the_low_word() {
        let mut memory = FakeMemory::new();
        memory.map(0x1000, rsdp_bytes(2, &GROUP_OEM, 0x2000, 0x4000));
        memory.map(0x2000, rsdt_bytes(&GROUP_OEM, &GROUP_TABLE, &[]));
        memory.map(0x4000, xsdt_bytes(&GROUP_OEM, &GROUP_TABLE, &[0xAAAA_BBBB_0000_3000]));
        memory.map(0x3000, table_bytes(b"SSDT", 80, &GROUP_OEM, &GROUP_TABLE));

        let set = resolve_table_set(&memory, 0x1000).unwrap();
        propagate_identity(&mut memory, 0x1000, &set, &SOURCE, PatchBreadth::AllTables);

        let member = memory.bytes(0x3000, 80);
        assert_eq!(&member[ACPI_OEM_ID_OFFSET..ACPI_OEM_ID_OFFSET + 6], b"ABCDEF");
        assert_eq!(sum_region(&memory, 0x3000, 80), 0);
    }

    #[test]
    fn revision_two_finalizes_both_descriptor_checksums() {
        let mut memory = FakeMemory::new();
        memory.map(0x1000, rsdp_bytes(2, &GROUP_OEM, 0x2000, 0x4000));
        memory.map(0x2000, rsdt_bytes(&GROUP_OEM, &GROUP_TABLE, &[]));
        memory.map(0x4000, xsdt_bytes(&GROUP_OEM, &GROUP_TABLE, &[]));

        let set = resolve_table_set(&memory, 0x1000).unwrap();
        propagate_identity(&mut memory, 0x1000, &set, &SOURCE, PatchBreadth::RootTables);

        assert_eq!(sum_region(&memory, 0x1000, RSDP_SHORT_LEN), 0);
        assert_eq!(sum_region(&memory, 0x1000, mem::size_of::<Rsdp>()), 0);

        let xsdt = memory.bytes(0x4000, ACPI_HEADER_LEN);
        assert_eq!(&xsdt[ACPI_OEM_ID_OFFSET..ACPI_OEM_ID_OFFSET + 6], b"ABCDEF");
        assert_eq!(sum_region(&memory, 0x4000, ACPI_HEADER_LEN), 0);
    }

    #[test]
    fn propagation_is_idempotent() {
        let mut memory = FakeMemory::new();
        memory.map(0x1000, rsdp_bytes(2, &GROUP_OEM, 0x2000, 0x4000));
        memory.map(0x2000, rsdt_bytes(&GROUP_OEM, &GROUP_TABLE, &[0x3000]));
        memory.map(0x4000, xsdt_bytes(&GROUP_OEM, &GROUP_TABLE, &[0x3000]));
        memory.map(0x3000, table_bytes(b"APIC", 64, &GROUP_OEM, &GROUP_TABLE));

        let set = resolve_table_set(&memory, 0x1000).unwrap();
        propagate_identity(&mut memory, 0x1000, &set, &SOURCE, PatchBreadth::AllTables);
        let first = memory.snapshot();
        propagate_identity(&mut memory, 0x1000, &set, &SOURCE, PatchBreadth::AllTables);

        assert_eq!(memory.snapshot(), first);
    }

    #[test]
    fn legacy_mirror_is_a_noop_without_a_pointer() {
        let mut memory = FakeMemory::new();
        map_empty_legacy_windows(&mut memory);
        memory.map(0x1000, rsdp_bytes(2, &SOURCE.oem_id, 0x2000, 0x4000));
        let region = FakeLegacyRegion::new();
        let before = memory.snapshot();

        propagate_to_legacy_root(&mut memory, 0x1000, Some(&region));

        assert_eq!(memory.snapshot(), before);
        assert_eq!(region.unlocks(), 0);
        assert_eq!(region.locks(), 0);
    }

    #[test]
    fn legacy_mirror_copies_oem_id_and_addresses() {
        let mut memory = FakeMemory::new();
        map_empty_legacy_windows(&mut memory);
        let legacy = 0xE5000u64;
        memory.write(legacy, &rsdp_bytes(0, b"OLDOEM", 0x9999, 0));
        memory.map(0x1000, rsdp_bytes(2, &SOURCE.oem_id, 0x2000, 0x4000));
        let region = FakeLegacyRegion::new();

        propagate_to_legacy_root(&mut memory, 0x1000, Some(&region));

        let mirrored = memory.bytes(legacy, RSDP_SHORT_LEN);
        assert_eq!(&mirrored[RSDP_OEM_ID_OFFSET..RSDP_OEM_ID_OFFSET + 6], b"ABCDEF");
        assert_eq!(
            u32::from_le_bytes(mirrored[RSDP_RSDT_ADDRESS_OFFSET..RSDP_RSDT_ADDRESS_OFFSET + 4].try_into().unwrap()),
            0x2000
        );
        assert_eq!(sum_region(&memory, legacy, RSDP_SHORT_LEN), 0);
        // Revision 0 pointer: the extension stays untouched.
        assert_eq!(memory.bytes(legacy + 20, 16), vec![0u8; 16]);
        assert_eq!(region.unlocks(), 1);
        assert_eq!(region.locks(), 1);
    }

    #[test]
    fn legacy_mirror_extends_to_revision_two_pointers() {
        let mut memory = FakeMemory::new();
        map_empty_legacy_windows(&mut memory);
        let legacy = 0xE5000u64;
        memory.write(legacy, &rsdp_bytes(2, b"OLDOEM", 0x9999, 0x8888));
        memory.map(0x1000, rsdp_bytes(2, &SOURCE.oem_id, 0x2000, 0x4000));
        let region = FakeLegacyRegion::new();

        propagate_to_legacy_root(&mut memory, 0x1000, Some(&region));

        let mirrored = memory.bytes(legacy, mem::size_of::<Rsdp>());
        assert_eq!(
            u64::from_le_bytes(mirrored[RSDP_XSDT_ADDRESS_OFFSET..RSDP_XSDT_ADDRESS_OFFSET + 8].try_into().unwrap()),
            0x4000
        );
        assert_eq!(sum_region(&memory, legacy, RSDP_SHORT_LEN), 0);
        assert_eq!(sum_region(&memory, legacy, mem::size_of::<Rsdp>()), 0);
    }

    #[test]
    fn legacy_mirror_backs_off_when_unlock_is_denied() {
        let mut memory = FakeMemory::new();
        map_empty_legacy_windows(&mut memory);
        memory.write(0xE5000, &rsdp_bytes(0, b"OLDOEM", 0x9999, 0));
        memory.map(0x1000, rsdp_bytes(2, &SOURCE.oem_id, 0x2000, 0x4000));
        let region = FakeLegacyRegion::denying();
        let before = memory.snapshot();

        propagate_to_legacy_root(&mut memory, 0x1000, Some(&region));

        assert_eq!(memory.snapshot(), before);
        assert_eq!(region.locks(), 0);
    }

    #[test]
    fn legacy_mirror_requires_the_region_service() {
        let mut memory = FakeMemory::new();
        map_empty_legacy_windows(&mut memory);
        memory.write(0xE5000, &rsdp_bytes(0, b"OLDOEM", 0x9999, 0));
        memory.map(0x1000, rsdp_bytes(2, &SOURCE.oem_id, 0x2000, 0x4000));
        let before = memory.snapshot();

        propagate_to_legacy_root(&mut memory, 0x1000, None);

        assert_eq!(memory.snapshot(), before);
    }
}
