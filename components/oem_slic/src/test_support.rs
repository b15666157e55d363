//! In-memory fixtures for the table engine and sequence tests.
//!
//! `FakeMemory` stands in for the firmware-owned physical address space and
//! panics on any access outside its mapped regions, so tests double as
//! bounds audits of the engine. The fake services record every call for
//! assertion.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use r_efi::efi;

use alloc::collections::BTreeMap;

use crate::acpi_table::{checksum, equal_identity, AcpiTableHeader};
use crate::error::SlicError;
use crate::phys::PhysMemory;
use crate::service::{AcpiSupport, AcpiTableVersion, BootServices, LegacyBios, LegacyRegion, VariableAttributes, VariableStore};
use crate::signature::{ACPI_CHECKSUM_OFFSET, ACPI_HEADER_LEN, RSDP_SIGNATURE};
use crate::slic::MARKER_LEN;

pub(crate) struct FakeMemory {
    regions: Vec<(u64, Vec<u8>)>,
}

impl FakeMemory {
    pub(crate) fn new() -> Self {
        Self { regions: Vec::new() }
    }

    /// Map `bytes` at `base`. Regions must not overlap.
    pub(crate) fn map(&mut self, base: u64, bytes: Vec<u8>) {
        self.regions.push((base, bytes));
    }

    pub(crate) fn bytes(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read(addr, &mut out);
        out
    }

    pub(crate) fn snapshot(&self) -> Vec<(u64, Vec<u8>)> {
        self.regions.clone()
    }

    fn locate(&self, addr: u64, len: usize) -> (usize, usize) {
        for (index, (base, bytes)) in self.regions.iter().enumerate() {
            if addr >= *base && addr + len as u64 <= *base + bytes.len() as u64 {
                return (index, (addr - base) as usize);
            }
        }
        panic!("access outside mapped fixture memory: {addr:#x}+{len:#x}");
    }
}

impl PhysMemory for FakeMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) {
        let (index, offset) = self.locate(addr, buf.len());
        buf.copy_from_slice(&self.regions[index].1[offset..offset + buf.len()]);
    }

    fn write(&mut self, addr: u64, bytes: &[u8]) {
        let (index, offset) = self.locate(addr, bytes.len());
        self.regions[index].1[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

/// Byte sum of a mapped range, zero when a checksum is consistent.
pub(crate) fn sum_region(memory: &FakeMemory, base: u64, len: usize) -> u8 {
    memory.bytes(base, len).iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// A minimal table: header with the given identity, zeroed payload, valid
/// checksum over `total_len`.
pub(crate) fn table_bytes(signature: &[u8; 4], total_len: usize, oem_id: &[u8; 6], oem_table_id: &[u8; 8]) -> Vec<u8> {
    let header = AcpiTableHeader {
        signature: u32::from_le_bytes(*signature),
        length: total_len as u32,
        revision: 1,
        checksum: 0,
        oem_id: *oem_id,
        oem_table_id: *oem_table_id,
        oem_revision: 1,
        creator_id: 0,
        creator_revision: 0,
    };
    let mut bytes = vec![0u8; total_len];
    bytes[..ACPI_HEADER_LEN].copy_from_slice(&header.to_bytes());
    bytes[ACPI_CHECKSUM_OFFSET] = checksum(&bytes);
    bytes
}

pub(crate) fn rsdt_bytes(oem_id: &[u8; 6], oem_table_id: &[u8; 8], entries: &[u32]) -> Vec<u8> {
    let mut bytes = table_bytes(b"RSDT", ACPI_HEADER_LEN + entries.len() * 4, oem_id, oem_table_id);
    for (index, entry) in entries.iter().enumerate() {
        let offset = ACPI_HEADER_LEN + index * 4;
        bytes[offset..offset + 4].copy_from_slice(&entry.to_le_bytes());
    }
    bytes[ACPI_CHECKSUM_OFFSET] = 0;
    bytes[ACPI_CHECKSUM_OFFSET] = checksum(&bytes);
    bytes
}

pub(crate) fn xsdt_bytes(oem_id: &[u8; 6], oem_table_id: &[u8; 8], entries: &[u64]) -> Vec<u8> {
    let mut bytes = table_bytes(b"XSDT", ACPI_HEADER_LEN + entries.len() * 8, oem_id, oem_table_id);
    for (index, entry) in entries.iter().enumerate() {
        let offset = ACPI_HEADER_LEN + index * 8;
        bytes[offset..offset + 8].copy_from_slice(&entry.to_le_bytes());
    }
    bytes[ACPI_CHECKSUM_OFFSET] = 0;
    bytes[ACPI_CHECKSUM_OFFSET] = checksum(&bytes);
    bytes
}

/// A root descriptor: 20 bytes for revision 0, the full 36 for revision 2,
/// checksums valid either way.
pub(crate) fn rsdp_bytes(revision: u8, oem_id: &[u8; 6], rsdt: u32, xsdt: u64) -> Vec<u8> {
    let mut bytes = vec![0u8; if revision >= 2 { 36 } else { 20 }];
    bytes[0..8].copy_from_slice(&RSDP_SIGNATURE.to_le_bytes());
    bytes[9..15].copy_from_slice(oem_id);
    bytes[15] = revision;
    bytes[16..20].copy_from_slice(&rsdt.to_le_bytes());
    if revision >= 2 {
        bytes[20..24].copy_from_slice(&36u32.to_le_bytes());
        bytes[24..32].copy_from_slice(&xsdt.to_le_bytes());
    }
    bytes[8] = checksum(&bytes[..20]);
    if revision >= 2 {
        bytes[32] = checksum(&bytes);
    }
    bytes
}

/// A marker record carrying the given identity pair at the fixed offsets.
pub(crate) fn marker_bytes(oem_id: &[u8; 6], oem_table_id: &[u8; 8]) -> Vec<u8> {
    let mut marker = vec![0u8; MARKER_LEN];
    marker[0..4].copy_from_slice(&1u32.to_le_bytes());
    marker[4..8].copy_from_slice(&(MARKER_LEN as u32).to_le_bytes());
    marker[12..18].copy_from_slice(oem_id);
    marker[18..26].copy_from_slice(oem_table_id);
    marker[26..34].copy_from_slice(b"WINDOWS ");
    marker
}

pub(crate) struct FakeVariableStore {
    vars: RefCell<BTreeMap<String, Vec<u8>>>,
}

impl FakeVariableStore {
    pub(crate) fn new() -> Self {
        Self { vars: RefCell::new(BTreeMap::new()) }
    }

    pub(crate) fn insert(&self, name: &str, data: Vec<u8>) {
        self.vars.borrow_mut().insert(String::from(name), data);
    }

    pub(crate) fn remove(&self, name: &str) {
        self.vars.borrow_mut().remove(name);
    }

    pub(crate) fn value(&self, name: &str) -> Option<Vec<u8>> {
        self.vars.borrow().get(name).cloned()
    }
}

impl VariableStore for FakeVariableStore {
    fn get_variable(&self, name: &str, _vendor: &efi::Guid, buf: &mut [u8]) -> Result<usize, SlicError> {
        let vars = self.vars.borrow();
        let Some(data) = vars.get(name) else {
            return Err(SlicError::VariableNotFound);
        };
        if data.len() > buf.len() {
            return Err(SlicError::VariableSizeMismatch);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn set_variable(
        &self,
        name: &str,
        _vendor: &efi::Guid,
        _attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), SlicError> {
        self.vars.borrow_mut().insert(String::from(name), data.to_vec());
        Ok(())
    }
}

pub(crate) struct FakeAcpiSupport {
    pub(crate) registered: RefCell<Vec<(Vec<u8>, u32)>>,
    deny: bool,
}

impl FakeAcpiSupport {
    pub(crate) fn new() -> Self {
        Self { registered: RefCell::new(Vec::new()), deny: false }
    }

    pub(crate) fn denying() -> Self {
        Self { registered: RefCell::new(Vec::new()), deny: true }
    }
}

impl AcpiSupport for FakeAcpiSupport {
    fn set_acpi_table(&self, table: &[u8], versions: AcpiTableVersion) -> Result<usize, SlicError> {
        if self.deny {
            return Err(SlicError::RegistrationFailed);
        }
        self.registered.borrow_mut().push((table.to_vec(), versions.bits()));
        Ok(self.registered.borrow().len())
    }
}

pub(crate) struct FakeLegacyRegion {
    unlocks: Cell<u32>,
    locks: Cell<u32>,
    deny_unlock: bool,
}

impl FakeLegacyRegion {
    pub(crate) fn new() -> Self {
        Self { unlocks: Cell::new(0), locks: Cell::new(0), deny_unlock: false }
    }

    pub(crate) fn denying() -> Self {
        Self { unlocks: Cell::new(0), locks: Cell::new(0), deny_unlock: true }
    }

    pub(crate) fn unlocks(&self) -> u32 {
        self.unlocks.get()
    }

    pub(crate) fn locks(&self) -> u32 {
        self.locks.get()
    }
}

impl LegacyRegion for FakeLegacyRegion {
    fn unlock(&self, _start: u32, _length: u32) -> Result<(), SlicError> {
        if self.deny_unlock {
            return Err(SlicError::LegacyRegionDenied);
        }
        self.unlocks.set(self.unlocks.get() + 1);
        Ok(())
    }

    fn lock(&self, _start: u32, _length: u32) -> Result<(), SlicError> {
        self.locks.set(self.locks.get() + 1);
        Ok(())
    }
}

pub(crate) struct FakeLegacyBios {
    base: u64,
    pub(crate) reservations: RefCell<Vec<(usize, usize, usize)>>,
    pub(crate) copies: RefCell<Vec<(u64, Vec<u8>)>>,
}

impl FakeLegacyBios {
    pub(crate) fn at(base: u64) -> Self {
        Self { base, reservations: RefCell::new(Vec::new()), copies: RefCell::new(Vec::new()) }
    }
}

impl LegacyBios for FakeLegacyBios {
    fn get_legacy_region(&self, length: usize, region: usize, alignment: usize) -> Result<u64, SlicError> {
        self.reservations.borrow_mut().push((length, region, alignment));
        Ok(self.base)
    }

    fn copy_legacy_region(&self, address: u64, data: &[u8]) -> Result<(), SlicError> {
        self.copies.borrow_mut().push((address, data.to_vec()));
        Ok(())
    }
}

pub(crate) struct FakeBootServices {
    pub(crate) config_tables: Vec<(efi::Guid, u64)>,
    pub(crate) acpi: Option<FakeAcpiSupport>,
    pub(crate) region: Option<FakeLegacyRegion>,
    pub(crate) bios: Option<FakeLegacyBios>,
    tpl: Cell<efi::Tpl>,
    max_tpl: Cell<efi::Tpl>,
}

impl FakeBootServices {
    pub(crate) fn new() -> Self {
        Self {
            config_tables: Vec::new(),
            acpi: None,
            region: None,
            bios: None,
            tpl: Cell::new(efi::TPL_APPLICATION),
            max_tpl: Cell::new(efi::TPL_APPLICATION),
        }
    }

    pub(crate) fn current_tpl(&self) -> efi::Tpl {
        self.tpl.get()
    }

    pub(crate) fn max_tpl(&self) -> efi::Tpl {
        self.max_tpl.get()
    }
}

impl BootServices for FakeBootServices {
    fn configuration_table(&self, guid: &efi::Guid) -> Option<u64> {
        self.config_tables.iter().find(|(vendor, _)| equal_identity(vendor, guid)).map(|(_, table)| *table)
    }

    fn raise_tpl(&self, tpl: efi::Tpl) -> efi::Tpl {
        let previous = self.tpl.replace(tpl);
        if tpl > self.max_tpl.get() {
            self.max_tpl.set(tpl);
        }
        previous
    }

    fn restore_tpl(&self, tpl: efi::Tpl) {
        self.tpl.set(tpl);
    }

    fn acpi_support(&self) -> Option<&dyn AcpiSupport> {
        self.acpi.as_ref().map(|service| service as &dyn AcpiSupport)
    }

    fn legacy_region(&self) -> Option<&dyn LegacyRegion> {
        self.region.as_ref().map(|service| service as &dyn LegacyRegion)
    }

    fn legacy_bios(&self) -> Option<&dyn LegacyBios> {
        self.bios.as_ref().map(|service| service as &dyn LegacyBios)
    }
}
