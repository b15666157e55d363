//! C Protocol Definitions.
//!
//! Raw wrappers for the C protocols this component calls, plus the
//! live-firmware implementations of the `service` traits backed by the
//! system table handed to the driver at entry.

use alloc::vec::Vec;
use core::ffi::c_void;
use core::ptr::{self, NonNull};

use r_efi::efi;

use crate::acpi_table::equal_identity;
use crate::error::SlicError;
use crate::service::{
    AcpiSupport, AcpiTableVersion, BootServices, LegacyBios, LegacyRegion, VariableAttributes, VariableStore,
};

// C function interfaces for the consumed protocol members.
type AcpiTableGet =
    extern "efiapi" fn(*const AcpiSupportProtocol, isize, *mut *mut c_void, *mut u32, *mut usize) -> efi::Status;
type AcpiTableSet =
    extern "efiapi" fn(*const AcpiSupportProtocol, *mut c_void, efi::Boolean, u32, *mut usize) -> efi::Status;
type AcpiTablePublish = extern "efiapi" fn(*const AcpiSupportProtocol, u32) -> efi::Status;
type RegionDecode =
    extern "efiapi" fn(*const LegacyRegionProtocol, u32, u32, *mut u32, *mut efi::Boolean) -> efi::Status;
type RegionLockChange = extern "efiapi" fn(*const LegacyRegionProtocol, u32, u32, *mut u32) -> efi::Status;
type BiosRegionGet =
    extern "efiapi" fn(*const LegacyBiosProtocol, usize, usize, usize, *mut *mut c_void) -> efi::Status;
type BiosRegionCopy = extern "efiapi" fn(*const LegacyBiosProtocol, usize, *mut c_void, *mut c_void) -> efi::Status;

/// Framework ACPI support protocol; only `SetAcpiTable` is consumed.
#[repr(C)]
pub(crate) struct AcpiSupportProtocol {
    _get_acpi_table: AcpiTableGet,
    set_acpi_table: AcpiTableSet,
    _publish_tables: AcpiTablePublish,
}

impl AcpiSupportProtocol {
    pub(crate) const PROTOCOL_GUID: efi::Guid =
        efi::Guid::from_fields(0xDBFF9D55, 0x89B7, 0x46DA, 0xBD, 0xDF, &[0x67, 0x7D, 0x3D, 0xC0, 0x24, 0x1D]);
}

/// Framework legacy-region protocol controlling BIOS shadow write protection.
#[repr(C)]
pub(crate) struct LegacyRegionProtocol {
    _decode: RegionDecode,
    unlock: RegionLockChange,
    _boot_lock: RegionLockChange,
    lock: RegionLockChange,
}

impl LegacyRegionProtocol {
    pub(crate) const PROTOCOL_GUID: efi::Guid =
        efi::Guid::from_fields(0x0FC9013A, 0x0568, 0x4BA9, 0x9B, 0x7E, &[0xC9, 0xC3, 0x90, 0xA6, 0x60, 0x9B]);
}

/// CSM legacy-BIOS protocol, reduced to the two entries this component
/// calls. The leading members stay opaque slots so the call table lines up
/// with the C definition.
#[repr(C)]
pub(crate) struct LegacyBiosProtocol {
    _reserved: [*const c_void; 9],
    get_legacy_region: BiosRegionGet,
    copy_legacy_region: BiosRegionCopy,
}

impl LegacyBiosProtocol {
    pub(crate) const PROTOCOL_GUID: efi::Guid =
        efi::Guid::from_fields(0xDB9A1E3D, 0x45CB, 0x4ABB, 0x85, 0x3B, &[0xE5, 0x38, 0x7F, 0xDB, 0x2E, 0x2D]);
}

pub(crate) struct StandardAcpiSupport {
    protocol: NonNull<AcpiSupportProtocol>,
}

impl AcpiSupport for StandardAcpiSupport {
    fn set_acpi_table(&self, table: &[u8], versions: AcpiTableVersion) -> Result<usize, SlicError> {
        let mut handle = 0usize;
        let protocol = self.protocol.as_ptr();
        // SAFETY: the protocol interface was produced by LocateProtocol at
        // construction and stays valid while boot services do; the table
        // buffer outlives the call.
        let status = unsafe {
            ((*protocol).set_acpi_table)(
                protocol,
                table.as_ptr() as *mut c_void,
                true.into(),
                versions.bits(),
                &mut handle,
            )
        };
        if status == efi::Status::SUCCESS {
            Ok(handle)
        } else {
            Err(SlicError::RegistrationFailed)
        }
    }
}

pub(crate) struct StandardLegacyRegion {
    protocol: NonNull<LegacyRegionProtocol>,
}

impl LegacyRegion for StandardLegacyRegion {
    fn unlock(&self, start: u32, length: u32) -> Result<(), SlicError> {
        let mut granularity = 0u32;
        let protocol = self.protocol.as_ptr();
        // SAFETY: protocol interface validity per construction.
        let status = unsafe { ((*protocol).unlock)(protocol, start, length, &mut granularity) };
        if status == efi::Status::SUCCESS {
            Ok(())
        } else {
            Err(SlicError::LegacyRegionDenied)
        }
    }

    fn lock(&self, start: u32, length: u32) -> Result<(), SlicError> {
        let mut granularity = 0u32;
        let protocol = self.protocol.as_ptr();
        // SAFETY: protocol interface validity per construction.
        let status = unsafe { ((*protocol).lock)(protocol, start, length, &mut granularity) };
        if status == efi::Status::SUCCESS {
            Ok(())
        } else {
            Err(SlicError::LegacyRegionDenied)
        }
    }
}

pub(crate) struct StandardLegacyBios {
    protocol: NonNull<LegacyBiosProtocol>,
}

impl LegacyBios for StandardLegacyBios {
    fn get_legacy_region(&self, length: usize, region: usize, alignment: usize) -> Result<u64, SlicError> {
        let mut address: *mut c_void = ptr::null_mut();
        let protocol = self.protocol.as_ptr();
        // SAFETY: protocol interface validity per construction.
        let status = unsafe { ((*protocol).get_legacy_region)(protocol, length, region, alignment, &mut address) };
        if status == efi::Status::SUCCESS && !address.is_null() {
            Ok(address as u64)
        } else {
            Err(SlicError::LegacyCopyFailed)
        }
    }

    fn copy_legacy_region(&self, address: u64, data: &[u8]) -> Result<(), SlicError> {
        let protocol = self.protocol.as_ptr();
        // SAFETY: protocol interface validity per construction; the source
        // buffer outlives the call.
        let status = unsafe {
            ((*protocol).copy_legacy_region)(
                protocol,
                data.len(),
                address as usize as *mut c_void,
                data.as_ptr() as *mut c_void,
            )
        };
        if status == efi::Status::SUCCESS {
            Ok(())
        } else {
            Err(SlicError::LegacyCopyFailed)
        }
    }
}

/// Boot services over the live system table.
pub(crate) struct StandardBootServices {
    system_table: NonNull<efi::SystemTable>,
    acpi_support: Option<StandardAcpiSupport>,
    legacy_region: Option<StandardLegacyRegion>,
    legacy_bios: Option<StandardLegacyBios>,
}

impl StandardBootServices {
    /// Locate the optional collaborator protocols up front.
    ///
    /// ## Safety
    ///
    /// `system_table` must be the valid system table handed to the driver
    /// entry point, with boot services still available.
    pub(crate) unsafe fn new(system_table: *mut efi::SystemTable) -> Self {
        // SAFETY: non-null and valid per the function contract.
        let boot_services = unsafe { (*system_table).boot_services };
        Self {
            // SAFETY: non-null per the function contract.
            system_table: unsafe { NonNull::new_unchecked(system_table) },
            acpi_support: Self::locate(boot_services, &AcpiSupportProtocol::PROTOCOL_GUID)
                .map(|protocol| StandardAcpiSupport { protocol }),
            legacy_region: Self::locate(boot_services, &LegacyRegionProtocol::PROTOCOL_GUID)
                .map(|protocol| StandardLegacyRegion { protocol }),
            legacy_bios: Self::locate(boot_services, &LegacyBiosProtocol::PROTOCOL_GUID)
                .map(|protocol| StandardLegacyBios { protocol }),
        }
    }

    fn locate<T>(boot_services: *mut efi::BootServices, guid: &efi::Guid) -> Option<NonNull<T>> {
        let mut guid = *guid;
        let mut interface: *mut c_void = ptr::null_mut();
        // SAFETY: boot services pointer validity per the `new` contract.
        let status = unsafe { ((*boot_services).locate_protocol)(&mut guid, ptr::null_mut(), &mut interface) };
        if status == efi::Status::SUCCESS {
            NonNull::new(interface.cast())
        } else {
            None
        }
    }
}

impl BootServices for StandardBootServices {
    fn configuration_table(&self, guid: &efi::Guid) -> Option<u64> {
        // SAFETY: the system table stays valid per the `new` contract; the
        // registry is an array of `number_of_table_entries` entries.
        let st = unsafe { self.system_table.as_ref() };
        if st.configuration_table.is_null() {
            return None;
        }
        let entries = unsafe { core::slice::from_raw_parts(st.configuration_table, st.number_of_table_entries) };
        entries.iter().find(|entry| equal_identity(&entry.vendor_guid, guid)).map(|entry| entry.vendor_table as u64)
    }

    fn raise_tpl(&self, tpl: efi::Tpl) -> efi::Tpl {
        // SAFETY: system table validity per the `new` contract.
        unsafe { ((*self.system_table.as_ref().boot_services).raise_tpl)(tpl) }
    }

    fn restore_tpl(&self, tpl: efi::Tpl) {
        // SAFETY: system table validity per the `new` contract.
        unsafe { ((*self.system_table.as_ref().boot_services).restore_tpl)(tpl) }
    }

    fn acpi_support(&self) -> Option<&dyn AcpiSupport> {
        self.acpi_support.as_ref().map(|service| service as &dyn AcpiSupport)
    }

    fn legacy_region(&self) -> Option<&dyn LegacyRegion> {
        self.legacy_region.as_ref().map(|service| service as &dyn LegacyRegion)
    }

    fn legacy_bios(&self) -> Option<&dyn LegacyBios> {
        self.legacy_bios.as_ref().map(|service| service as &dyn LegacyBios)
    }
}

/// Variable store over the live runtime services.
pub(crate) struct StandardVariableStore {
    runtime_services: NonNull<efi::RuntimeServices>,
}

impl StandardVariableStore {
    /// ## Safety
    ///
    /// `runtime_services` must be the valid runtime services table from the
    /// system table handed to the driver entry point.
    pub(crate) unsafe fn new(runtime_services: *mut efi::RuntimeServices) -> Self {
        // SAFETY: non-null per the function contract.
        Self { runtime_services: unsafe { NonNull::new_unchecked(runtime_services) } }
    }
}

fn utf16_name(name: &str) -> Vec<u16> {
    name.encode_utf16().chain(core::iter::once(0)).collect()
}

impl VariableStore for StandardVariableStore {
    fn get_variable(&self, name: &str, vendor: &efi::Guid, buf: &mut [u8]) -> Result<usize, SlicError> {
        let mut name = utf16_name(name);
        let mut vendor = *vendor;
        let mut size = buf.len();
        let rt = self.runtime_services.as_ptr();
        // SAFETY: runtime services validity per construction; all out
        // parameters point at locals or the caller's buffer.
        let status = unsafe {
            ((*rt).get_variable)(name.as_mut_ptr(), &mut vendor, ptr::null_mut(), &mut size, buf.as_mut_ptr().cast())
        };
        if status == efi::Status::SUCCESS {
            Ok(size)
        } else if status == efi::Status::BUFFER_TOO_SMALL {
            Err(SlicError::VariableSizeMismatch)
        } else {
            Err(SlicError::VariableNotFound)
        }
    }

    fn set_variable(
        &self,
        name: &str,
        vendor: &efi::Guid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), SlicError> {
        let mut name = utf16_name(name);
        let mut vendor = *vendor;
        let rt = self.runtime_services.as_ptr();
        // SAFETY: runtime services validity per construction; the data
        // buffer outlives the call.
        let status = unsafe {
            ((*rt).set_variable)(
                name.as_mut_ptr(),
                &mut vendor,
                attributes.bits(),
                data.len(),
                data.as_ptr() as *mut c_void,
            )
        };
        if status == efi::Status::SUCCESS {
            Ok(())
        } else {
            Err(SlicError::VariableNotFound)
        }
    }
}
