//! Component entry and the patch sequence.
//!
//! The driver arms a ReadyToBoot callback at image entry; the whole
//! sequence then runs to completion inside that single callback. A
//! persisted one-byte fail-safe variable brackets the sequence: it is set
//! before the first input is fetched and cleared only after the sequence
//! returns, so a boot interrupted mid-patch leaves the module permanently
//! inert on later boots.

use core::ffi::c_void;
use core::ptr;

use r_efi::efi;
use spin::Once;

use crate::acpi::{find_root_descriptor, propagate_identity, propagate_to_legacy_root, resolve_table_set};
use crate::acpi_protocol::{StandardBootServices, StandardVariableStore};
use crate::acpi_table::OemIdentity;
use crate::config::{PatchBreadth, SlicConfig};
use crate::error::SlicError;
use crate::phys::{DirectPhysMemory, PhysMemory};
use crate::service::{AcpiTableVersion, BootServices, TplGuard, VariableAttributes, VariableStore};
use crate::signature::{
    FAIL_SAFE_VARIABLE, MARKER_VARIABLE, OA_VENDOR_GUID, PUBLIC_KEY_VARIABLE, READY_TO_BOOT_GUID,
    SLP_REGION_ALIGNMENT, SLP_REGION_CLASS, SLP_STRING_MAX, SLP_VARIABLE,
};
use crate::slic::{build_slic_table, marker_identity, MARKER_LEN, PUBLIC_KEY_LEN};

/// Orchestrates marker acquisition, SLIC registration, table patching, and
/// fail-safe bookkeeping.
pub struct SlicInstaller {
    config: SlicConfig,
}

impl SlicInstaller {
    pub fn new(config: SlicConfig) -> Self {
        Self { config }
    }

    /// Run the full sequence against the given firmware context.
    ///
    /// Missing or mis-sized marker/key inputs abort immediately and leave
    /// the fail-safe armed. Absent collaborator services only skip their
    /// own sub-operation.
    pub fn run<M, B, V>(&self, phys: &mut M, boot: &B, store: &V) -> Result<(), SlicError>
    where
        M: PhysMemory,
        B: BootServices + ?Sized,
        V: VariableStore + ?Sized,
    {
        let attributes = VariableAttributes::NON_VOLATILE | VariableAttributes::BOOTSERVICE_ACCESS;
        store.set_variable(FAIL_SAFE_VARIABLE, &OA_VENDOR_GUID, attributes, &[1])?;

        let marker = get_exact::<_, MARKER_LEN>(store, MARKER_VARIABLE)?;
        let public_key = get_exact::<_, PUBLIC_KEY_LEN>(store, PUBLIC_KEY_VARIABLE)?;

        let table = build_slic_table(&public_key, &marker);
        let source = marker_identity(&marker);

        self.register_table(boot, &table);

        if self.config.inject_slp {
            self.inject_slp_string(boot, store);
        }

        if self.config.breadth != PatchBreadth::Untouched {
            if let Err(error) = self.patch_tables(phys, boot, &source) {
                log::warn!("table patch phase aborted: {error:?}");
            }
        }

        store.set_variable(FAIL_SAFE_VARIABLE, &OA_VENDOR_GUID, attributes, &[0])?;
        Ok(())
    }

    /// Hand the assembled SLIC to the platform registration service for all
    /// three supported spec revisions.
    fn register_table<B: BootServices + ?Sized>(&self, boot: &B, table: &[u8]) {
        let Some(acpi) = boot.acpi_support() else {
            log::warn!("table registration service not published, skipping");
            return;
        };
        let versions = AcpiTableVersion::V1_0B | AcpiTableVersion::V2_0 | AcpiTableVersion::V3_0;
        match acpi.set_acpi_table(table, versions) {
            Ok(handle) => log::debug!("SLIC registered, handle {handle:#x}"),
            Err(error) => log::warn!("SLIC registration failed: {error:?}"),
        }
    }

    /// Copy the SLP 1.0 string into a reserved legacy region. Every failure
    /// here is a silent skip.
    fn inject_slp_string<B, V>(&self, boot: &B, store: &V)
    where
        B: BootServices + ?Sized,
        V: VariableStore + ?Sized,
    {
        let mut slp = [0u8; SLP_STRING_MAX];
        let Ok(length) = store.get_variable(SLP_VARIABLE, &OA_VENDOR_GUID, &mut slp) else {
            return;
        };
        let Some(bios) = boot.legacy_bios() else {
            return;
        };
        let Ok(address) = bios.get_legacy_region(slp.len(), SLP_REGION_CLASS, SLP_REGION_ALIGNMENT) else {
            return;
        };
        let _ = bios.copy_legacy_region(address, &slp[..length]);
    }

    /// Rewrite the discovery structures with the source identity, modern
    /// copies first, then the legacy mirror.
    fn patch_tables<M, B>(&self, phys: &mut M, boot: &B, source: &OemIdentity) -> Result<(), SlicError>
    where
        M: PhysMemory,
        B: BootServices + ?Sized,
    {
        // Other firmware handlers must not observe the tables while their
        // checksums are in flight.
        let _tpl = TplGuard::raise(boot, efi::TPL_HIGH_LEVEL);

        let rsdp = find_root_descriptor(boot).ok_or(SlicError::RootDescriptorNotFound)?;
        let set = resolve_table_set(phys, rsdp)?;
        propagate_identity(phys, rsdp, &set, source, self.config.breadth);
        propagate_to_legacy_root(phys, rsdp, boot.legacy_region());
        Ok(())
    }
}

/// Fetch a variable whose stored size must match `N` exactly.
fn get_exact<V: VariableStore + ?Sized, const N: usize>(store: &V, name: &str) -> Result<[u8; N], SlicError> {
    let mut buf = [0u8; N];
    let length = store.get_variable(name, &OA_VENDOR_GUID, &mut buf)?;
    if length != N {
        return Err(SlicError::VariableSizeMismatch);
    }
    Ok(buf)
}

/// Whether a previous run was interrupted before it could clear the flag.
pub(crate) fn fail_safe_engaged<V: VariableStore + ?Sized>(store: &V) -> bool {
    let mut flag = [0u8; 1];
    match store.get_variable(FAIL_SAFE_VARIABLE, &OA_VENDOR_GUID, &mut flag) {
        Ok(1) => flag[0] != 0,
        _ => false,
    }
}

struct DriverContext {
    installer: SlicInstaller,
    system_table: *mut efi::SystemTable,
}

// SAFETY: firmware event dispatch is serialized and the context is written
// once at entry; the raw system-table pointer never crosses threads.
unsafe impl Send for DriverContext {}
unsafe impl Sync for DriverContext {}

static DRIVER: Once<DriverContext> = Once::new();

/// Driver image entry.
///
/// Inert when the fail-safe byte from a previous interrupted run is still
/// set; otherwise registers the ReadyToBoot callback that runs the
/// sequence.
pub extern "efiapi" fn entry_point(_image_handle: efi::Handle, system_table: *mut efi::SystemTable) -> efi::Status {
    if system_table.is_null() {
        return efi::Status::INVALID_PARAMETER;
    }

    // SAFETY: the firmware hands a valid system table to the image entry.
    let store = unsafe { StandardVariableStore::new((*system_table).runtime_services) };
    if fail_safe_engaged(&store) {
        return efi::Status::SUCCESS;
    }

    DRIVER.call_once(|| DriverContext { installer: SlicInstaller::new(SlicConfig::default()), system_table });

    let mut event: efi::Event = ptr::null_mut();
    // SAFETY: system table validity per the image-entry contract.
    unsafe {
        ((*(*system_table).boot_services).create_event_ex)(
            efi::EVT_NOTIFY_SIGNAL,
            efi::TPL_NOTIFY,
            Some(on_ready_to_boot),
            ptr::null(),
            &READY_TO_BOOT_GUID,
            &mut event,
        )
    }
}

extern "efiapi" fn on_ready_to_boot(_event: efi::Event, _context: *mut c_void) {
    let Some(driver) = DRIVER.get() else {
        return;
    };
    // SAFETY: the context carries the system table from image entry and
    // boot services are still available at ReadyToBoot.
    let boot = unsafe { StandardBootServices::new(driver.system_table) };
    let store = unsafe { StandardVariableStore::new((*driver.system_table).runtime_services) };
    let mut phys = DirectPhysMemory;
    if let Err(error) = driver.installer.run(&mut phys, &boot, &store) {
        log::warn!("SLIC sequence aborted: {error:?}");
    }
}
