//! Firmware Collaborator Contracts.
//!
//! The component never owns the structures it edits; these traits are the
//! seams to the platform that does. Production implementations over the
//! live system table live in `acpi_protocol.rs`; tests substitute
//! std-backed fakes.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use r_efi::efi;

use crate::error::SlicError;
use crate::signature::{LEGACY_REGION_BASE, LEGACY_REGION_LEN};

bitflags::bitflags! {
    /// ACPI specification revisions a registered table applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AcpiTableVersion: u32 {
        const V1_0B = 1 << 1;
        const V2_0 = 1 << 2;
        const V3_0 = 1 << 3;
    }
}

bitflags::bitflags! {
    /// UEFI variable attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VariableAttributes: u32 {
        const NON_VOLATILE = 0x00000001;
        const BOOTSERVICE_ACCESS = 0x00000002;
        const RUNTIME_ACCESS = 0x00000004;
    }
}

/// Boot-time firmware services consumed by the component.
pub trait BootServices {
    /// Look up a vendor table in the firmware configuration-table registry.
    fn configuration_table(&self, guid: &efi::Guid) -> Option<u64>;

    /// Raise the task priority level, returning the previous level.
    fn raise_tpl(&self, tpl: efi::Tpl) -> efi::Tpl;

    fn restore_tpl(&self, tpl: efi::Tpl);

    /// Capability lookups; `None` when the platform does not publish the
    /// protocol.
    fn acpi_support(&self) -> Option<&dyn AcpiSupport>;
    fn legacy_region(&self) -> Option<&dyn LegacyRegion>;
    fn legacy_bios(&self) -> Option<&dyn LegacyBios>;
}

/// Persistent variable store backed by runtime services.
pub trait VariableStore {
    /// Read `name` into `buf`, returning the stored size. A store larger
    /// than `buf` is a size mismatch, not a partial read.
    fn get_variable(&self, name: &str, vendor: &efi::Guid, buf: &mut [u8]) -> Result<usize, SlicError>;

    fn set_variable(
        &self,
        name: &str,
        vendor: &efi::Guid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), SlicError>;
}

/// Table registration service: register-by-buffer for a set of ACPI
/// specification revisions, returning an opaque handle.
pub trait AcpiSupport {
    fn set_acpi_table(&self, table: &[u8], versions: AcpiTableVersion) -> Result<usize, SlicError>;
}

/// Lock control over the write-protected BIOS shadow range.
pub trait LegacyRegion {
    fn unlock(&self, start: u32, length: u32) -> Result<(), SlicError>;
    fn lock(&self, start: u32, length: u32) -> Result<(), SlicError>;
}

/// Legacy-BIOS copy service: reserve space in a legacy region, then copy a
/// buffer into it.
pub trait LegacyBios {
    fn get_legacy_region(&self, length: usize, region: usize, alignment: usize) -> Result<u64, SlicError>;
    fn copy_legacy_region(&self, address: u64, data: &[u8]) -> Result<(), SlicError>;
}

/// Scoped TPL raise; the previous level is restored on drop, so every exit
/// path out of the patch phase lowers priority again.
pub(crate) struct TplGuard<'a, B: BootServices + ?Sized> {
    boot: &'a B,
    previous: efi::Tpl,
}

impl<'a, B: BootServices + ?Sized> TplGuard<'a, B> {
    pub(crate) fn raise(boot: &'a B, tpl: efi::Tpl) -> Self {
        let previous = boot.raise_tpl(tpl);
        Self { boot, previous }
    }
}

impl<B: BootServices + ?Sized> Drop for TplGuard<'_, B> {
    fn drop(&mut self) {
        self.boot.restore_tpl(self.previous);
    }
}

/// Scoped unlock of the legacy BIOS shadow range.
///
/// Construction fails if the range cannot be unlocked, in which case the
/// caller must not write into it. Once constructed, re-locking is attempted
/// unconditionally on drop.
pub(crate) struct LegacyRegionGuard<'a> {
    region: &'a dyn LegacyRegion,
}

impl<'a> LegacyRegionGuard<'a> {
    pub(crate) fn unlock(region: &'a dyn LegacyRegion) -> Result<Self, SlicError> {
        region.unlock(LEGACY_REGION_BASE, LEGACY_REGION_LEN)?;
        Ok(Self { region })
    }
}

impl Drop for LegacyRegionGuard<'_> {
    fn drop(&mut self) {
        let _ = self.region.lock(LEGACY_REGION_BASE, LEGACY_REGION_LEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeBootServices, FakeLegacyRegion};

    #[test]
    fn tpl_guard_restores_on_every_exit() {
        let boot = FakeBootServices::new();
        {
            let _guard = TplGuard::raise(&boot, efi::TPL_HIGH_LEVEL);
            assert_eq!(boot.current_tpl(), efi::TPL_HIGH_LEVEL);
        }
        assert_eq!(boot.current_tpl(), efi::TPL_APPLICATION);
    }

    #[test]
    fn legacy_guard_relocks_on_drop() {
        let region = FakeLegacyRegion::new();
        {
            let _guard = LegacyRegionGuard::unlock(&region).expect("unlock should succeed");
            assert_eq!(region.unlocks(), 1);
            assert_eq!(region.locks(), 0);
        }
        assert_eq!(region.locks(), 1);
    }

    #[test]
    fn denied_unlock_never_produces_a_guard() {
        let region = FakeLegacyRegion::denying();
        assert!(LegacyRegionGuard::unlock(&region).is_err());
        assert_eq!(region.locks(), 0);
    }

    #[test]
    fn registration_version_mask_covers_three_revisions() {
        let all = AcpiTableVersion::V1_0B | AcpiTableVersion::V2_0 | AcpiTableVersion::V3_0;
        assert_eq!(all.bits(), (1 << 1) | (1 << 2) | (1 << 3));
    }
}
