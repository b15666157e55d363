//! Component Constants.
//!
//! Table signatures, vendor GUIDs, variable names, field offsets, and the
//! fixed address windows used by the table engine. Only the root-pointer /
//! primary / extended table triad is described.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

use core::mem;

use r_efi::efi;

use crate::acpi_table::{AcpiTableHeader, Rsdp};

/// "RSD PTR " as a little-endian u64.
pub const RSDP_SIGNATURE: u64 = 0x2052_5450_2044_5352;

/// "SLIC" as a little-endian u32.
pub const SLIC: u32 = 0x4349_4C53;

pub(crate) const ACPI_HEADER_LEN: usize = 36;

/// Size of the ACPI 1.0 root descriptor; the short checksum covers exactly
/// these bytes on every revision.
pub(crate) const RSDP_SHORT_LEN: usize = 20;

pub(crate) const ACPI_LENGTH_OFFSET: usize = mem::offset_of!(AcpiTableHeader, length);
pub(crate) const ACPI_CHECKSUM_OFFSET: usize = mem::offset_of!(AcpiTableHeader, checksum);
pub(crate) const ACPI_OEM_ID_OFFSET: usize = mem::offset_of!(AcpiTableHeader, oem_id);
pub(crate) const ACPI_OEM_TABLE_ID_OFFSET: usize = mem::offset_of!(AcpiTableHeader, oem_table_id);

pub(crate) const RSDP_CHECKSUM_OFFSET: usize = mem::offset_of!(Rsdp, checksum);
pub(crate) const RSDP_OEM_ID_OFFSET: usize = mem::offset_of!(Rsdp, oem_id);
pub(crate) const RSDP_REVISION_OFFSET: usize = mem::offset_of!(Rsdp, revision);
pub(crate) const RSDP_RSDT_ADDRESS_OFFSET: usize = mem::offset_of!(Rsdp, rsdt_address);
pub(crate) const RSDP_LENGTH_OFFSET: usize = mem::offset_of!(Rsdp, length);
pub(crate) const RSDP_XSDT_ADDRESS_OFFSET: usize = mem::offset_of!(Rsdp, xsdt_address);
pub(crate) const RSDP_EXT_CHECKSUM_OFFSET: usize = mem::offset_of!(Rsdp, extended_checksum);

/// Primary scan window for the legacy root pointer.
pub(crate) const BIOS_RO_WINDOW_START: u64 = 0xE0000;
pub(crate) const BIOS_RO_WINDOW_END: u64 = 0xFFFFF;

/// BDA slot holding the 16-bit EBDA segment.
pub(crate) const EBDA_SEGMENT_PTR: u64 = 0x40E;
pub(crate) const EBDA_WINDOW_LEN: u64 = 0x400;

/// The root pointer is published on 16-byte boundaries.
pub(crate) const RSDP_SCAN_STRIDE: u64 = 16;

/// Write-protected BIOS shadow range bracketing legacy root mutation.
pub(crate) const LEGACY_REGION_BASE: u32 = 0xF0000;
pub(crate) const LEGACY_REGION_LEN: u32 = 0xFFFF;

/// Legacy-region class and alignment requested for the SLP string copy.
pub(crate) const SLP_REGION_CLASS: usize = 1;
pub(crate) const SLP_REGION_ALIGNMENT: usize = 2;
pub(crate) const SLP_STRING_MAX: usize = 0x20;

pub const ACPI_20_TABLE_GUID: efi::Guid =
    efi::Guid::from_fields(0x8868E871, 0xE4F1, 0x11D3, 0xBC, 0x22, &[0x00, 0x80, 0xC7, 0x3C, 0x88, 0x81]);

pub const ACPI_10_TABLE_GUID: efi::Guid =
    efi::Guid::from_fields(0xEB9D2D30, 0x2D88, 0x11D3, 0x9A, 0x16, &[0x00, 0x90, 0x27, 0x3F, 0xC1, 0x4D]);

/// Event group signaled when the boot manager is about to load an OS.
pub const READY_TO_BOOT_GUID: efi::Guid =
    efi::Guid::from_fields(0x7CE88FB3, 0x4BD7, 0x4679, 0x87, 0xA8, &[0xA8, 0xD8, 0xDE, 0xE5, 0x0D, 0x2B]);

/// Vendor namespace for the OEM activation variables.
pub const OA_VENDOR_GUID: efi::Guid =
    efi::Guid::from_fields(0xCDBB8E94, 0x1E32, 0x4C1A, 0x92, 0x1D, &[0x6F, 0x2A, 0x71, 0xD3, 0x0C, 0x55]);

pub(crate) const MARKER_VARIABLE: &str = "OaMarker";
pub(crate) const PUBLIC_KEY_VARIABLE: &str = "OaPublicKey";
pub(crate) const SLP_VARIABLE: &str = "OaSlpString";
pub(crate) const FAIL_SAFE_VARIABLE: &str = "OaFailSafe";
