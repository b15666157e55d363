//! Source Table Assembly.
//!
//! Builds the SLIC registration buffer out of the two records held in
//! configuration storage. Both records are opaque vendor blobs to this
//! component: they are size-checked, never validated, and copied verbatim
//! into the table body. Only the marker's OEM identity pair is interpreted,
//! because it becomes the propagation source for the patch phase.
//!
//! Record layouts (fixed, little-endian):
//!
//! - public key, 0x9C bytes: type, length, key type/version, algorithm,
//!   "RSA1" magic, bit length, exponent, 128-byte modulus.
//! - marker, 0xB6 bytes: type, length, version, OEM id (offset 12),
//!   OEM table id (offset 18), "WINDOWS " flag, SLIC version, reserved,
//!   128-byte signature.

use alloc::vec::Vec;

use crate::acpi_table::{checksum, AcpiTableHeader, OemIdentity};
use crate::signature::{ACPI_CHECKSUM_OFFSET, ACPI_HEADER_LEN, SLIC};

pub(crate) const PUBLIC_KEY_LEN: usize = 0x9C;
pub(crate) const MARKER_LEN: usize = 0xB6;
pub(crate) const SLIC_TABLE_LEN: usize = ACPI_HEADER_LEN + PUBLIC_KEY_LEN + MARKER_LEN;

const MARKER_OEM_ID_OFFSET: usize = 12;
const MARKER_OEM_TABLE_ID_OFFSET: usize = 18;

/// The OEM identity pair carried inside a marker record.
pub(crate) fn marker_identity(marker: &[u8; MARKER_LEN]) -> OemIdentity {
    let mut oem_id = [0u8; 6];
    let mut oem_table_id = [0u8; 8];
    oem_id.copy_from_slice(&marker[MARKER_OEM_ID_OFFSET..MARKER_OEM_ID_OFFSET + 6]);
    oem_table_id.copy_from_slice(&marker[MARKER_OEM_TABLE_ID_OFFSET..MARKER_OEM_TABLE_ID_OFFSET + 8]);
    OemIdentity { oem_id, oem_table_id }
}

/// Assemble the registration buffer: header, public-key record, marker
/// record. The marker identity lands in the header fields and the checksum
/// is finalized over the whole table.
pub(crate) fn build_slic_table(public_key: &[u8; PUBLIC_KEY_LEN], marker: &[u8; MARKER_LEN]) -> Vec<u8> {
    let identity = marker_identity(marker);
    let header = AcpiTableHeader {
        signature: SLIC,
        length: SLIC_TABLE_LEN as u32,
        revision: 1,
        checksum: 0,
        oem_id: identity.oem_id,
        oem_table_id: identity.oem_table_id,
        oem_revision: 1,
        creator_id: 0,
        creator_revision: 0,
    };

    let mut table = Vec::with_capacity(SLIC_TABLE_LEN);
    table.extend_from_slice(&header.to_bytes());
    table.extend_from_slice(public_key);
    table.extend_from_slice(marker);
    table[ACPI_CHECKSUM_OFFSET] = checksum(&table);
    table
}
