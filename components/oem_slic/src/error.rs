use r_efi::efi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlicError {
    VariableNotFound,
    VariableSizeMismatch,
    RegistrationFailed,
    RootDescriptorNotFound,
    UnsupportedRevision,
    LegacyRegionDenied,
    LegacyCopyFailed,
}

impl From<SlicError> for efi::Status {
    fn from(error: SlicError) -> Self {
        match error {
            SlicError::VariableNotFound => efi::Status::NOT_FOUND,
            SlicError::VariableSizeMismatch => efi::Status::BAD_BUFFER_SIZE,
            SlicError::RegistrationFailed => efi::Status::PROTOCOL_ERROR,
            SlicError::RootDescriptorNotFound => efi::Status::NOT_FOUND,
            SlicError::UnsupportedRevision => efi::Status::INCOMPATIBLE_VERSION,
            SlicError::LegacyRegionDenied => efi::Status::WRITE_PROTECTED,
            SlicError::LegacyCopyFailed => efi::Status::DEVICE_ERROR,
        }
    }
}
