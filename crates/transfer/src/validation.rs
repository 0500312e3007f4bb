use std::path::{Component, Path};

use crate::TransferError;

/// Validates that a file name is a single plain path component.
///
/// The assembler places the artifact at `<root>/files/<fileId>/<fileName>`,
/// so the name must not be able to address anything outside that directory.
///
/// Rejects:
/// - Empty names, `.` and `..`
/// - Any path separator (`/` or `\`), regardless of host platform
/// - Drive prefixes (`C:`) and NUL bytes
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidFileName("empty name".into()));
    }

    if file_name.contains(['/', '\\']) {
        return Err(TransferError::InvalidFileName(format!(
            "path separators not allowed: {file_name}"
        )));
    }

    if file_name.contains('\0') {
        return Err(TransferError::InvalidFileName("NUL byte in name".into()));
    }

    if let [drive, b':', ..] = file_name.as_bytes()
        && drive.is_ascii_alphabetic()
    {
        return Err(TransferError::InvalidFileName(format!(
            "drive prefix not allowed: {file_name}"
        )));
    }

    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::CurDir | Component::ParentDir), _) => Err(
            TransferError::InvalidFileName(format!("relative component not allowed: {file_name}")),
        ),
        _ => Err(TransferError::InvalidFileName(format!(
            "not a plain file name: {file_name}"
        ))),
    }
}
