// SeedStream Path Validation Service
// Security utility to prevent path traversal attacks

use std::path::{Component, Path, PathBuf};

use crate::services::TranscodeError;

/// Join a caller-supplied file name against a content base directory,
/// rejecting anything that does not remain lexically inside the base.
///
/// The check is purely lexical and runs before any filesystem access, so a
/// traversal attempt never touches the disk or reaches a subprocess. Absolute
/// names, drive prefixes, and `..` components that climb above the base are
/// all rejected.
///
/// # Arguments
/// * `base` - The content's base directory
/// * `file_name` - Untrusted relative name (e.g. the `file` query parameter)
///
/// # Returns
/// * `Ok(PathBuf)` - The joined path, guaranteed inside `base`
/// * `Err(TranscodeError::PathTraversal)` - If the name escapes the base
pub fn resolve_within(base: &Path, file_name: &str) -> Result<PathBuf, TranscodeError> {
    let candidate = Path::new(file_name);

    if candidate.is_absolute() {
        return Err(TranscodeError::PathTraversal(file_name.to_string()));
    }

    let mut depth: i32 = 0;
    for component in candidate.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(TranscodeError::PathTraversal(file_name.to_string()));
                }
            }
            // RootDir / Prefix never belong in a relative name
            _ => return Err(TranscodeError::PathTraversal(file_name.to_string())),
        }
    }

    if depth == 0 {
        // Name collapsed to nothing ("", ".", "a/..")
        return Err(TranscodeError::PathTraversal(file_name.to_string()));
    }

    Ok(base.join(candidate))
}
