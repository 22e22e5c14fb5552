//! Read and rewrite the version resource of a binary on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ImageError, StampError};
use crate::lock::lock_path;
use crate::pe::{PeImage, Placement};
use crate::rsrc::{ResourceData, ResourceName, RT_VERSION};
use crate::version::VersionRecord;
use crate::versioninfo::{VersionInfo, VFT_APP, VFT_DLL};

/// Name/ID of the version resource inside `RT_VERSION`.
const VERSION_RESOURCE_ID: u16 = 1;

// Sharing violation and lock violation as reported by Windows.
const ERROR_SHARING_VIOLATION: i32 = 32;
const ERROR_LOCK_VIOLATION: i32 = 33;

/// Replace the version resource of `path` with `record`.
///
/// Both version strings are validated before the file is touched. The new
/// image is written to a sibling temporary file and renamed over the
/// original, so a failure at any point leaves the binary unchanged. Calls
/// for the same path are serialized within the process.
///
/// # Errors
///
/// - [`StampError::MalformedVersion`] if a version string is not `a.b.c.d`.
/// - [`StampError::FileNotFound`] if `path` does not exist.
/// - [`StampError::FileLocked`] if the file cannot be opened for writing.
/// - [`StampError::InvalidImage`] if the file is not a PE image.
/// - [`StampError::ResourceWrite`] if the new resources cannot be placed or saved.
pub fn stamp(path: &Path, record: &VersionRecord) -> Result<(), StampError> {
    // Validate before locking so bad input never touches the file.
    VersionInfo::from_record(record, VFT_APP)?;

    let _guard = lock_path(path);
    let original = read_for_update(path)?;
    let mut image = PeImage::parse(original).map_err(|source| invalid(path, source))?;

    if image.is_signed() {
        return Err(StampError::ResourceWrite {
            path: path.to_path_buf(),
            reason: "image carries an Authenticode signature; stamp before signing".to_owned(),
        });
    }

    let file_type = if image.is_dll() { VFT_DLL } else { VFT_APP };
    let blob = VersionInfo::from_record(record, file_type)?
        .encode()
        .map_err(|e| write_error(path, &e))?;

    let mut tree = image.resources().map_err(|source| invalid(path, source))?;
    let kind = ResourceName::Id(RT_VERSION);
    let name = ResourceName::Id(VERSION_RESOURCE_ID);
    let replaced = tree.remove_all_languages(&kind, &name);
    tree.insert(kind, name, record.language_id, ResourceData::new(blob));

    let placement = image
        .replace_resources(&tree)
        .map_err(|e| write_error(path, &e))?;
    image.refresh_checksum().map_err(|e| write_error(path, &e))?;

    match &placement {
        Placement::InPlace { section } => {
            debug!(path = %path.display(), section, "rewrote resource section in place");
        }
        Placement::Appended { section } => {
            info!(path = %path.display(), section, "appended resource section");
        }
    }

    replace_file(path, image.bytes())?;
    info!(
        path = %path.display(),
        file_version = %record.file_version,
        product_version = %record.product_version,
        replaced,
        "stamped version resource"
    );
    Ok(())
}

/// Read the version resource of `path`, if it has one.
///
/// # Errors
///
/// Returns [`StampError::FileNotFound`] or [`StampError::InvalidImage`].
pub fn read_version_info(path: &Path) -> Result<Option<VersionInfo>, StampError> {
    let bytes = fs::read(path).map_err(|e| open_error(path, &e))?;
    let image = PeImage::parse(bytes).map_err(|source| invalid(path, source))?;
    let tree = image.resources().map_err(|source| invalid(path, source))?;

    let Some((_, language, data)) = tree.first_of_type(&ResourceName::Id(RT_VERSION)) else {
        return Ok(None);
    };
    debug!(path = %path.display(), language, len = data.data.len(), "found version resource");
    VersionInfo::decode(&data.data)
        .map(Some)
        .map_err(|source| invalid(path, source))
}

fn read_for_update(path: &Path) -> Result<Vec<u8>, StampError> {
    if !path.exists() {
        return Err(StampError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| open_error(path, &e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| write_error(path, &e))?;
    Ok(bytes)
}

fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), StampError> {
    let tmp_path = temp_path(path);
    let result = write_temp(path, &tmp_path, bytes)
        .and_then(|()| fs::rename(&tmp_path, path));
    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp_path.display(), error = %cleanup, "failed to remove temp file");
            }
        }
        return Err(write_error(path, &e));
    }
    Ok(())
}

fn write_temp(original: &Path, tmp_path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    let permissions = fs::metadata(original)?.permissions();
    fs::set_permissions(tmp_path, permissions)
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file_name}.{}.stamp.tmp", std::process::id()))
}

fn open_error(path: &Path, err: &io::Error) -> StampError {
    let path = path.to_path_buf();
    match err.kind() {
        io::ErrorKind::NotFound => StampError::FileNotFound { path },
        io::ErrorKind::PermissionDenied => StampError::FileLocked { path },
        _ if is_sharing_violation(err) => StampError::FileLocked { path },
        _ => StampError::ResourceWrite {
            path,
            reason: err.to_string(),
        },
    }
}

fn is_sharing_violation(err: &io::Error) -> bool {
    cfg!(windows)
        && matches!(
            err.raw_os_error(),
            Some(ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION)
        )
}

fn invalid(path: &Path, source: ImageError) -> StampError {
    StampError::InvalidImage {
        path: path.to_path_buf(),
        source,
    }
}

fn write_error(path: &Path, err: &dyn std::fmt::Display) -> StampError {
    StampError::ResourceWrite {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
