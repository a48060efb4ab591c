//! Filesystem helpers for instance directories.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::SUPERVISOR_TARGET;
use crate::errors::SupervisorError;

/// Bytes kept from the end of a log when capturing diagnostics.
const DIAGNOSTIC_TAIL_BYTES: u64 = 64 * 1024;

/// Writes `contents` to `path` through a temporary file renamed into place,
/// so readers never observe a partial payload.
pub(super) fn atomic_write(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "target path did not have a parent directory",
        )
    })?;

    let mut file = Builder::new()
        .prefix(path.file_name().unwrap_or("fixturedb"))
        .tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

pub(super) fn create_dir_all(path: &Utf8Path) -> Result<(), SupervisorError> {
    fs::create_dir_all(path).map_err(|source| SupervisorError::io("create directory", path, source))
}

/// Whether `path` is missing or holds no entries.
pub(super) fn dir_is_empty(path: &Utf8Path) -> Result<bool, SupervisorError> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(source) => Err(SupervisorError::io("list directory", path, source)),
    }
}

/// Recursively copies the contents of `from` into `to`, creating `to`.
/// Returns the number of files copied.
pub(super) fn copy_dir(from: &Utf8Path, to: &Utf8Path) -> Result<u64, SupervisorError> {
    create_dir_all(to)?;
    let mut copied = 0;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|error| {
            let path = error
                .path()
                .and_then(Utf8Path::from_path)
                .map_or_else(|| from.to_path_buf(), Utf8Path::to_path_buf);
            SupervisorError::io("walk directory", path, io::Error::other(error))
        })?;
        let source = utf8(entry.path())?;
        let relative = source.strip_prefix(from).unwrap_or(&source);
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(&source, &target)
                .map_err(|error| SupervisorError::io("copy file", &source, error))?;
            copied += 1;
        }
    }
    debug!(
        target: SUPERVISOR_TARGET,
        from = %from,
        to = %to,
        files = copied,
        "copied directory"
    );
    Ok(copied)
}

fn utf8(path: &std::path::Path) -> Result<Utf8PathBuf, SupervisorError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).map_err(|path| {
        SupervisorError::io(
            "read non UTF-8 path",
            Utf8PathBuf::from(path.to_string_lossy().into_owned()),
            io::Error::new(io::ErrorKind::InvalidData, "path is not valid UTF-8"),
        )
    })
}

/// Deletes a file, logging rather than failing.
pub(super) fn remove_quietly(path: &Utf8Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(target: SUPERVISOR_TARGET, file = %path, "removed file"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            warn!(
                target: SUPERVISOR_TARGET,
                file = %path,
                error = %error,
                "failed to remove file"
            );
        }
    }
}

/// Opens `path` for writing, discarding earlier contents.
pub(super) fn truncate(path: &Utf8Path) -> Result<File, SupervisorError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|source| SupervisorError::io("open log", path, source))
}

/// Reads the tail of a text file. Missing or unreadable files yield an
/// empty string.
pub(super) fn read_tail(path: &Utf8Path) -> String {
    let Ok(mut file) = File::open(path) else {
        return String::new();
    };
    let length = file.metadata().map_or(0, |metadata| metadata.len());
    if length > DIAGNOSTIC_TAIL_BYTES
        && file
            .seek(SeekFrom::Start(length - DIAGNOSTIC_TAIL_BYTES))
            .is_err()
    {
        return String::new();
    }
    let mut bytes = Vec::new();
    if file.read_to_end(&mut bytes).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
