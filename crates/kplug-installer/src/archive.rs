//! Archive download, verification, and safe extraction.
//!
//! The body is buffered and verified in full before a single entry is
//! written. Every entry name is checked for traversal before it is joined
//! onto the destination directory.

use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::Path;

use crate::error::InstallError;
use crate::fetch::{read_verified, Fetcher, Verifier};

/// Number of leading bytes inspected to detect the archive type.
const SNIFF_LEN: usize = 512;

/// Zip local file header magic.
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Gzip magic followed by the deflate method byte.
const GZIP_MAGIC: &[u8; 3] = b"\x1f\x8b\x08";

/// Entry name some tar producers use for pax global headers.
const PAX_GLOBAL_HEADER: &str = "pax_global_header";

/// Archive formats the installer can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

/// Content type of the first bytes of a body.
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    let head = &data[..data.len().min(SNIFF_LEN)];
    if head.starts_with(ZIP_MAGIC) {
        "application/zip"
    } else if head.starts_with(GZIP_MAGIC) {
        "application/x-gzip"
    } else if !head.is_empty()
        && std::str::from_utf8(head).is_ok()
        && head
            .iter()
            .all(|b| !b.is_ascii_control() || b.is_ascii_whitespace())
    {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

/// Select an extractor from the content type.
pub fn detect_format(data: &[u8]) -> Result<ArchiveFormat, InstallError> {
    match sniff_content_type(data) {
        "application/zip" => Ok(ArchiveFormat::Zip),
        "application/x-gzip" => Ok(ArchiveFormat::TarGz),
        other => Err(InstallError::UnsupportedFormat(other.to_string())),
    }
}

/// Reject entry names that could land outside the destination.
///
/// An entry is suspicious if it is rooted (`/` or `\`) or has any `..`
/// segment under either separator.
pub fn suspicious_path(name: &str) -> Result<(), InstallError> {
    if name.starts_with('/') || name.starts_with('\\') {
        return Err(InstallError::SuspiciousPath(name.to_string()));
    }
    if name.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(InstallError::SuspiciousPath(name.to_string()));
    }
    Ok(())
}

/// Fetch `uri`, verify it, and unpack it into `dest`.
///
/// Nothing is written to `dest` unless verification succeeds. Files from a
/// half-finished extraction are left for the caller to remove with `dest`.
pub async fn fetch_and_extract(
    fetcher: &dyn Fetcher,
    verifier: &mut dyn Verifier,
    uri: &str,
    dest: &Path,
) -> Result<(), InstallError> {
    let body = fetcher.get(uri).await?;
    let data = read_verified(body, verifier).await?;

    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract(&data, &dest))
        .await
        .map_err(|e| InstallError::Extract(format!("extraction task failed: {e}")))?
}

/// Unpack an in-memory archive into `dest`.
pub fn extract(data: &[u8], dest: &Path) -> Result<(), InstallError> {
    let format = detect_format(data)?;
    tracing::debug!(?format, dest = %dest.display(), bytes = data.len(), "extracting archive");
    match format {
        ArchiveFormat::Zip => extract_zip(data, dest),
        ArchiveFormat::TarGz => extract_tar_gz(data, dest),
    }
}

fn extract_zip(data: &[u8], dest: &Path) -> Result<(), InstallError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| InstallError::Extract(format!("failed to read zip: {e}")))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| InstallError::Extract(format!("failed to read zip entry {i}: {e}")))?;

        let name = entry.name().to_string();
        suspicious_path(&name)?;
        let out_path = dest.join(&name);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| extract_io(&name, e))?;
            continue;
        }

        let mode = entry_mode(entry.unix_mode());
        write_entry(&mut entry, &out_path, mode, &name)?;
    }

    Ok(())
}

fn extract_tar_gz(data: &[u8], dest: &Path) -> Result<(), InstallError> {
    let gz = flate2::read::GzDecoder::new(Cursor::new(data));
    let mut archive = tar::Archive::new(gz);

    let entries = archive
        .entries()
        .map_err(|e| InstallError::Extract(format!("failed to read tar.gz: {e}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| InstallError::Extract(format!("failed to read tar entry: {e}")))?;

        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();
        if name == PAX_GLOBAL_HEADER || entry_type.is_pax_global_extensions() {
            tracing::debug!(entry = %name, "skipping pax global header");
            continue;
        }
        suspicious_path(&name)?;
        let out_path = dest.join(&name);

        if entry_type.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| extract_io(&name, e))?;
        } else if entry_type.is_file() || entry_type == tar::EntryType::Continuous {
            let mode = entry_mode(entry.header().mode().ok());
            write_entry(&mut entry, &out_path, mode, &name)?;
        } else {
            return Err(InstallError::Extract(format!(
                "unsupported tar entry type {entry_type:?} for '{name}'"
            )));
        }
    }

    Ok(())
}

/// Permission bits to apply; special bits are never carried over.
fn entry_mode(mode: Option<u32>) -> Option<u32> {
    mode.map(|m| m & 0o777).filter(|m| *m != 0)
}

fn write_entry(
    reader: &mut dyn Read,
    out_path: &Path,
    mode: Option<u32>,
    name: &str,
) -> Result<(), InstallError> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent).map_err(|e| extract_io(name, e))?;
    }

    let mut out = File::create(out_path).map_err(|e| extract_io(name, e))?;
    io::copy(reader, &mut out).map_err(|e| extract_io(name, e))?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(out_path, fs::Permissions::from_mode(mode))
            .map_err(|e| extract_io(name, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

fn extract_io(name: &str, e: io::Error) -> InstallError {
    InstallError::Extract(format!("failed to write '{name}': {e}"))
}
