//! File move engine.
//!
//! Turns a descriptor's `from`/`to` rules into concrete moves out of an
//! extraction directory, then commits the result into a version directory
//! through a staging directory.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};

use kplug_index::FileOperation;

use crate::error::InstallError;

/// A resolved relocation between two absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub from: PathBuf,
    pub to: PathBuf,
}

// ─── Path helpers ───────────────────────────────────────────────────────

/// Lexically normalize a path, folding `.` and `..` without touching disk.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Whether `path` lies within `base` once both are normalized.
pub fn is_subpath(base: &Path, path: &Path) -> bool {
    normalize(path).starts_with(normalize(base))
}

/// A destination is clean when it is `.` or a plain relative path with no
/// empty, `.` or `..` segments.
fn is_clean(to: &str) -> bool {
    if to == "." {
        return true;
    }
    !to.is_empty()
        && !to.starts_with('/')
        && !to.starts_with('\\')
        && to
            .split(['/', '\\'])
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

fn ensure_within(base: &Path, path: &Path) -> Result<(), InstallError> {
    if is_subpath(base, path) {
        Ok(())
    } else {
        Err(InstallError::PathEscape {
            path: path.to_path_buf(),
            root: base.to_path_buf(),
        })
    }
}

fn base_name(path: &Path) -> Result<&std::ffi::OsStr, InstallError> {
    path.file_name().ok_or_else(|| {
        InstallError::Move(format!("'{}' has no file name", path.display()))
    })
}

// ─── Resolution ─────────────────────────────────────────────────────────

/// Resolve one file operation into moves from `from_dir` to `to_dir`.
///
/// A `from` naming an existing file is taken literally; anything else is
/// expanded as a glob and must match at least one path. Every resolved
/// pair is checked to stay inside its directory.
pub fn resolve(
    from_dir: &Path,
    to_dir: &Path,
    op: &FileOperation,
) -> Result<Vec<Move>, InstallError> {
    if !is_clean(&op.to) {
        return Err(InstallError::Move(format!(
            "destination '{}' is not a clean relative path",
            op.to
        )));
    }

    let moves = match direct_move(from_dir, to_dir, op)? {
        Some(m) => vec![m],
        None => glob_moves(from_dir, to_dir, op)?,
    };

    for m in &moves {
        ensure_within(from_dir, &m.from)?;
        ensure_within(to_dir, &m.to)?;
    }
    Ok(moves)
}

fn direct_move(
    from_dir: &Path,
    to_dir: &Path,
    op: &FileOperation,
) -> Result<Option<Move>, InstallError> {
    let from = from_dir.join(&op.from);
    if !from.is_file() {
        return Ok(None);
    }

    let to = if op.to == "." {
        to_dir.join(base_name(&from)?)
    } else {
        to_dir.join(&op.to)
    };
    Ok(Some(Move { from, to }))
}

fn glob_moves(
    from_dir: &Path,
    to_dir: &Path,
    op: &FileOperation,
) -> Result<Vec<Move>, InstallError> {
    let root = from_dir.to_str().ok_or_else(|| {
        InstallError::Move(format!("'{}' is not valid UTF-8", from_dir.display()))
    })?;
    let pattern = format!("{}/{}", glob::Pattern::escape(root), op.from);

    let paths = glob::glob_with(&pattern, glob::MatchOptions::default())
        .map_err(|e| InstallError::Move(format!("invalid pattern '{}': {e}", op.from)))?;

    let target = if op.to == "." {
        to_dir.to_path_buf()
    } else {
        to_dir.join(&op.to)
    };

    let mut moves = Vec::new();
    for path in paths {
        let from = path.map_err(|e| InstallError::Move(format!("glob '{}': {e}", op.from)))?;
        let to = target.join(base_name(&from)?);
        moves.push(Move { from, to });
    }

    if moves.is_empty() {
        return Err(InstallError::Move(format!(
            "no files matched the pattern '{}' in {}",
            op.from,
            from_dir.display()
        )));
    }
    Ok(moves)
}

// ─── Execution ──────────────────────────────────────────────────────────

/// Execute moves, creating destination parents as needed.
pub async fn apply(moves: &[Move]) -> Result<(), InstallError> {
    for m in moves {
        if let Some(parent) = m.to.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                InstallError::Move(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::rename(&m.from, &m.to).await.map_err(|e| {
            InstallError::Move(format!(
                "failed to move {} to {}: {e}",
                m.from.display(),
                m.to.display()
            ))
        })?;
        tracing::debug!(from = %m.from.display(), to = %m.to.display(), "moved file");
    }
    Ok(())
}

/// Resolve and apply every operation in order.
///
/// Operations run one after another, so a later pattern sees the
/// directory as left by the earlier ones.
pub async fn apply_operations(
    from_dir: &Path,
    to_dir: &Path,
    ops: &[FileOperation],
) -> Result<(), InstallError> {
    for op in ops {
        let moves = resolve(from_dir, to_dir, op)?;
        apply(&moves).await?;
    }
    Ok(())
}

/// Move files into a fresh staging directory, then swap that directory
/// into place at `final_dir`.
///
/// An existing `final_dir` is replaced. On failure no partial `final_dir`
/// is left behind.
pub async fn stage_and_commit(
    src_dir: &Path,
    final_dir: &Path,
    ops: &[FileOperation],
) -> Result<(), InstallError> {
    let staging = tempfile::Builder::new()
        .prefix("kplug-move")
        .tempdir()
        .map_err(|e| InstallError::Move(format!("failed to create staging dir: {e}")))?;

    apply_operations(src_dir, staging.path(), ops).await?;

    if let Err(e) = commit(staging.path(), final_dir).await {
        if tokio::fs::try_exists(final_dir).await.unwrap_or(false) {
            if let Err(cleanup) = tokio::fs::remove_dir_all(final_dir).await {
                tracing::warn!(
                    dir = %final_dir.display(),
                    error = %cleanup,
                    "failed to remove partial install directory"
                );
            }
        }
        return Err(e);
    }

    tracing::debug!(dir = %final_dir.display(), "committed install directory");
    Ok(())
}

async fn commit(staging: &Path, final_dir: &Path) -> Result<(), InstallError> {
    commit_with(staging, final_dir, |from, to| async move {
        tokio::fs::rename(from, to).await
    })
    .await
}

/// Swap `staging` into place at `final_dir` using `rename`, copying when
/// `rename` reports a cross-device move.
async fn commit_with<F, Fut>(
    staging: &Path,
    final_dir: &Path,
    rename: F,
) -> Result<(), InstallError>
where
    F: FnOnce(PathBuf, PathBuf) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if let Some(parent) = final_dir.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            InstallError::Move(format!("failed to create {}: {e}", parent.display()))
        })?;
    }

    if tokio::fs::try_exists(final_dir).await.unwrap_or(false) {
        tracing::debug!(dir = %final_dir.display(), "replacing existing directory");
        tokio::fs::remove_dir_all(final_dir).await.map_err(|e| {
            InstallError::Move(format!("failed to remove {}: {e}", final_dir.display()))
        })?;
    }

    match rename(staging.to_path_buf(), final_dir.to_path_buf()).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                from = %staging.display(),
                to = %final_dir.display(),
                "rename crosses devices, copying instead"
            );
            copy_dir_recursive(staging, final_dir).await?;
            // The committed copy is complete; a leftover staging dir is
            // removed again when its TempDir drops.
            if let Err(e) = tokio::fs::remove_dir_all(staging).await {
                tracing::warn!(
                    dir = %staging.display(),
                    error = %e,
                    "failed to remove staging directory"
                );
            }
            Ok(())
        }
        Err(e) => Err(InstallError::Move(format!(
            "failed to rename {} to {}: {e}",
            staging.display(),
            final_dir.display()
        ))),
    }
}

/// Whether a rename failed because source and destination are on
/// different filesystems.
pub fn is_cross_device(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(windows)]
    {
        // ERROR_NOT_SAME_DEVICE
        e.raw_os_error() == Some(17)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}

/// Recursively copy a directory tree (async).
async fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<(), InstallError> {
    tokio::fs::create_dir_all(dest).await.map_err(|e| {
        InstallError::Move(format!("failed to create dir {}: {e}", dest.display()))
    })?;

    let mut entries = tokio::fs::read_dir(src).await.map_err(|e| {
        InstallError::Move(format!("failed to read dir {}: {e}", src.display()))
    })?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| InstallError::Move(format!("failed to read dir entry: {e}")))?
    {
        let entry_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| InstallError::Move(format!("failed to stat {}: {e}", entry_path.display())))?;

        if file_type.is_dir() {
            Box::pin(copy_dir_recursive(&entry_path, &dest_path)).await?;
        } else {
            tokio::fs::copy(&entry_path, &dest_path)
                .await
                .map_err(|e| {
                    InstallError::Move(format!("failed to copy {}: {e}", entry_path.display()))
                })?;
        }
    }

    Ok(())
}
