use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{AppError, Result};

/// Replaces `path` with `contents` so readers only ever see the old file or
/// the complete new one.
///
/// Failing to create the temp file next to the destination is reported as
/// [`AppError::Create`]; anything after that as [`AppError::Write`].
pub async fn write_atomic(path: &Path, contents: Vec<u8>) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &contents))
        .await
        .map_err(|e| AppError::Internal(format!("writer task failed: {}", e)))?
}

fn write_atomic_blocking(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = parent_dir(path);

    let mut tmp = tempfile::Builder::new()
        .prefix(".dd-service-sync")
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(|e| AppError::Create(format!("{}: {}", path.display(), e)))?;

    let write_err = |e: std::io::Error| AppError::Write(format!("{}: {}", path.display(), e));

    tmp.write_all(contents).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(write_err)?;
    }

    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
