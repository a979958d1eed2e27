use std::os::unix::fs::PermissionsExt;
use std::path::Path;

fn maybe_apply_permissions<P: AsRef<Path>>(
    path: P,
    permissions: std::fs::Permissions,
) -> std::io::Result<()> {
    let current = std::fs::metadata(&path)?.permissions();
    if (current.mode() & 0o777) != permissions.mode() {
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

pub fn secure_file<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    maybe_apply_permissions(path.as_ref(), std::fs::Permissions::from_mode(0o600))
}

/// Writes `contents` to a temp file next to `path` with the given mode, then
/// renames it into place. The rename is atomic on the same filesystem, so a
/// reader never observes a partially-written file.
pub fn replace_file_atomic<P: AsRef<Path>>(
    path: P,
    contents: &[u8],
    mode: u32,
) -> std::io::Result<()> {
    let path = path.as_ref();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("tnt"),
        std::process::id()
    ));
    std::fs::write(&tmp_path, contents)?;
    std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(mode))?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
