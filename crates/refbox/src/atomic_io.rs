use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub(crate) fn write_text_atomic(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = sibling_with_suffix(path, &format!("{}.tmp", std::process::id()));
    fs::write(&tmp_path, text.as_bytes())?;
    replace_file(&tmp_path, path)
}

/// Renames `path` to `<path>.<suffix>`, replacing an older file of that name.
pub(crate) fn move_aside(path: &Path, suffix: &str) -> io::Result<PathBuf> {
    let target = sibling_with_suffix(path, suffix);
    match fs::remove_file(&target) {
        Ok(_) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    fs::rename(path, &target)?;
    Ok(target)
}

fn replace_file(tmp_path: &Path, final_path: &Path) -> io::Result<()> {
    // rename over an existing file fails on some platforms
    match fs::remove_file(final_path) {
        Ok(_) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            let _ = fs::remove_file(tmp_path);
            return Err(error);
        }
    }

    if let Err(error) = fs::rename(tmp_path, final_path) {
        let _ = fs::remove_file(tmp_path);
        return Err(error);
    }
    Ok(())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("reference_box");
    let sibling = format!("{file_name}.{suffix}");
    match path.parent() {
        Some(parent) => parent.join(sibling),
        None => PathBuf::from(sibling),
    }
}
