use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to {action} {}: {source}", .path.display())]
pub struct CopyTreeError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

fn failed<'a>(
    action: &'static str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> CopyTreeError + 'a {
    move |source| CopyTreeError {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// Copies `source_root` into `destination_root`, recreating symlinks rather
/// than following them.
///
/// `skip_top_level` is consulted for direct children of `source_root` only.
/// Returns the number of files and links written.
pub fn copy_tree<F>(
    source_root: &Path,
    destination_root: &Path,
    skip_top_level: F,
) -> Result<u64, CopyTreeError>
where
    F: Fn(&str) -> bool,
{
    if !source_root.is_dir() {
        return Err(CopyTreeError {
            action: "copy directory",
            path: source_root.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
        });
    }

    fs::create_dir_all(destination_root).map_err(failed("create directory", destination_root))?;

    let mut copied = 0_u64;
    let mut queue: VecDeque<(PathBuf, PathBuf, bool)> = VecDeque::new();
    queue.push_back((source_root.to_path_buf(), destination_root.to_path_buf(), true));

    while let Some((from_dir, to_dir, top_level)) = queue.pop_front() {
        let entries = fs::read_dir(&from_dir).map_err(failed("read directory", &from_dir))?;
        for entry in entries {
            let entry = entry.map_err(failed("read directory", &from_dir))?;
            let name = entry.file_name();
            if top_level && skip_top_level(&name.to_string_lossy()) {
                continue;
            }

            let from_path = entry.path();
            let to_path = to_dir.join(&name);
            let file_type = entry.file_type().map_err(failed("inspect", &from_path))?;
            if file_type.is_symlink() {
                copy_symlink(&from_path, &to_path)?;
                copied += 1;
            } else if file_type.is_dir() {
                fs::create_dir_all(&to_path).map_err(failed("create directory", &to_path))?;
                queue.push_back((from_path, to_path, false));
            } else if file_type.is_file() {
                fs::copy(&from_path, &to_path).map_err(failed("copy file", &from_path))?;
                copied += 1;
            }
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(from_path: &Path, to_path: &Path) -> Result<(), CopyTreeError> {
    let target = fs::read_link(from_path).map_err(failed("read link", from_path))?;
    std::os::unix::fs::symlink(&target, to_path).map_err(failed("create link", to_path))
}

#[cfg(not(unix))]
fn copy_symlink(from_path: &Path, to_path: &Path) -> Result<(), CopyTreeError> {
    if from_path.is_dir() {
        copy_tree(from_path, to_path, |_| false).map(|_| ())
    } else {
        fs::copy(from_path, to_path)
            .map(|_| ())
            .map_err(failed("copy file", from_path))
    }
}
