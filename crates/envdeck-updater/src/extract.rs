use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use envdeck_core::{ArchiveType, ProgressSink};
use flate2::read::GzDecoder;
use tracing::debug;

use crate::InstallError;

const PLATFORM_METADATA_DIRS: &[&str] = &["__MACOSX"];

/// Unpacks `archive` into `dest`, reporting entries extracted over the entry
/// count. Returns the number of entries.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    archive_type: ArchiveType,
    progress: &mut dyn ProgressSink,
) -> Result<usize, InstallError> {
    let extract_err = |message: String| InstallError::Extract {
        archive: archive.to_path_buf(),
        message,
    };

    fs::create_dir_all(dest)
        .map_err(|err| extract_err(format!("failed to create {}: {err}", dest.display())))?;
    let extracted = match archive_type {
        ArchiveType::Zip => extract_zip(archive, dest, progress),
        ArchiveType::TarGz => extract_tar_gz(archive, dest, progress),
    }
    .map_err(extract_err)?;

    debug!(
        archive = %archive.display(),
        kind = archive_type.as_str(),
        entries = extracted,
        "extracted archive"
    );
    Ok(extracted)
}

fn extract_zip(
    archive_path: &Path,
    dest: &Path,
    progress: &mut dyn ProgressSink,
) -> Result<usize, String> {
    let file = File::open(archive_path).map_err(|err| err.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| err.to_string())?;
    let total = archive.len();

    progress.progress(0.0);
    for index in 0..total {
        let mut entry = archive.by_index(index).map_err(|err| err.to_string())?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(format!("entry '{}' escapes the archive root", entry.name()));
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|err| err.to_string())?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(|err| err.to_string())?;
            }
            let mut out = File::create(&out_path)
                .map_err(|err| format!("failed to create {}: {err}", out_path.display()))?;
            io::copy(&mut entry, &mut out)
                .map_err(|err| format!("failed to write {}: {err}", out_path.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))
                        .map_err(|err| err.to_string())?;
                }
            }
        }
        progress.progress((index + 1) as f64 / total as f64);
    }

    Ok(total)
}

fn extract_tar_gz(
    archive_path: &Path,
    dest: &Path,
    progress: &mut dyn ProgressSink,
) -> Result<usize, String> {
    // A gzip stream has no index, so count in a first pass.
    let total = open_tar(archive_path)?
        .entries()
        .map_err(|err| err.to_string())?
        .count();

    let mut archive = open_tar(archive_path)?;
    progress.progress(0.0);
    let mut extracted = 0_usize;
    for entry in archive.entries().map_err(|err| err.to_string())? {
        let mut entry = entry.map_err(|err| err.to_string())?;
        let unpacked = entry.unpack_in(dest).map_err(|err| err.to_string())?;
        if !unpacked {
            let name = entry
                .path()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            return Err(format!("entry '{name}' escapes the archive root"));
        }
        extracted += 1;
        if total > 0 {
            progress.progress(extracted as f64 / total as f64);
        }
    }

    Ok(extracted)
}

fn open_tar(archive_path: &Path) -> Result<tar::Archive<GzDecoder<File>>, String> {
    let file = File::open(archive_path).map_err(|err| err.to_string())?;
    Ok(tar::Archive::new(GzDecoder::new(file)))
}

/// Picks the application directory out of an extraction directory, ignoring
/// hidden entries and platform metadata folders such as `__MACOSX`. An
/// archive with regular files at its top level is its own root.
pub fn locate_extracted_root(dir: &Path) -> Result<PathBuf, InstallError> {
    let not_found = || InstallError::ExtractedRootNotFound {
        dir: dir.to_path_buf(),
    };

    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir).map_err(|_| not_found())?.filter_map(Result::ok) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || PLATFORM_METADATA_DIRS.iter().any(|skip| *skip == name) {
            continue;
        }
        match entry.file_type() {
            Ok(kind) if kind.is_dir() => candidates.push(entry.path()),
            Ok(_) => {
                debug!(dir = %dir.display(), file = %name, "archive has top-level files");
                return Ok(dir.to_path_buf());
            }
            Err(_) => {}
        }
    }
    candidates.sort();

    candidates.into_iter().next().ok_or_else(not_found)
}
