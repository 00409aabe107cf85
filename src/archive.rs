//! Result packaging.
//!
//! After a scan (complete or aborted) the per-cell captures are bundled
//! into a single zip for download. Packaging is best-effort: a file that
//! cannot be read or added is logged and skipped — a partial archive beats
//! no archive — while failure to create the destination file itself is an
//! error for the caller to log.

use crate::error::RigResult;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Bundle every regular file under `results_dir` into a freshly created
/// archive at `archive_path`, preserving paths relative to `results_dir`.
/// Directories themselves are not archived.
pub fn package_results(results_dir: &Path, archive_path: &Path) -> RigResult<()> {
    let file = File::create(archive_path)?;
    let mut writer = ZipWriter::new(file);

    add_dir(&mut writer, results_dir, results_dir);

    writer.finish()?;
    Ok(())
}

fn add_dir(writer: &mut ZipWriter<File>, base: &Path, dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("skipping unreadable directory {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!("skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };

        if path.is_dir() {
            add_dir(writer, base, &path);
            continue;
        }

        if let Err(e) = add_file(writer, base, &path) {
            warn!("skipping {}: {}", path.display(), e);
        }
    }
}

fn add_file(writer: &mut ZipWriter<File>, base: &Path, path: &Path) -> anyhow::Result<()> {
    let name = path
        .strip_prefix(base)?
        .to_string_lossy()
        .replace(std::path::MAIN_SEPARATOR, "/");
    let bytes = std::fs::read(path)?;

    writer.start_file(name, SimpleFileOptions::default())?;
    writer.write_all(&bytes)?;
    Ok(())
}
