use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::IngestError;

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<usize, IngestError> {
    let archive_err = |message: String| IngestError::Archive {
        path: zip_path.display().to_string(),
        message,
    };
    let file = fs::File::open(zip_path).map_err(|err| archive_err(err.to_string()))?;
    let mut archive = ZipArchive::new(file).map_err(|err| archive_err(err.to_string()))?;

    let mut extracted = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| archive_err(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(archive_err(format!(
                    "entry {} escapes the extraction directory",
                    entry.name()
                )));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| IngestError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| archive_err(err.to_string()))?;
        extracted += 1;
    }
    Ok(extracted)
}
