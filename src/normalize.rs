use std::path::{Path, PathBuf};

use calamine::{Data, DataType, Range, Reader, Xlsx, XlsxError, open_workbook};
use camino::Utf8Path;
use tracing::{debug, info, warn};

use crate::domain::{LocalArtifact, NormalizedFile, ResourceFormat};
use crate::error::IngestError;
use crate::fs_util;
use crate::store::{Store, walk_files};

const ARCHIVE_METADATA_DIR: &str = "__MACOSX";

pub fn normalize(
    artifact: &LocalArtifact,
    format: &ResourceFormat,
) -> Result<Vec<NormalizedFile>, IngestError> {
    let files = match format {
        ResourceFormat::Xlsx => excel_to_csv(artifact)?,
        ResourceFormat::Zip => extract_flat(artifact)?,
        ResourceFormat::Other(_) => vec![NormalizedFile::from_artifact(artifact)],
    };
    info!(
        file = %artifact.file_name,
        format = %format,
        produced = files.len(),
        "normalized artifact"
    );
    Ok(files)
}

pub fn excel_to_csv(artifact: &LocalArtifact) -> Result<Vec<NormalizedFile>, IngestError> {
    let workbook_err = |err: XlsxError| IngestError::Workbook {
        path: artifact.path.to_string(),
        message: err.to_string(),
    };
    let dir = partition_dir(artifact)?;
    let mut workbook: Xlsx<_> = open_workbook(artifact.path.as_std_path()).map_err(workbook_err)?;
    let sheet_names = workbook.sheet_names().to_vec();

    let staging = Store::temp_dir_in(dir)?;
    let mut staged = Vec::with_capacity(sheet_names.len());
    for sheet in &sheet_names {
        let range = workbook.worksheet_range(sheet).map_err(workbook_err)?;
        let file_name = format!("{}.csv", sanitize_sheet_name(sheet));
        let staged_path = staging.path().join(&file_name);
        write_range_csv(&range, &staged_path).map_err(|message| IngestError::Workbook {
            path: artifact.path.to_string(),
            message: format!("sheet {sheet}: {message}"),
        })?;
        debug!(sheet = %sheet, rows = range.height(), "staged sheet");
        staged.push((staged_path, file_name));
    }

    let files = promote(staged, dir, artifact)?;
    staging
        .close()
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    Ok(files)
}

pub fn extract_flat(artifact: &LocalArtifact) -> Result<Vec<NormalizedFile>, IngestError> {
    let dir = partition_dir(artifact)?;
    let staging = Store::temp_dir_in(dir)?;
    fs_util::extract_zip(artifact.path.as_std_path(), staging.path())?;

    let mut staged = Vec::new();
    for path in walk_files(staging.path())? {
        let relative = path.strip_prefix(staging.path()).unwrap_or(path.as_path());
        if relative
            .components()
            .any(|component| component.as_os_str() == ARCHIVE_METADATA_DIR)
        {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            return Err(IngestError::Archive {
                path: artifact.path.to_string(),
                message: format!("non-utf8 member name {}", path.display()),
            });
        };
        if file_name == artifact.file_name {
            warn!(member = %file_name, "archive member shadows the archive itself, skipping");
            continue;
        }
        let file_name = file_name.to_string();
        staged.push((path, file_name));
    }

    let files = promote(staged, dir, artifact)?;
    staging
        .close()
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    Ok(files)
}

fn promote(
    staged: Vec<(PathBuf, String)>,
    dir: &Utf8Path,
    artifact: &LocalArtifact,
) -> Result<Vec<NormalizedFile>, IngestError> {
    let mut files: Vec<NormalizedFile> = Vec::with_capacity(staged.len());
    for (path, file_name) in staged {
        let target = dir.join(&file_name);
        Store::move_file(&path, &target)?;
        files.retain(|file| file.file_name != file_name);
        files.push(NormalizedFile {
            path: target,
            partition: artifact.partition.clone(),
            file_name,
        });
    }
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

fn partition_dir(artifact: &LocalArtifact) -> Result<&Utf8Path, IngestError> {
    artifact
        .path
        .parent()
        .ok_or_else(|| IngestError::Filesystem(format!("artifact {} has no parent", artifact.path)))
}

fn write_range_csv(range: &Range<Data>, path: &Path) -> Result<(), String> {
    let mut writer = csv::Writer::from_path(path).map_err(|err| err.to_string())?;
    for row in range.rows() {
        writer
            .write_record(row.iter().map(cell_to_field))
            .map_err(|err| err.to_string())?;
    }
    writer.flush().map_err(|err| err.to_string())
}

fn cell_to_field(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.clone(),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_datetime()
            .map(|value| value.to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string(),
    }
}

pub fn sanitize_sheet_name(sheet: &str) -> String {
    let cleaned: String = sheet
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "sheet".to_string()
    } else {
        cleaned
    }
}
