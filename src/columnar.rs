use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

use camino::Utf8Path;
use flate2::read::GzDecoder;
use polars::prelude::{DataFrame, LazyCsvReader, LazyFileListReader, ParquetWriter};
use tracing::debug;

use crate::error::IngestError;

const INFER_SCHEMA_ROWS: usize = 10_000;

pub fn is_gzip(path: &Utf8Path) -> bool {
    path.as_str().to_ascii_lowercase().ends_with(".gz")
}

pub fn load_csv(path: &Utf8Path) -> Result<DataFrame, IngestError> {
    let tabular_err = |message: String| IngestError::Tabular {
        path: path.to_string(),
        message,
    };
    let metadata = fs::metadata(path.as_std_path()).map_err(|err| tabular_err(err.to_string()))?;
    if metadata.len() == 0 {
        return Err(tabular_err("file is empty".to_string()));
    }

    if is_gzip(path) {
        let mut decoded = tempfile::Builder::new()
            .prefix(".ckan-ingest")
            .suffix(".csv")
            .tempfile()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let source = File::open(path.as_std_path()).map_err(|err| tabular_err(err.to_string()))?;
        let mut decoder = GzDecoder::new(BufReader::new(source));
        io::copy(&mut decoder, decoded.as_file_mut())
            .map_err(|err| tabular_err(format!("gzip: {err}")))?;
        return read_plain_csv(decoded.path()).map_err(tabular_err);
    }

    read_plain_csv(path.as_std_path()).map_err(tabular_err)
}

fn read_plain_csv(path: &Path) -> Result<DataFrame, String> {
    let frame = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
        .finish()
        .and_then(|lazy| lazy.collect())
        .map_err(|err| err.to_string())?;
    if frame.width() == 0 {
        return Err("no columns found".to_string());
    }
    Ok(frame)
}

pub fn write_parquet(frame: &mut DataFrame, destination: &Path) -> Result<u64, IngestError> {
    let mut file = File::create(destination).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    ParquetWriter::new(&mut file)
        .finish(frame)
        .map_err(|err| IngestError::Tabular {
            path: destination.display().to_string(),
            message: err.to_string(),
        })
}

pub fn csv_to_parquet(source: &Utf8Path, destination: &Path) -> Result<usize, IngestError> {
    let mut frame = load_csv(source)?;
    let rows = frame.height();
    write_parquet(&mut frame, destination)?;
    debug!(source = %source, rows, "converted to parquet");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path).unwrap()
    }

    #[test]
    fn loads_header_and_rows() {
        let temp = tempfile::tempdir().unwrap();
        let path = utf8(temp.path().join("trips.csv"));
        fs::write(&path, "trip_id,duration,station\n1,300,Bay St\n2,420,King St\n").unwrap();
        let frame = load_csv(&path).unwrap();
        assert_eq!(frame.height(), 2);
        let names: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        assert_eq!(names, vec!["trip_id", "duration", "station"]);
    }

    #[test]
    fn reads_gzip_input() {
        let temp = tempfile::tempdir().unwrap();
        let path = utf8(temp.path().join("yellow_tripdata_2019-02.csv.gz"));
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"vendor,fare\n1,12.5\n2,7.0\n3,9.25\n").unwrap();
        encoder.finish().unwrap();
        assert_eq!(load_csv(&path).unwrap().height(), 3);
    }

    #[test]
    fn empty_file_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = utf8(temp.path().join("empty.csv"));
        fs::write(&path, "").unwrap();
        assert_matches!(load_csv(&path), Err(IngestError::Tabular { .. }));
    }

    #[test]
    fn writes_parquet_file() {
        let temp = tempfile::tempdir().unwrap();
        let source = utf8(temp.path().join("trips.csv"));
        fs::write(&source, "trip_id,duration\n1,300\n").unwrap();
        let destination = temp.path().join("trips.csv.parquet");
        let rows = csv_to_parquet(&source, &destination).unwrap();
        assert_eq!(rows, 1);
        let bytes = fs::read(&destination).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");
    }
}
