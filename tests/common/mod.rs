#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use ckan_ingest::catalog::CatalogClient;
use ckan_ingest::domain::{DatasetId, Resource, ResourceFormat};
use ckan_ingest::error::IngestError;
use ckan_ingest::fetch::RemoteSource;
use ckan_ingest::publish::{LoadJob, LoadRequest, ObjectStore, Warehouse};

pub fn utf8_dir(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

pub fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in members {
        if name.ends_with('/') {
            writer
                .add_directory(*name, SimpleFileOptions::default())
                .unwrap();
            continue;
        }
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    std::fs::write(path, zip_bytes(members)).unwrap();
}

fn column_name(index: usize) -> String {
    let mut index = index + 1;
    let mut name = String::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        name.insert(0, (b'A' + rem as u8) as char);
        index = (index - 1) / 26;
    }
    name
}

fn sheet_xml(rows: &[Vec<&str>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (row_index, row) in rows.iter().enumerate() {
        xml.push_str(&format!(r#"<row r="{}">"#, row_index + 1));
        for (col_index, value) in row.iter().enumerate() {
            let reference = format!("{}{}", column_name(col_index), row_index + 1);
            if value.parse::<f64>().is_ok() {
                xml.push_str(&format!(r#"<c r="{reference}"><v>{value}</v></c>"#));
            } else {
                xml.push_str(&format!(
                    r#"<c r="{reference}" t="inlineStr"><is><t>{value}</t></is></c>"#
                ));
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

pub fn xlsx_bytes(sheets: &[(&str, Vec<Vec<&str>>)]) -> Vec<u8> {
    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    );
    let mut workbook = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    let mut rels = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    let mut parts = Vec::new();
    for (index, (name, rows)) in sheets.iter().enumerate() {
        let number = index + 1;
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{number}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
        workbook.push_str(&format!(
            r#"<sheet name="{name}" sheetId="{number}" r:id="rId{number}"/>"#
        ));
        rels.push_str(&format!(
            r#"<Relationship Id="rId{number}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{number}.xml"/>"#
        ));
        parts.push((format!("xl/worksheets/sheet{number}.xml"), sheet_xml(rows)));
    }
    content_types.push_str("</Types>");
    workbook.push_str("</sheets></workbook>");
    rels.push_str("</Relationships>");
    let root_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

    let mut members: Vec<(String, String)> = vec![
        ("[Content_Types].xml".to_string(), content_types),
        ("_rels/.rels".to_string(), root_rels.to_string()),
        ("xl/workbook.xml".to_string(), workbook),
        ("xl/_rels/workbook.xml.rels".to_string(), rels),
    ];
    members.extend(parts);
    let borrowed: Vec<(&str, &[u8])> = members
        .iter()
        .map(|(name, content)| (name.as_str(), content.as_bytes()))
        .collect();
    zip_bytes(&borrowed)
}

pub fn write_xlsx(path: &Path, sheets: &[(&str, Vec<Vec<&str>>)]) {
    let mut file = File::create(path).unwrap();
    file.write_all(&xlsx_bytes(sheets)).unwrap();
}

pub fn resource(url: &str, format: &str, datastore_active: bool) -> Resource {
    Resource {
        id: url.rsplit('/').next().unwrap_or_default().to_string(),
        name: Some(url.rsplit('/').next().unwrap_or_default().to_string()),
        url: url.to_string(),
        format: ResourceFormat::from_tag(format),
        datastore_active,
    }
}

#[derive(Default)]
pub struct MockCatalog {
    pub endpoint: String,
    pub resources: Vec<Resource>,
    pub fail: bool,
    pub calls: Mutex<usize>,
}

impl CatalogClient for MockCatalog {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn package_show(&self, _dataset: &DatasetId) -> Result<Vec<Resource>, IngestError> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            return Err(IngestError::CatalogResponse("package not found".to_string()));
        }
        Ok(self.resources.clone())
    }

    fn resource_show(&self, resource_id: &str) -> Result<Resource, IngestError> {
        self.resources
            .iter()
            .find(|resource| resource.id == resource_id)
            .cloned()
            .ok_or_else(|| IngestError::ResourceNotFound(resource_id.to_string()))
    }
}

#[derive(Default)]
pub struct MockSource {
    pub bodies: Mutex<HashMap<String, Vec<u8>>>,
    pub fetches: Mutex<usize>,
    pub downloads: Mutex<usize>,
}

impl MockSource {
    pub fn with(entries: &[(&str, Vec<u8>)]) -> Self {
        let source = Self::default();
        for (url, body) in entries {
            source.set(url, body.clone());
        }
        source
    }

    pub fn set(&self, url: &str, body: Vec<u8>) {
        self.bodies.lock().unwrap().insert(url.to_string(), body);
    }

    pub fn downloads(&self) -> usize {
        *self.downloads.lock().unwrap()
    }

    fn body(&self, url: &str) -> Result<Vec<u8>, IngestError> {
        self.bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| IngestError::FetchStatus {
                url: url.to_string(),
                status: 404,
                message: "not found".to_string(),
            })
    }
}

impl RemoteSource for MockSource {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, IngestError> {
        *self.fetches.lock().unwrap() += 1;
        self.body(url)
    }

    fn download_to(&self, url: &str, sink: &mut dyn Write) -> Result<u64, IngestError> {
        *self.downloads.lock().unwrap() += 1;
        let body = self.body(url)?;
        sink.write_all(&body)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(body.len() as u64)
    }
}

#[derive(Default)]
pub struct MockObjectStore {
    pub uploads: Mutex<Vec<String>>,
    pub rejected: Mutex<Vec<String>>,
}

impl MockObjectStore {
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn reject(&self, remote_path: &str) {
        self.rejected.lock().unwrap().push(remote_path.to_string());
    }

    pub fn accept_all(&self) {
        self.rejected.lock().unwrap().clear();
    }
}

impl ObjectStore for MockObjectStore {
    fn put_file(&self, local: &Path, remote_path: &str) -> Result<(), IngestError> {
        assert!(local.is_file(), "upload source {} missing", local.display());
        if self.rejected.lock().unwrap().iter().any(|path| path == remote_path) {
            return Err(IngestError::ObjectStoreStatus {
                status: 403,
                message: format!("write to {remote_path} denied"),
            });
        }
        self.uploads.lock().unwrap().push(remote_path.to_string());
        Ok(())
    }

    fn uri(&self, remote_path: &str) -> String {
        format!("gs://test-bucket/{remote_path}")
    }
}

impl ObjectStore for &MockObjectStore {
    fn put_file(&self, local: &Path, remote_path: &str) -> Result<(), IngestError> {
        (**self).put_file(local, remote_path)
    }

    fn uri(&self, remote_path: &str) -> String {
        (**self).uri(remote_path)
    }
}

#[derive(Default)]
pub struct MockWarehouse {
    pub loads: Mutex<Vec<LoadRequest>>,
}

impl MockWarehouse {
    pub fn loads(&self) -> Vec<LoadRequest> {
        self.loads.lock().unwrap().clone()
    }
}

impl Warehouse for MockWarehouse {
    fn load_from_uri(&self, request: &LoadRequest) -> Result<LoadJob, IngestError> {
        let mut loads = self.loads.lock().unwrap();
        loads.push(request.clone());
        Ok(LoadJob {
            job_id: format!("job_{}", loads.len()),
            state: "RUNNING".to_string(),
        })
    }
}

impl Warehouse for &MockWarehouse {
    fn load_from_uri(&self, request: &LoadRequest) -> Result<LoadJob, IngestError> {
        (**self).load_from_uri(request)
    }
}

impl CatalogClient for &MockCatalog {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    fn package_show(&self, dataset: &DatasetId) -> Result<Vec<Resource>, IngestError> {
        (**self).package_show(dataset)
    }

    fn resource_show(&self, resource_id: &str) -> Result<Resource, IngestError> {
        (**self).resource_show(resource_id)
    }
}

impl RemoteSource for &MockSource {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, IngestError> {
        (**self).fetch_bytes(url)
    }

    fn download_to(&self, url: &str, sink: &mut dyn Write) -> Result<u64, IngestError> {
        (**self).download_to(url, sink)
    }
}
