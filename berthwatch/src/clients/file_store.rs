// berthwatch/src/clients/file_store.rs
//
// Local CSV file backend for RecordStore — an offline mirror of the shared
// sheet, same layout (header row, then data rows). Appends go straight to the
// end of the file; one async mutex serializes writers inside the process.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{rows_to_records, RecordStore};
use crate::error::ClientError;
use crate::records::StoreRecord;

pub struct CsvFileStore {
    path:  PathBuf,
    write: Mutex<()>,
}

impl CsvFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write: Mutex::new(()) }
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>, ClientError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes.as_slice());
        let mut rows = Vec::new();
        for rec in rdr.records() {
            rows.push(rec?.iter().map(String::from).collect());
        }
        Ok(rows)
    }

    async fn write_rows(&self, rows: &[Vec<String>], append: bool) -> Result<(), ClientError> {
        let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
        for row in rows {
            wtr.write_record(row)?;
        }
        let buf = wtr.into_inner().map_err(|e| ClientError::Io(e.into_error()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&self.path).await?;
        f.write_all(&buf).await?;
        f.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for CsvFileStore {
    async fn read_all_records(&self) -> Result<Vec<StoreRecord>, ClientError> {
        Ok(rows_to_records(self.read_rows().await?))
    }

    async fn read_header(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.read_rows().await?.into_iter().next().unwrap_or_default())
    }

    async fn read_column(&self, index: usize) -> Result<Vec<String>, ClientError> {
        Ok(self.read_rows().await?
            .into_iter()
            .map(|r| r.get(index).cloned().unwrap_or_default())
            .collect())
    }

    async fn append_records(&self, rows: &[Vec<String>]) -> Result<(), ClientError> {
        if rows.is_empty() { return Ok(()); }
        let _guard = self.write.lock().await;
        self.write_rows(rows, true).await
    }

    async fn clear(&self) -> Result<(), ClientError> {
        let _guard = self.write.lock().await;
        self.write_rows(&[], false).await
    }

    async fn insert_header_row(&self, columns: &[String]) -> Result<(), ClientError> {
        let _guard = self.write.lock().await;
        let mut rows = self.read_rows().await?;
        rows.insert(0, columns.to_vec());
        self.write_rows(&rows, false).await
    }
}
