// berthwatch/src/clients/sheets.rs
//
// Google Sheets v4 REST backend for RecordStore.
//
// Endpoints used (relative to /v4/spreadsheets/{id}):
//   GET  values/{sheet}                         — whole sheet (read_all_records)
//   GET  values/{sheet}!1:1                     — header row
//   GET  values/{sheet}!C:C?majorDimension=COLUMNS — one column
//   POST values/{sheet}!A1:append               — append rows (RAW, INSERT_ROWS)
//   POST values/{sheet}:clear                   — clear values
//   POST :batchUpdate insertDimension + PUT values/{sheet}!A1 — insert header
//
// Authentication is a bearer token minted outside Berthwatch (service account
// flow is not handled here).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{check_status, http_client, network, parse, rows_to_records, RecordStore};
use crate::error::ClientError;
use crate::records::StoreRecord;

const SERVICE: &str = "sheets";
const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl ValueRange {
    fn into_strings(self) -> Vec<Vec<String>> {
        self.values.into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect()
    }
}

fn cell_to_string(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null      => String::new(),
        other                        => other.to_string(),
    }
}

/// 0 → "A", 25 → "Z", 26 → "AA".
pub fn column_letter(mut index: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (index % 26) as u8);
        if index < 26 { break; }
        index = index / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

pub struct SheetsStore {
    http:           reqwest::Client,
    base:           Url,
    sheet:          String,
    sheet_gid:      u32,
    access_token:   String,
}

impl SheetsStore {
    pub fn new(
        spreadsheet_id: &str,
        sheet:          &str,
        sheet_gid:      u32,
        access_token:   &str,
        timeout:        Duration,
    ) -> Result<Self, ClientError> {
        Self::with_base(API_BASE, spreadsheet_id, sheet, sheet_gid, access_token, timeout)
    }

    pub fn with_base(
        api_base:       &str,
        spreadsheet_id: &str,
        sheet:          &str,
        sheet_gid:      u32,
        access_token:   &str,
        timeout:        Duration,
    ) -> Result<Self, ClientError> {
        let mut base = Url::parse(api_base)
            .map_err(|e| ClientError::Network { service: SERVICE, message: e.to_string() })?;
        base.path_segments_mut()
            .map_err(|_| ClientError::Network { service: SERVICE, message: "base URL cannot have path".into() })?
            .push(spreadsheet_id);
        Ok(Self {
            http: http_client(SERVICE, timeout)?,
            base,
            sheet: sheet.to_string(),
            sheet_gid,
            access_token: access_token.to_string(),
        })
    }

    /// URL for `values/{segment}`; the segment is percent-encoded as one path piece.
    fn values_url(&self, segment: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut p) = url.path_segments_mut() {
            p.push("values").push(segment);
        }
        url
    }

    fn batch_update_url(&self) -> Url {
        let mut url = self.base.clone();
        let path = format!("{}:batchUpdate", url.path());
        url.set_path(&path);
        url
    }

    async fn get_values(&self, range: &str, by_columns: bool) -> Result<Vec<Vec<String>>, ClientError> {
        let mut url = self.values_url(range);
        if by_columns {
            url.query_pairs_mut().append_pair("majorDimension", "COLUMNS");
        }
        let resp = self.http.get(url)
            .bearer_auth(&self.access_token)
            .send().await.map_err(network(SERVICE))?;
        let vr: ValueRange = check_status(SERVICE, resp).await?
            .json().await.map_err(parse(SERVICE))?;
        Ok(vr.into_strings())
    }
}

#[async_trait]
impl RecordStore for SheetsStore {
    async fn read_all_records(&self) -> Result<Vec<StoreRecord>, ClientError> {
        let rows = self.get_values(&self.sheet, false).await?;
        debug!(rows = rows.len(), "sheets read_all_records");
        Ok(rows_to_records(rows))
    }

    async fn read_header(&self) -> Result<Vec<String>, ClientError> {
        let mut rows = self.get_values(&format!("{}!1:1", self.sheet), false).await?;
        Ok(if rows.is_empty() { Vec::new() } else { rows.swap_remove(0) })
    }

    async fn read_column(&self, index: usize) -> Result<Vec<String>, ClientError> {
        let col = column_letter(index);
        let mut cols = self.get_values(&format!("{}!{col}:{col}", self.sheet), true).await?;
        Ok(if cols.is_empty() { Vec::new() } else { cols.swap_remove(0) })
    }

    async fn append_records(&self, rows: &[Vec<String>]) -> Result<(), ClientError> {
        if rows.is_empty() { return Ok(()); }
        let mut url = self.values_url(&format!("{}!A1:append", self.sheet));
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let resp = self.http.post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "values": rows }))
            .send().await.map_err(network(SERVICE))?;
        check_status(SERVICE, resp).await?;
        debug!(rows = rows.len(), "sheets append");
        Ok(())
    }

    async fn clear(&self) -> Result<(), ClientError> {
        let url = self.values_url(&format!("{}:clear", self.sheet));
        let resp = self.http.post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({}))
            .send().await.map_err(network(SERVICE))?;
        check_status(SERVICE, resp).await?;
        Ok(())
    }

    async fn insert_header_row(&self, columns: &[String]) -> Result<(), ClientError> {
        let insert = json!({
            "requests": [{
                "insertDimension": {
                    "range": {
                        "sheetId":    self.sheet_gid,
                        "dimension":  "ROWS",
                        "startIndex": 0,
                        "endIndex":   1,
                    },
                    "inheritFromBefore": false,
                }
            }]
        });
        let resp = self.http.post(self.batch_update_url())
            .bearer_auth(&self.access_token)
            .json(&insert)
            .send().await.map_err(network(SERVICE))?;
        check_status(SERVICE, resp).await?;

        let mut url = self.values_url(&format!("{}!A1", self.sheet));
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let resp = self.http.put(url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "values": [columns] }))
            .send().await.map_err(network(SERVICE))?;
        check_status(SERVICE, resp).await?;
        Ok(())
    }
}
