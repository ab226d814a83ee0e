use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;

use crate::inventory::{Inventory, InventoryRow, RawTable, EXPECTED_COLS};
use crate::secrets::GsheetsSecrets;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

// The table occupies columns A..K of the first sheet, header in row 1.
const DATA_RANGE: &str = "A1:K";

lazy_static! {
    static ref SPREADSHEET_ID: Regex =
        Regex::new(r"/spreadsheets/d/([A-Za-z0-9_-]+)").unwrap();
}

/// Pull the spreadsheet id out of a full Google Sheets URL.
pub fn extract_spreadsheet_id(url: &str) -> Option<&str> {
    SPREADSHEET_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Serialize, Deserialize)]
struct ValueRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    range: Option<String>,
    #[serde(rename = "majorDimension", skip_serializing_if = "Option::is_none")]
    major_dimension: Option<String>,
    #[serde(default)]
    values: Option<Vec<Vec<serde_json::Value>>>,
}

/// Remote spreadsheet backend.
///
/// Reads the whole table from the first sheet (first row = header) and
/// writes it back wholesale with a clear-then-bulk-update, overwriting
/// whatever another writer may have saved in between.
pub struct SheetsStore {
    creds: GsheetsSecrets,
    spreadsheet_id: String,
    client: reqwest::Client,
}

impl SheetsStore {
    pub fn new(creds: &GsheetsSecrets) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let spreadsheet_id = extract_spreadsheet_id(&creds.spreadsheet_url)
            .ok_or("spreadsheet_url does not look like a Google Sheets URL")?
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(SheetsStore {
            creds: creds.clone(),
            spreadsheet_id,
            client,
        })
    }

    /// Exchange a signed service-account assertion for a bearer token.
    async fn access_token(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.creds.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.creds.token_uri,
            iat: now,
            exp: now + 3600,
        };
        // Keys pasted into a TOML secrets file usually carry escaped
        // newlines.
        let pem = self.creds.private_key.replace("\\n", "\n");
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)?;

        let response: TokenResponse = self
            .client
            .post(&self.creds.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.access_token)
    }

    /// Load and normalize the remote table. Any failure degrades to the
    /// empty table, same as a malformed local file.
    pub async fn load(&self) -> Inventory {
        match self.fetch_raw().await {
            Ok(raw) => raw.normalize(),
            Err(e) => {
                warn!("could not read remote sheet, starting from an empty table: {}", e);
                Inventory::new()
            }
        }
    }

    async fn fetch_raw(&self) -> Result<RawTable, Box<dyn Error + Send + Sync>> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/{}/values/{}",
            SHEETS_API, self.spreadsheet_id, DATA_RANGE
        );
        let range: ValueRange = self
            .client
            .get(&url)
            .query(&[("majorDimension", "ROWS")])
            .bearer_auth(&token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(values_to_raw(range.values.unwrap_or_default()))
    }

    /// Clear the data range and write header plus rows in one bulk update.
    pub async fn save(&self, inventory: &Inventory) -> Result<(), Box<dyn Error + Send + Sync>> {
        let token = self.access_token().await?;

        let clear_url = format!(
            "{}/{}/values/{}:clear",
            SHEETS_API, self.spreadsheet_id, DATA_RANGE
        );
        self.client
            .post(&clear_url)
            .bearer_auth(&token)
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?;

        let update_url = format!("{}/{}/values/A1", SHEETS_API, self.spreadsheet_id);
        let body = ValueRange {
            range: Some("A1".to_string()),
            major_dimension: Some("ROWS".to_string()),
            values: Some(inventory_values(&inventory.normalized())),
        };
        self.client
            .put(&update_url)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

// A value range cell can be any JSON scalar; everything funnels through the
// normal string coercions.
fn values_to_raw(values: Vec<Vec<serde_json::Value>>) -> RawTable {
    let mut rows: Vec<Vec<String>> = values
        .into_iter()
        .map(|row| row.into_iter().map(value_to_string).collect())
        .collect();
    if rows.is_empty() {
        return RawTable::default();
    }
    let headers = rows.remove(0);
    RawTable::new(headers, rows)
}

fn value_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

// Header plus one row of values per chemical. Numeric columns go out as
// numbers so the sheet stays usable for ad-hoc formulas.
fn inventory_values(inventory: &Inventory) -> Vec<Vec<serde_json::Value>> {
    let header = EXPECTED_COLS
        .iter()
        .map(|c| serde_json::Value::String(c.to_string()))
        .collect();
    let mut values = vec![header];
    values.extend(inventory.rows.iter().map(row_values));
    values
}

fn row_values(row: &InventoryRow) -> Vec<serde_json::Value> {
    EXPECTED_COLS
        .iter()
        .map(|col| match *col {
            "bottles" => serde_json::json!(row.bottles),
            "carbons" => match row.carbons {
                Some(c) => serde_json::json!(c),
                None => serde_json::Value::String(String::new()),
            },
            other => serde_json::Value::String(row.cell(other)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spreadsheet_id_from_url() {
        let url = "https://docs.google.com/spreadsheets/d/1AbC_d-9xyz/edit#gid=0";
        assert_eq!(extract_spreadsheet_id(url), Some("1AbC_d-9xyz"));
        assert_eq!(extract_spreadsheet_id("https://example.com/"), None);
    }

    #[test]
    fn value_range_rows_normalize_like_a_csv() {
        let values = vec![
            vec![
                serde_json::json!("name"),
                serde_json::json!("bottles"),
                serde_json::json!("carbons"),
            ],
            vec![
                serde_json::json!("Acetone"),
                serde_json::json!(2),
                serde_json::json!(3.0),
            ],
            vec![serde_json::json!("Toluene"), serde_json::Value::Null],
        ];
        let inv = values_to_raw(values).normalize();
        assert_eq!(inv.len(), 2);
        assert_eq!(inv.rows[0].bottles, 2);
        assert_eq!(inv.rows[0].carbons, Some(3.0));
        assert_eq!(inv.rows[1].bottles, 1);
    }

    #[test]
    fn empty_value_range_is_the_empty_table() {
        assert!(values_to_raw(Vec::new()).normalize().is_empty());
    }

    #[test]
    fn outgoing_values_carry_header_and_typed_cells() {
        let mut inv = Inventory::new();
        inv.push(InventoryRow {
            name: "Hexane".into(),
            bottles: 3,
            carbons: Some(6.0),
            ..Default::default()
        });
        let values = inventory_values(&inv);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0][0], serde_json::json!("name"));
        assert_eq!(values[1][7], serde_json::json!(3));
        assert_eq!(values[1][2], serde_json::json!(6.0));
    }
}
