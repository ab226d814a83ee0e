use axum::{
    Json, Router,
    extract::{Multipart, Query, State},
    response::{Html, IntoResponse},
    routing::{get, post},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use crate::inventory::{Inventory, InventoryRow, RawTable, EXPECTED_COLS};
use crate::lookup::{self, ChemicalDetails};
use crate::secrets::{Secrets, SECRETS_FILE};
use crate::storage::Store;

pub struct AppState {
    inventory: Mutex<Inventory>,
    store: Store,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct SearchQuery {
    search: Option<String>,
}

#[derive(Deserialize)]
struct LookupQuery {
    query: String,
}

/// One chemical as submitted by the add form. Everything is optional;
/// normalization defaults apply to whatever is left out.
#[derive(Deserialize)]
struct NewRow {
    #[serde(default)]
    name: String,
    #[serde(default)]
    cas: String,
    #[serde(default)]
    carbons: Option<f64>,
    #[serde(default)]
    distributor: String,
    #[serde(default)]
    container_size: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    location: String,
    #[serde(default = "one")]
    bottles: i64,
    #[serde(default)]
    storage_conditions: String,
    #[serde(default)]
    hazards: String,
    #[serde(default)]
    sds_link: String,
}

fn one() -> i64 {
    1
}

#[derive(Deserialize)]
struct DeleteRequest {
    /// Delete everything in this location, or the whole table when absent.
    location: Option<String>,
}

#[derive(Serialize)]
struct SaveResponse {
    status: String,
    message: Option<String>,
}

pub async fn run(addr: &str) -> Result<(), Box<dyn Error>> {
    // Pick the backend once and load the whole table for the session.
    let secrets = Secrets::load(SECRETS_FILE);
    let store = Store::from_secrets(&secrets);
    let inventory = store.load_data().await;
    info!(
        "loaded {} rows from the {} backend",
        inventory.len(),
        if store.is_remote() { "remote" } else { "local" }
    );

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let app_state = Arc::new(AppState {
        inventory: Mutex::new(inventory),
        store,
        http,
    });

    // Build router
    let app = Router::new()
        .route("/", get(serve_index))
        .route("/api/inventory", get(get_inventory))
        .route("/api/inventory/add", post(add_row))
        .route("/api/inventory/delete", post(delete_rows))
        .route("/api/inventory/reset", post(reset_inventory))
        .route("/api/inventory/upload", post(upload_files))
        .route("/api/save", post(save_inventory))
        .route("/api/lookup", get(lookup_chemical))
        .with_state(app_state);

    // Start server
    let listener = TcpListener::bind(addr).await?;
    info!("listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

async fn get_inventory(
    Query(params): Query<SearchQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let inventory = state.inventory.lock().unwrap();
    let query = params.search.unwrap_or_default();
    let rows: Vec<InventoryRow> = inventory.search(&query).into_iter().cloned().collect();

    Json(serde_json::json!({
        "columns": EXPECTED_COLS,
        "rows": rows,
        "locations": inventory.locations(),
        "total": inventory.len(),
    }))
}

async fn lookup_chemical(
    Query(params): Query<LookupQuery>,
    State(state): State<Arc<AppState>>,
) -> Json<ChemicalDetails> {
    Json(lookup::fetch_details(&state.http, &params.query).await)
}

async fn add_row(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewRow>,
) -> impl IntoResponse {
    let row = InventoryRow {
        name: payload.name,
        cas: payload.cas,
        carbons: payload.carbons,
        distributor: payload.distributor,
        container_size: payload.container_size,
        state: payload.state,
        location: payload.location,
        bottles: payload.bottles.max(0),
        storage_conditions: payload.storage_conditions,
        hazards: payload.hazards,
        sds_link: payload.sds_link,
    };

    let snapshot = {
        let mut inventory = state.inventory.lock().unwrap();
        inventory.push(row);
        inventory.clone()
    };
    persist(&state, &snapshot).await
}

async fn delete_rows(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DeleteRequest>,
) -> impl IntoResponse {
    let snapshot = {
        let mut inventory = state.inventory.lock().unwrap();
        match payload.location.as_deref() {
            Some(location) => inventory.delete_location(location),
            None => inventory.clear(),
        }
        inventory.clone()
    };
    persist(&state, &snapshot).await
}

async fn reset_inventory(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = {
        let mut inventory = state.inventory.lock().unwrap();
        inventory.clear();
        inventory.clone()
    };
    persist(&state, &snapshot).await
}

async fn save_inventory(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.inventory.lock().unwrap().clone();
    persist(&state, &snapshot).await
}

/// Upload one or more CSV/XLSX files. The frames are concatenated,
/// normalized and applied as a wholesale replacement of the table.
async fn upload_files(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut merged = Inventory::new();
    let mut files = 0usize;

    loop {
        // A stream error is not end-of-input: a truncated upload must
        // surface, not read as "no files".
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return upload_error(format!("could not read upload: {}", e)),
        };
        let filename = match field.file_name() {
            Some(name) => name.to_lowercase(),
            None => continue,
        };
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => return upload_error(format!("could not read upload: {}", e)),
        };
        if data.is_empty() {
            continue;
        }

        match parse_table(&filename, &data) {
            None => {
                warn!("ignoring upload with unsupported extension: {}", filename);
                continue;
            }
            Some(Ok(raw)) => {
                merged.rows.extend(raw.normalize().rows);
                files += 1;
            }
            Some(Err(e)) => {
                return upload_error(format!("could not parse {}: {}", filename, e));
            }
        }
    }

    if files == 0 {
        return upload_error("no CSV or XLSX files received".to_string());
    }

    let snapshot = {
        let mut inventory = state.inventory.lock().unwrap();
        *inventory = merged;
        inventory.clone()
    };
    persist(&state, &snapshot).await
}

async fn persist(state: &AppState, snapshot: &Inventory) -> Json<SaveResponse> {
    match state.store.save_data(snapshot).await {
        Ok(()) => Json(SaveResponse {
            status: "ok".to_string(),
            message: None,
        }),
        Err(e) => Json(SaveResponse {
            status: "error".to_string(),
            message: Some(e.to_string()),
        }),
    }
}

fn upload_error(message: String) -> Json<SaveResponse> {
    Json(SaveResponse {
        status: "error".to_string(),
        message: Some(message),
    })
}

// Dispatch on the uploaded file's extension. None means the file type is
// not supported and the file is skipped.
fn parse_table(
    filename: &str,
    data: &[u8],
) -> Option<Result<RawTable, Box<dyn Error + Send + Sync>>> {
    if filename.ends_with(".csv") {
        Some(parse_csv_bytes(data))
    } else if filename.ends_with(".xlsx") {
        Some(parse_xlsx_bytes(data))
    } else if filename.ends_with(".xls") {
        Some(parse_xls_bytes(data))
    } else {
        None
    }
}

fn parse_csv_bytes(data: &[u8]) -> Result<RawTable, Box<dyn Error + Send + Sync>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(Cursor::new(data));
    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok(RawTable::new(headers, rows))
}

fn parse_xlsx_bytes(data: &[u8]) -> Result<RawTable, Box<dyn Error + Send + Sync>> {
    use calamine::Reader;
    first_sheet_table(calamine::Xlsx::new(Cursor::new(data))?)
}

// Legacy binary workbooks need their own reader; the zip-based Xlsx one
// cannot open them.
fn parse_xls_bytes(data: &[u8]) -> Result<RawTable, Box<dyn Error + Send + Sync>> {
    use calamine::Reader;
    first_sheet_table(calamine::Xls::new(Cursor::new(data))?)
}

fn first_sheet_table<RS, R>(mut workbook: R) -> Result<RawTable, Box<dyn Error + Send + Sync>>
where
    RS: std::io::Read + std::io::Seek,
    R: calamine::Reader<RS>,
    R::Error: Error + Send + Sync + 'static,
{
    use calamine::Data;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or("no sheets found in workbook")?;
    let range = workbook.worksheet_range(&sheet_name)?;

    let mut table: Vec<Vec<String>> = range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::Empty => String::new(),
                    Data::String(s) => s.clone(),
                    Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
                    other => other.to_string(),
                })
                .collect()
        })
        .collect();

    if table.is_empty() {
        return Ok(RawTable::default());
    }
    let headers = table.remove(0);
    Ok(RawTable::new(headers, table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CsvStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn test_app(store: Store) -> Router {
        let state = Arc::new(AppState {
            inventory: Mutex::new(Inventory::new()),
            store,
            http: reqwest::Client::new(),
        });
        Router::new()
            .route("/api/inventory/upload", post(upload_files))
            .route("/api/save", post(save_inventory))
            .with_state(state)
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn failed_save_surfaces_as_an_error_response() {
        let dir = tempdir().unwrap();
        // The parent directory does not exist, so every save fails.
        let store = Store::Local(CsvStore::new(dir.path().join("missing").join("inv.csv")));
        let app = test_app(store);

        let request = Request::builder()
            .method("POST")
            .uri("/api/save")
            .body(Body::empty())
            .unwrap();
        let body = response_json(app.oneshot(request).await.unwrap()).await;

        assert_eq!(body["status"], "error");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn upload_applies_csv_files_as_a_replacement() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inv.csv");
        let app = test_app(Store::Local(CsvStore::new(&path)));

        let body = concat!(
            "--boundary\r\n",
            "Content-Disposition: form-data; name=\"files\"; filename=\"upload.csv\"\r\n",
            "Content-Type: text/csv\r\n",
            "\r\n",
            "name,bottles\r\n",
            "Acetone,2\r\n",
            "\r\n--boundary--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/inventory/upload")
            .header("content-type", "multipart/form-data; boundary=boundary")
            .body(Body::from(body))
            .unwrap();
        let json = response_json(app.oneshot(request).await.unwrap()).await;
        assert_eq!(json["status"], "ok");

        let saved = CsvStore::new(&path).load();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved.rows[0].name, "Acetone");
        assert_eq!(saved.rows[0].bottles, 2);
    }

    #[tokio::test]
    async fn truncated_upload_surfaces_the_stream_error() {
        let dir = tempdir().unwrap();
        let app = test_app(Store::Local(CsvStore::new(dir.path().join("inv.csv"))));

        // A part that starts but never reaches a closing boundary.
        let body = concat!(
            "--boundary\r\n",
            "Content-Disposition: form-data; name=\"files\"; filename=\"upload.csv\"\r\n",
            "Content-Type: text/csv\r\n",
            "\r\n",
            "name,bottles\r\nAce"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/inventory/upload")
            .header("content-type", "multipart/form-data; boundary=boundary")
            .body(Body::from(body))
            .unwrap();
        let json = response_json(app.oneshot(request).await.unwrap()).await;

        assert_eq!(json["status"], "error");
        let message = json["message"].as_str().unwrap();
        assert!(message.contains("could not read upload"), "{}", message);
    }

    #[test]
    fn upload_dispatch_covers_the_supported_extensions() {
        assert!(parse_table("inventory.csv", b"name\nAcetone\n")
            .unwrap()
            .is_ok());
        assert!(parse_table("notes.txt", b"whatever").is_none());
        // Workbook uploads with garbage bytes error cleanly through either
        // reader instead of panicking.
        assert!(parse_table("legacy.xls", b"not a workbook").unwrap().is_err());
        assert!(parse_table("modern.xlsx", b"not a workbook").unwrap().is_err());
    }
}
