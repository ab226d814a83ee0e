use log::{info, warn};
use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};

use crate::inventory::{Inventory, RawTable};
use crate::secrets::Secrets;
#[cfg(feature = "web")]
use crate::sheets::SheetsStore;

/// Default local backing file, one row per chemical with the fixed header.
pub const DATA_FILE: &str = "chemicals_master.csv";

/// Local CSV backend.
///
/// Reads are forgiving: a missing or malformed file loads as the empty
/// table with the expected schema. Writes overwrite the whole file.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and normalize the backing file.
    ///
    /// # Examples
    /// ```no_run
    /// use labstock::storage::CsvStore;
    ///
    /// let inventory = CsvStore::new("chemicals_master.csv").load();
    /// println!("{} chemicals on file", inventory.len());
    /// ```
    pub fn load(&self) -> Inventory {
        if !self.path.exists() {
            return Inventory::new();
        }
        match self.read_raw() {
            Ok(raw) => raw.normalize(),
            Err(e) => {
                warn!(
                    "could not read {}, starting from an empty table: {}",
                    self.path.display(),
                    e
                );
                Inventory::new()
            }
        }
    }

    fn read_raw(&self) -> Result<RawTable, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(RawTable::new(headers, rows))
    }

    /// Normalize and write the whole table, header first. The destination
    /// is overwritten unconditionally.
    pub fn save(&self, inventory: &Inventory) -> io::Result<()> {
        let raw = inventory.normalized().to_raw();
        let mut writer = csv::Writer::from_path(&self.path)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        writer
            .write_record(&raw.headers)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        for row in &raw.rows {
            writer
                .write_record(row)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Persistence backend, chosen once at startup from the secrets mapping.
///
/// Remote mode needs the `[gsheets]` table to be enabled and complete;
/// anything less silently falls back to the local CSV. Neither backend
/// coordinates concurrent writers: the last save wins.
pub enum Store {
    Local(CsvStore),
    #[cfg(feature = "web")]
    Remote(SheetsStore),
}

impl Store {
    pub fn from_secrets(secrets: &Secrets) -> Store {
        #[cfg(feature = "web")]
        if secrets.gsheets.ready() {
            match SheetsStore::new(&secrets.gsheets) {
                Ok(store) => {
                    info!("using Google Sheets backend");
                    return Store::Remote(store);
                }
                Err(e) => {
                    warn!("Google Sheets configured but unusable, using local file: {}", e);
                }
            }
        }
        #[cfg(not(feature = "web"))]
        if secrets.gsheets.ready() {
            warn!("Google Sheets configured but this build has no web feature, using local file");
        }
        info!("using local CSV backend ({})", DATA_FILE);
        Store::Local(CsvStore::new(DATA_FILE))
    }

    pub fn is_remote(&self) -> bool {
        #[cfg(feature = "web")]
        if let Store::Remote(_) = self {
            return true;
        }
        false
    }

    pub async fn load_data(&self) -> Inventory {
        match self {
            Store::Local(csv) => csv.load(),
            #[cfg(feature = "web")]
            Store::Remote(sheets) => sheets.load().await,
        }
    }

    pub async fn save_data(
        &self,
        inventory: &Inventory,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        match self {
            Store::Local(csv) => Ok(csv.save(inventory)?),
            #[cfg(feature = "web")]
            Store::Remote(sheets) => sheets.save(inventory).await,
        }
    }
}
