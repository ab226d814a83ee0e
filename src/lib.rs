/*!
# Lab Chemical Inventory

A small shareable inventory-management web app for tracking laboratory
chemicals, backed by either a local CSV file or a shared Google Sheet.

## Overview

The whole application is a data normalization/load/save routine plus a thin
web layer for editing rows. A table of chemicals is loaded once per session,
edited in place and saved wholesale on demand. There is no per-row
transactionality, no versioning and no coordination between concurrent
writers: the last save wins, unconditionally overwriting the destination.

## Architecture

### Data Layer
- **Inventory model** - One row per chemical with a fixed column set
  (`name, cas, carbons, distributor, container_size, state, location,
  bottles, storage_conditions, hazards, sds_link`)
- **Normalization** - A one-pass column-wise transform: every expected
  column exists afterwards, string fields are never null, `bottles` is a
  non-negative integer defaulting to 1 and `carbons` is numeric or absent

### Persistence Layer
- **Local backend** - A plain CSV file (`chemicals_master.csv`); a missing
  or malformed file loads as the empty table
- **Remote backend** - The first sheet of a configured Google spreadsheet,
  written wholesale via a clear-then-bulk-update; selected only when the
  `[gsheets]` secrets table is enabled and complete, otherwise the app
  silently falls back to the local file

### Web Layer
- **Technologies**: Rust, axum, tokio
- A static page plus a JSON API for listing/searching rows, adding
  chemicals (with PubChem prefill), uploading and merging CSV/XLSX files,
  deleting by storage location and saving on demand

## Modules

- **inventory**: row type, fixed column set, normalization, search
- **storage**: CSV backend and backend dispatch
- **secrets**: the `secrets.toml` mapping with the Google credentials
- **sheets**: Google Sheets backend (service-account token, value ranges)
- **lookup**: PubChem PUG-REST / PUG-View chemical lookup
- **app**: routing and handlers

## Usage

Run the `labstock` binary (requires the `web` feature) and open the printed
address in a browser. Configuration lives in `secrets.toml` next to the
binary; without it the app keeps everything in the local CSV.
*/

pub mod inventory;
pub mod secrets;
pub mod storage;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod lookup;
#[cfg(feature = "web")]
pub mod sheets;

/// Re-export the core types so callers can use them directly
pub use inventory::{Inventory, InventoryRow, RawTable, EXPECTED_COLS};
pub use secrets::Secrets;
pub use storage::{CsvStore, Store, DATA_FILE};
