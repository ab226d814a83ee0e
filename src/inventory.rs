use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Fixed column set for every inventory table. Output column order always
/// follows this list regardless of how the input was laid out.
pub const EXPECTED_COLS: [&str; 11] = [
    "name",
    "cas",
    "carbons",
    "distributor",
    "container_size",
    "state",
    "location",
    "bottles",
    "storage_conditions",
    "hazards",
    "sds_link",
];

/// One chemical record.
///
/// String fields are never null: a missing value is the empty string.
/// `bottles` defaults to 1 and is always a non-negative integer after
/// normalization; `carbons` is numeric and may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub name: String,
    pub cas: String,
    pub carbons: Option<f64>,
    pub distributor: String,
    pub container_size: String,
    pub state: String,
    pub location: String,
    pub bottles: i64,
    pub storage_conditions: String,
    pub hazards: String,
    pub sds_link: String,
}

impl Default for InventoryRow {
    fn default() -> Self {
        InventoryRow {
            name: String::new(),
            cas: String::new(),
            carbons: None,
            distributor: String::new(),
            container_size: String::new(),
            state: String::new(),
            location: String::new(),
            bottles: 1,
            storage_conditions: String::new(),
            hazards: String::new(),
            sds_link: String::new(),
        }
    }
}

impl InventoryRow {
    /// Cell text for one column, formatted the way the writers emit it.
    pub fn cell(&self, column: &str) -> String {
        match column {
            "name" => self.name.clone(),
            "cas" => self.cas.clone(),
            "carbons" => self.carbons.map(format_number).unwrap_or_default(),
            "distributor" => self.distributor.clone(),
            "container_size" => self.container_size.clone(),
            "state" => self.state.clone(),
            "location" => self.location.clone(),
            "bottles" => self.bottles.to_string(),
            "storage_conditions" => self.storage_conditions.clone(),
            "hazards" => self.hazards.clone(),
            "sds_link" => self.sds_link.clone(),
            _ => String::new(),
        }
    }

    /// Case-insensitive search over the columns the inventory view filters
    /// on: name, CAS, hazards, location and distributor.
    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        [
            &self.name,
            &self.cas,
            &self.hazards,
            &self.location,
            &self.distributor,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
    }
}

/// Coerce arbitrary cell text into a bottle count.
///
/// Malformed or empty input degrades to the default of 1; negative numeric
/// input clamps to 0 so the count is always non-negative.
pub fn coerce_bottles(raw: &str) -> i64 {
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => (n as i64).max(0),
        _ => 1,
    }
}

/// Coerce arbitrary cell text into a carbon count. Anything non-numeric is
/// simply absent.
pub fn coerce_carbons(raw: &str) -> Option<f64> {
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n),
        _ => None,
    }
}

// Files written by the earlier pandas tooling encode missing string cells as
// the literal text "nan".
fn clean_string(raw: &str) -> String {
    if raw == "nan" {
        String::new()
    } else {
        raw.to_string()
    }
}

// Whole numbers print without a trailing ".0" so a round trip through the
// CSV writer re-reads as the same value.
fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        x.to_string()
    }
}

/// An untyped table straight out of a CSV file, an uploaded workbook or a
/// remote sheet's value range: a header row plus string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        RawTable { headers, rows }
    }

    /// One-pass column-wise normalization.
    ///
    /// Every expected column is located in the input header (missing columns
    /// fill with defaults, unknown columns are dropped) and each cell is
    /// coerced to the column's type. The result always carries the full
    /// column set in the fixed order.
    pub fn normalize(&self) -> Inventory {
        // Map each expected column to its position in the input header.
        let positions: Vec<Option<usize>> = EXPECTED_COLS
            .iter()
            .map(|col| self.headers.iter().position(|h| h == col))
            .collect();

        let rows = self
            .rows
            .iter()
            .map(|raw| {
                let cell = |i: usize| -> &str {
                    positions[i]
                        .and_then(|p| raw.get(p))
                        .map(String::as_str)
                        .unwrap_or("")
                };
                InventoryRow {
                    name: clean_string(cell(0)),
                    cas: clean_string(cell(1)),
                    carbons: coerce_carbons(cell(2)),
                    distributor: clean_string(cell(3)),
                    container_size: clean_string(cell(4)),
                    state: clean_string(cell(5)),
                    location: clean_string(cell(6)),
                    bottles: coerce_bottles(cell(7)),
                    storage_conditions: clean_string(cell(8)),
                    hazards: clean_string(cell(9)),
                    sds_link: clean_string(cell(10)),
                }
            })
            .collect();

        Inventory { rows }
    }
}

/// The full inventory table. Loaded once per session, edited in place and
/// saved wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub rows: Vec<InventoryRow>,
}

impl Inventory {
    pub fn new() -> Self {
        Inventory::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: InventoryRow) {
        self.rows.push(row);
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Distinct non-blank storage locations, sorted.
    pub fn locations(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .rows
            .iter()
            .map(|r| r.location.trim())
            .filter(|loc| !loc.is_empty())
            .collect();
        set.into_iter().map(|s| s.to_string()).collect()
    }

    /// Rows matching a free-text search; an empty query matches everything.
    pub fn search(&self, query: &str) -> Vec<&InventoryRow> {
        if query.trim().is_empty() {
            return self.rows.iter().collect();
        }
        self.rows.iter().filter(|r| r.matches(query)).collect()
    }

    /// Remove every row stored in the given location.
    pub fn delete_location(&mut self, location: &str) {
        self.rows.retain(|r| r.location != location);
    }

    /// Render back to an untyped table with the fixed header, ready for a
    /// writer. `raw.normalize().to_raw().normalize()` equals
    /// `raw.normalize()`.
    pub fn to_raw(&self) -> RawTable {
        let headers = EXPECTED_COLS.iter().map(|c| c.to_string()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| EXPECTED_COLS.iter().map(|c| row.cell(c)).collect())
            .collect();
        RawTable { headers, rows }
    }

    /// Re-apply the type invariants to an already-typed table. Rows built by
    /// hand may carry a negative bottle count; everything else is already in
    /// range by construction.
    pub fn normalized(&self) -> Inventory {
        let rows = self
            .rows
            .iter()
            .map(|r| InventoryRow {
                bottles: r.bottles.max(0),
                ..r.clone()
            })
            .collect();
        Inventory { rows }
    }
}
