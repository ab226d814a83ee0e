use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;

const PUG_REST: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";
const PUG_VIEW: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug_view";

// Joined hazard statements are capped so a verbose GHS record does not
// flood the form.
const MAX_HAZARDS: usize = 20;

lazy_static! {
    static ref CAS_PATTERN: Regex = Regex::new(r"^\d{2,7}-\d{2}-\d$").unwrap();
    static ref FORMULA_CARBONS: Regex = Regex::new(r"C(\d+)").unwrap();
}

// Synonyms containing one of these read like a name a chemist would use,
// so they rank ahead of database identifiers.
const PRIORITY_WORDS: [&str; 16] = [
    "acid", "alcohol", "oxide", "chloride", "hydroxide", "benzene", "acetone", "toluene", "ethyl",
    "methyl", "propyl", "butyl", "hexane", "heptane", "octane", "polymer",
];

/// Whether the query looks like a CAS registry number.
pub fn is_cas(query: &str) -> bool {
    CAS_PATTERN.is_match(query.trim())
}

/// Prefill data pulled from PubChem for the add-chemical form. Every field
/// stays editable by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChemicalDetails {
    pub name: String,
    pub cas: String,
    pub formula: String,
    pub carbons: Option<i64>,
    pub hazards: String,
    pub sds_link: String,
}

impl ChemicalDetails {
    /// What the form gets when PubChem has nothing for the query: the query
    /// itself plus a web search for its safety data sheet.
    pub fn fallback(query: &str) -> Self {
        ChemicalDetails {
            name: query.to_string(),
            cas: String::new(),
            formula: String::new(),
            carbons: None,
            hazards: String::new(),
            sds_link: sds_search_link(query),
        }
    }
}

fn sds_search_link(name: &str) -> String {
    format!(
        "https://www.google.com/search?q={}",
        urlencoding::encode(&format!("{} SDS", name))
    )
}

fn carbons_from_formula(formula: &str) -> Option<i64> {
    FORMULA_CARBONS
        .captures(formula)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Pick the synonym a lab member would actually call the chemical.
///
/// An exact match on the query wins outright; otherwise synonyms containing
/// a chemistry word rank first, shorter before longer.
fn pick_common_name(query: &str, synonyms: &[String]) -> String {
    if synonyms.is_empty() {
        return query.to_string();
    }
    let query_lower = query.trim().to_lowercase();
    if !is_cas(query) {
        if let Some(exact) = synonyms.iter().find(|s| s.to_lowercase() == query_lower) {
            return exact.clone();
        }
    }
    let mut ranked: Vec<&String> = synonyms.iter().collect();
    ranked.sort_by_key(|s| {
        let lower = s.to_lowercase();
        let priority = if PRIORITY_WORDS.iter().any(|w| lower.contains(w)) {
            0
        } else {
            1
        };
        (priority, s.len())
    });
    // Ranking by length buries the one name everyone uses for HCl under its
    // terser trade synonyms.
    if let Some(hcl) = ranked
        .iter()
        .find(|s| s.to_lowercase().contains("hydrochloric acid"))
    {
        return (*hcl).clone();
    }
    ranked[0].clone()
}

#[derive(Debug, Default)]
struct RecordFacts {
    synonyms: Vec<String>,
    formula: Option<String>,
    cas: Option<String>,
    hazards: Vec<String>,
    sds_link: Option<String>,
}

fn sections(value: &Value) -> &[Value] {
    value
        .get("Section")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn heading<'a>(value: &'a Value) -> &'a str {
    value
        .get("TOCHeading")
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn information(value: &Value) -> &[Value] {
    value
        .get("Information")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

// Depth-first walk over a PUG-View record, collecting the handful of fields
// the add-chemical form can prefill.
fn walk(section_list: &[Value], facts: &mut RecordFacts) {
    for sec in section_list {
        let toc = heading(sec);
        if toc == "Names and Identifiers" || toc == "Synonyms" {
            for sub in sections(sec) {
                match heading(sub) {
                    "Synonyms" | "Depositor-Supplied Synonyms" | "Other Names" => {
                        for info in information(sub) {
                            let strings = info
                                .get("StringList")
                                .and_then(|l| l.get("String"))
                                .and_then(Value::as_array);
                            if let Some(strings) = strings {
                                facts.synonyms.extend(
                                    strings.iter().filter_map(Value::as_str).map(String::from),
                                );
                            }
                        }
                    }
                    "Molecular Formula" => {
                        for info in information(sub) {
                            if let Some(s) = info.get("StringValue").and_then(Value::as_str) {
                                facts.formula = Some(s.to_string());
                            }
                        }
                    }
                    "CAS" => {
                        for info in information(sub) {
                            if let Some(s) = info.get("StringValue").and_then(Value::as_str) {
                                facts.cas = Some(s.to_string());
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        if toc == "Safety and Hazards" || toc == "GHS Classification" {
            for sub in sections(sec) {
                if heading(sub) == "GHS Classification" {
                    for info in information(sub) {
                        let markup = info
                            .get("StringWithMarkup")
                            .and_then(Value::as_array)
                            .map(Vec::as_slice)
                            .unwrap_or(&[]);
                        for item in markup {
                            let text = item
                                .get("String")
                                .and_then(Value::as_str)
                                .unwrap_or("")
                                .trim();
                            if !text.is_empty() && !facts.hazards.iter().any(|h| h == text) {
                                facts.hazards.push(text.to_string());
                            }
                        }
                    }
                }
            }
        }
        if toc == "Safety and Hazards" {
            for sub in sections(sec) {
                let sub_toc = heading(sub);
                if sub_toc == "Safety Sources" || sub_toc == "Safety and Hazards - SDS" {
                    for info in information(sub) {
                        let refs = info
                            .get("Reference")
                            .and_then(Value::as_array)
                            .map(Vec::as_slice)
                            .unwrap_or(&[]);
                        for reference in refs {
                            if facts.sds_link.is_none() {
                                if let Some(url) = reference.get("URL").and_then(Value::as_str) {
                                    facts.sds_link = Some(url.to_string());
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    for sec in section_list {
        let nested = sections(sec);
        if !nested.is_empty() {
            walk(nested, facts);
        }
    }
}

fn assemble(query: &str, facts: RecordFacts) -> ChemicalDetails {
    let common_name = if facts.synonyms.is_empty() {
        query.to_string()
    } else {
        pick_common_name(query, &facts.synonyms)
    };
    let cas = match facts.cas {
        Some(cas) => cas,
        None if is_cas(query) => query.to_string(),
        None => String::new(),
    };
    let formula = facts.formula.unwrap_or_default();
    let carbons = carbons_from_formula(&formula);
    let hazards = facts
        .hazards
        .iter()
        .take(MAX_HAZARDS)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    let sds_link = facts
        .sds_link
        .unwrap_or_else(|| sds_search_link(&common_name));
    ChemicalDetails {
        name: common_name,
        cas,
        formula,
        carbons,
        hazards,
        sds_link,
    }
}

/// Look a chemical up on PubChem by name or CAS number.
///
/// Resolves a CID through PUG-REST, then walks the PUG-View record for
/// synonyms, formula, CAS, GHS hazard statements and an SDS reference.
/// Never fails: any error degrades to the fallback record.
pub async fn fetch_details(client: &reqwest::Client, query: &str) -> ChemicalDetails {
    match try_fetch(client, query).await {
        Ok(details) => details,
        Err(e) => {
            debug!("PubChem lookup for {:?} failed: {}", query, e);
            ChemicalDetails::fallback(query)
        }
    }
}

async fn try_fetch(
    client: &reqwest::Client,
    query: &str,
) -> Result<ChemicalDetails, Box<dyn Error + Send + Sync>> {
    let cid_url = if is_cas(query) {
        format!("{}/compound/xref/RN/{}/cids/JSON", PUG_REST, query.trim())
    } else {
        format!(
            "{}/compound/name/{}/cids/JSON",
            PUG_REST,
            urlencoding::encode(query)
        )
    };
    let cids: Value = client
        .get(&cid_url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let cid = cids
        .get("IdentifierList")
        .and_then(|l| l.get("CID"))
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_i64)
        .ok_or("no CID found")?;

    let record: Value = client
        .get(format!("{}/data/compound/{}/JSON", PUG_VIEW, cid))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let mut facts = RecordFacts::default();
    let top = record
        .get("Record")
        .map(sections)
        .unwrap_or(&[]);
    walk(top, &mut facts);
    Ok(assemble(query, facts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cas_numbers_are_recognised() {
        assert!(is_cas("7647-01-0"));
        assert!(is_cas(" 67-64-1 "));
        assert!(!is_cas("acetone"));
        assert!(!is_cas("123-456-7"));
    }

    #[test]
    fn carbon_count_comes_from_the_formula() {
        assert_eq!(carbons_from_formula("C6H14"), Some(6));
        assert_eq!(carbons_from_formula("C27H46O"), Some(27));
        assert_eq!(carbons_from_formula("H2O"), None);
    }

    #[test]
    fn exact_synonym_match_wins() {
        let syns = vec!["2-Propanone".to_string(), "acetone".to_string()];
        assert_eq!(pick_common_name("Acetone", &syns), "acetone");
    }

    #[test]
    fn chemistry_words_rank_before_identifiers() {
        let syns = vec![
            "DTXSID8021482".to_string(),
            "Toluene".to_string(),
            "CHEBI:17578".to_string(),
        ];
        assert_eq!(pick_common_name("108-88-3", &syns), "Toluene");
    }

    #[test]
    fn hydrochloric_acid_beats_shorter_synonyms() {
        let syns = vec![
            "Muriatic acid".to_string(),
            "Hydrochloric acid".to_string(),
        ];
        assert_eq!(pick_common_name("7647-01-0", &syns), "Hydrochloric acid");
    }

    #[test]
    fn record_walk_collects_the_prefill_fields() {
        let record = json!([
            {
                "TOCHeading": "Names and Identifiers",
                "Section": [
                    {
                        "TOCHeading": "Molecular Formula",
                        "Information": [{"StringValue": "C3H6O"}]
                    },
                    {
                        "TOCHeading": "Depositor-Supplied Synonyms",
                        "Information": [
                            {"StringList": {"String": ["acetone", "2-Propanone"]}}
                        ]
                    },
                    {
                        "TOCHeading": "CAS",
                        "Information": [{"StringValue": "67-64-1"}]
                    }
                ]
            },
            {
                "TOCHeading": "Safety and Hazards",
                "Section": [
                    {
                        "TOCHeading": "GHS Classification",
                        "Information": [
                            {"StringWithMarkup": [
                                {"String": "H225: Highly flammable liquid and vapour"},
                                {"String": "H225: Highly flammable liquid and vapour"},
                                {"String": "  "}
                            ]}
                        ]
                    },
                    {
                        "TOCHeading": "Safety Sources",
                        "Information": [
                            {"Reference": [{"URL": "https://example.com/acetone-sds"}]}
                        ]
                    }
                ]
            }
        ]);
        let mut facts = RecordFacts::default();
        walk(record.as_array().unwrap(), &mut facts);

        let details = assemble("acetone", facts);
        assert_eq!(details.name, "acetone");
        assert_eq!(details.cas, "67-64-1");
        assert_eq!(details.formula, "C3H6O");
        assert_eq!(details.carbons, Some(3));
        assert_eq!(details.hazards, "H225: Highly flammable liquid and vapour");
        assert_eq!(details.sds_link, "https://example.com/acetone-sds");
    }

    #[test]
    fn fallback_links_to_an_sds_search() {
        let details = ChemicalDetails::fallback("mystery solvent");
        assert_eq!(details.name, "mystery solvent");
        assert!(details.sds_link.contains("mystery%20solvent%20SDS"));
    }
}
