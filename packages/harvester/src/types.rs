use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a stored tender row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenderId(pub Uuid);

impl TenderId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TenderId {
    fn default() -> Self {
        Self::new()
    }
}

/// Brazilian federative-unit code used to filter the portal listing.
///
/// Closed set: the pipeline only ever harvests one of these 27 regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RegionCode {
    Ac, Al, Ap, Am, Ba, Ce, Df, Es, Go, Ma, Mt, Ms, Mg, Pa,
    Pb, Pr, Pe, Pi, Rj, Rn, Rs, Ro, Rr, Sc, Sp, Se, To,
}

impl RegionCode {
    /// Every federative unit, in the portal's canonical order.
    pub const ALL: [RegionCode; 27] = [
        RegionCode::Ac, RegionCode::Al, RegionCode::Ap, RegionCode::Am,
        RegionCode::Ba, RegionCode::Ce, RegionCode::Df, RegionCode::Es,
        RegionCode::Go, RegionCode::Ma, RegionCode::Mt, RegionCode::Ms,
        RegionCode::Mg, RegionCode::Pa, RegionCode::Pb, RegionCode::Pr,
        RegionCode::Pe, RegionCode::Pi, RegionCode::Rj, RegionCode::Rn,
        RegionCode::Rs, RegionCode::Ro, RegionCode::Rr, RegionCode::Sc,
        RegionCode::Sp, RegionCode::Se, RegionCode::To,
    ];

    /// High-volume regions worth harvesting first when time is limited.
    pub const PRIORITY: [RegionCode; 9] = [
        RegionCode::Sp, RegionCode::Rj, RegionCode::Mg, RegionCode::Rs,
        RegionCode::Pr, RegionCode::Sc, RegionCode::Ba, RegionCode::Go,
        RegionCode::Df,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionCode::Ac => "AC",
            RegionCode::Al => "AL",
            RegionCode::Ap => "AP",
            RegionCode::Am => "AM",
            RegionCode::Ba => "BA",
            RegionCode::Ce => "CE",
            RegionCode::Df => "DF",
            RegionCode::Es => "ES",
            RegionCode::Go => "GO",
            RegionCode::Ma => "MA",
            RegionCode::Mt => "MT",
            RegionCode::Ms => "MS",
            RegionCode::Mg => "MG",
            RegionCode::Pa => "PA",
            RegionCode::Pb => "PB",
            RegionCode::Pr => "PR",
            RegionCode::Pe => "PE",
            RegionCode::Pi => "PI",
            RegionCode::Rj => "RJ",
            RegionCode::Rn => "RN",
            RegionCode::Rs => "RS",
            RegionCode::Ro => "RO",
            RegionCode::Rr => "RR",
            RegionCode::Sc => "SC",
            RegionCode::Sp => "SP",
            RegionCode::Se => "SE",
            RegionCode::To => "TO",
        }
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegionCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = match s.trim().to_ascii_uppercase().as_str() {
            "AC" => RegionCode::Ac,
            "AL" => RegionCode::Al,
            "AP" => RegionCode::Ap,
            "AM" => RegionCode::Am,
            "BA" => RegionCode::Ba,
            "CE" => RegionCode::Ce,
            "DF" => RegionCode::Df,
            "ES" => RegionCode::Es,
            "GO" => RegionCode::Go,
            "MA" => RegionCode::Ma,
            "MT" => RegionCode::Mt,
            "MS" => RegionCode::Ms,
            "MG" => RegionCode::Mg,
            "PA" => RegionCode::Pa,
            "PB" => RegionCode::Pb,
            "PR" => RegionCode::Pr,
            "PE" => RegionCode::Pe,
            "PI" => RegionCode::Pi,
            "RJ" => RegionCode::Rj,
            "RN" => RegionCode::Rn,
            "RS" => RegionCode::Rs,
            "RO" => RegionCode::Ro,
            "RR" => RegionCode::Rr,
            "SC" => RegionCode::Sc,
            "SP" => RegionCode::Sp,
            "SE" => RegionCode::Se,
            "TO" => RegionCode::To,
            other => return Err(format!("unknown region code: {other}")),
        };
        Ok(code)
    }
}

impl TryFrom<String> for RegionCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RegionCode> for String {
    fn from(value: RegionCode) -> Self {
        value.as_str().to_string()
    }
}

/// A monetary cell from the portal.
///
/// The portal withholds some amounts behind a "Sigiloso" marker; that is a
/// distinct state, not zero and not absent. Absent values are modeled as
/// `Option<MoneyValue>::None` at the field level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MoneyValue {
    Amount(Decimal),
    Confidential,
}

impl MoneyValue {
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            MoneyValue::Amount(value) => Some(*value),
            MoneyValue::Confidential => None,
        }
    }

    pub fn is_confidential(&self) -> bool {
        matches!(self, MoneyValue::Confidential)
    }
}

/// How a field's value was obtained from the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Parsed out of the rendered markup structure.
    Structural,
    /// Recovered from raw visible text after structure failed.
    TextFallback,
}

/// Audit tag recording which method produced one extracted sub-field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub field: String,
    pub method: ExtractionMethod,
}

impl FieldProvenance {
    pub fn new(field: impl Into<String>, method: ExtractionMethod) -> Self {
        Self {
            field: field.into(),
            method,
        }
    }
}

/// One row of a tender's item table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Source numbering, kept as text (not always a contiguous integer).
    pub sequence_number: String,
    pub description: String,
    pub quantity: Option<i64>,
    pub unit_value: Option<MoneyValue>,
    pub total_value: Option<MoneyValue>,
    /// Originally extracted cell strings, retained for audit.
    pub raw_cells: Vec<String>,
    pub extraction_method: ExtractionMethod,
}

/// Outcome of one attachment reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Saved to the local download directory.
    Downloaded,
    /// Link resolved but the download was not performed.
    Simulated,
    /// Filename seen in page text only; no link resolved.
    ListedOnly,
}

/// One attachment reference discovered on a tender's Files panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub filename: String,
    pub original_url: Option<String>,
    /// Present only when a real download occurred.
    pub local_path: Option<PathBuf>,
    pub size_bytes: Option<u64>,
    pub download_status: DownloadStatus,
}

/// Card-level summary harvested from the listing, before detail enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenderStub {
    /// Portal control number; empty when the card did not expose one.
    pub external_id: String,
    pub region_code: RegionCode,
    pub title: String,
    /// Full card text, kept verbatim.
    pub card_text: String,
    pub object_description: String,
    pub organization_name: String,
    pub municipality_name: String,
    pub modality: String,
    pub publication_date: Option<NaiveDate>,
    /// Absolute detail-page URL resolved from the card's href, if any.
    pub detail_url: Option<String>,
    /// Listing URL the card was found on; becomes the record's source URL.
    pub listing_url: String,
}

/// One fully harvested procurement notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenderRecord {
    /// Portal control number; empty string when unparseable. Only non-empty
    /// values participate in deduplication.
    pub external_id: String,
    pub region_code: RegionCode,
    pub title: String,
    pub raw_description: String,
    pub object_description: String,
    pub organization_name: String,
    pub municipality_name: String,
    pub modality: String,
    pub status: String,
    pub estimated_total_value: Option<MoneyValue>,
    pub publication_date: Option<NaiveDate>,
    /// Raw `Prazo:` capture from the detail page; the portal mixes date and
    /// prose formats so this stays uninterpreted.
    pub deadline: Option<String>,
    pub source_url: String,
    pub detail_url: String,
    pub data_source: String,
    pub scraped_at: DateTime<Utc>,
    pub provenance: Vec<FieldProvenance>,
    pub items: Vec<LineItem>,
    pub files: Vec<FileDescriptor>,
}

impl TenderRecord {
    pub fn items_count(&self) -> usize {
        self.items.len()
    }

    pub fn downloads_count(&self) -> usize {
        self.files.len()
    }

    /// Records how one sub-field was extracted.
    pub fn tag_method(&mut self, field: &str, method: ExtractionMethod) {
        self.provenance.push(FieldProvenance::new(field, method));
    }
}

/// Per-region outcome reported in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionReport {
    pub region: RegionCode,
    /// Tenders fully harvested for the region.
    pub tenders: usize,
    /// Records whose items came from the structural pass.
    pub structural: usize,
    /// Records whose items came from the text-fallback pass.
    pub fallback: usize,
    /// Cards or pages abandoned after an extraction failure.
    pub failures: usize,
    /// True when a session-level failure cut the region short.
    pub aborted: bool,
}

/// Aggregate result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub records: Vec<TenderRecord>,
    pub regions: Vec<RegionReport>,
}

impl RunSummary {
    /// Extraction-method breakdown over the whole batch.
    pub fn method_breakdown(&self) -> (usize, usize) {
        let structural = self
            .regions
            .iter()
            .map(|region| region.structural)
            .sum();
        let fallback = self.regions.iter().map(|region| region.fallback).sum();
        (structural, fallback)
    }
}
