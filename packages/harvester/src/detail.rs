//! Page-level extraction for one tender detail page.
//!
//! The caller navigates to the detail URL first. This module settles the
//! page, reads the visible text once for the scalar fields, then runs the
//! item and file extractors over the same page.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::HarvestConfig;
use crate::files::collect_files;
use crate::items::extract_items;
use crate::normalize::parse_money;
use crate::session::{BrowserPage, SessionResult};
use crate::types::{ExtractionMethod, FileDescriptor, LineItem, MoneyValue};

const DESCRIPTION_PREFIX_CHARS: usize = 2000;
const OBJECT_CAP_CHARS: usize = 1000;
const DEADLINE_CAP_CHARS: usize = 200;

lazy_static! {
    // Tried in order; the lazy tail picks the nearest amount or the
    // confidential marker after the label, whichever comes first.
    static ref TOTAL_VALUE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?is)VALOR\s+TOTAL\s+ESTIMADO.*?(R\$\s*[\d.,]+|sigiloso)").unwrap(),
        Regex::new(r"(?is)Valor\s+total.*?(R\$\s*[\d.,]+|sigiloso)").unwrap(),
        Regex::new(r"(?is)Valor\s+estimado.*?(R\$\s*[\d.,]+|sigiloso)").unwrap(),
        Regex::new(r"(?is)Total\s+estimado.*?(R\$\s*[\d.,]+|sigiloso)").unwrap(),
    ];
}

/// Everything one detail page contributes to a tender record.
#[derive(Debug, Default)]
pub struct DetailData {
    pub detailed_description: String,
    pub estimated_total_value: Option<MoneyValue>,
    pub object_detail: Option<String>,
    pub deadline: Option<String>,
    pub items: Vec<LineItem>,
    pub items_method: Option<ExtractionMethod>,
    pub files: Vec<FileDescriptor>,
}

/// Extracts the currently loaded detail page.
pub async fn extract_detail<P: BrowserPage>(
    page: &P,
    tender_index: usize,
    config: &HarvestConfig,
) -> SessionResult<DetailData> {
    page.settle(config.detail_settle).await;
    let body = page.body_text().await?;

    let harvest = extract_items(page, config).await?;
    let files = collect_files(page, tender_index, config).await?;

    Ok(DetailData {
        detailed_description: truncate_chars(&body, DESCRIPTION_PREFIX_CHARS),
        estimated_total_value: extract_total_value(&body),
        object_detail: labeled_line(&body, "Objeto:", OBJECT_CAP_CHARS),
        deadline: labeled_line(&body, "Prazo:", DEADLINE_CAP_CHARS),
        items: harvest.items,
        items_method: harvest.method,
        files,
    })
}

/// First matching total-value pattern wins; an unparseable amount falls
/// through to the next pattern.
pub fn extract_total_value(text: &str) -> Option<MoneyValue> {
    for pattern in TOTAL_VALUE_PATTERNS.iter() {
        let Some(captures) = pattern.captures(text) else {
            continue;
        };
        let token = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if let Some(value) = parse_money(token) {
            return Some(value);
        }
    }
    None
}

/// Rest of the line after `label`, trimmed and capped; `None` when the label
/// is absent or the line is blank.
fn labeled_line(text: &str, label: &str, cap: usize) -> Option<String> {
    let (_, after) = text.split_once(label)?;
    let line = after.lines().next().unwrap_or_default().trim();
    if line.is_empty() {
        return None;
    }
    Some(truncate_chars(line, cap))
}

fn truncate_chars(text: &str, cap: usize) -> String {
    text.chars().take(cap).collect()
}
