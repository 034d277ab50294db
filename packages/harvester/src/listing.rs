//! Listing walker: loads one filtered listing page per region and turns the
//! visible cards into tender stubs.
//!
//! Card fields come out of labeled-line patterns tried in priority order; a
//! capture shorter than the field's minimum is treated as a miss so boilerplate
//! fragments ("PNCP: -") never shadow the real value further down the card.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::files::absolutize_href;
use crate::normalize::parse_date;
use crate::selectors::{resolve_first, SelectorChain, Strategy};
use crate::session::{BrowserPage, PageElement, SessionResult};
use crate::types::{RegionCode, TenderStub};

pub(crate) const CARD_CHAIN: SelectorChain = SelectorChain {
    name: "listing-cards",
    strategies: &[
        Strategy::css("a.br-item"),
        Strategy::css("a[href*=\"/editais/\"]"),
        Strategy::css(".br-item"),
    ],
};

pub(crate) const NEXT_PAGE_CHAIN: SelectorChain = SelectorChain {
    name: "next-page",
    strategies: &[
        Strategy::css("button[data-next-page]"),
        Strategy::css("button[aria-label=\"Página seguinte\"]"),
        Strategy::css("button[aria-label=\"Próxima página\"]"),
        Strategy::css("button[title=\"Próxima página\"]"),
    ],
};

lazy_static! {
    static ref EXTERNAL_ID_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)Id contratação PNCP:\s*([^\n\r]+)").unwrap(),
        Regex::new(r"(?i)PNCP:\s*([^\n\r]+)").unwrap(),
        Regex::new(r"(?i)Id PNCP:\s*([^\n\r]+)").unwrap(),
        Regex::new(r"(?i)Contratação PNCP:\s*([^\n\r]+)").unwrap(),
    ];
    static ref ORGANIZATION_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)Órgão:\s*([^\n\r]+)").unwrap(),
        Regex::new(r"(?i)Orgão:\s*([^\n\r]+)").unwrap(),
        Regex::new(r"(?i)Entidade:\s*([^\n\r]+)").unwrap(),
        Regex::new(r"(?i)Instituição:\s*([^\n\r]+)").unwrap(),
    ];
    static ref MUNICIPALITY_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)Local:\s*([^/\n\r]+)").unwrap(),
        Regex::new(r"(?i)Município:\s*([^/\n\r]+)").unwrap(),
        Regex::new(r"(?i)Cidade:\s*([^/\n\r]+)").unwrap(),
        Regex::new(r"(?i)Local de execução:\s*([^/\n\r]+)").unwrap(),
    ];
    static ref MODALITY_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)Modalidade[^:\n]*:\s*([^\n\r]+)").unwrap(),
        Regex::new(r"(?i)Tipo[^:\n]*:\s*([^\n\r]+)").unwrap(),
        Regex::new(r"(?i)Processo[^:\n]*:\s*([^\n\r]+)").unwrap(),
    ];
    static ref OBJECT_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)Objeto:\s*([^\n\r]+)").unwrap(),
        Regex::new(r"(?i)Descrição:\s*([^\n\r]+)").unwrap(),
        Regex::new(r"(?i)Finalidade:\s*([^\n\r]+)").unwrap(),
    ];
    static ref DATE_TOKEN: Regex = Regex::new(r"\d{1,2}/\d{1,2}/\d{4}").unwrap();
}

/// Navigates to the filtered listing page and waits for cards to render.
/// `false` means the region shows no results, which is an outcome, not an
/// error.
pub async fn load_listing<P: BrowserPage>(
    page: &P,
    region: RegionCode,
    page_number: usize,
    config: &HarvestConfig,
) -> SessionResult<bool> {
    let url = config.listing_url(region, page_number);
    page.navigate(&url).await?;
    page.settle(config.listing_settle).await;

    for (rank, strategy) in CARD_CHAIN.strategies.iter().enumerate() {
        // The primary selector gets the full budget, alternates half.
        let timeout = if rank == 0 {
            config.selector_timeout
        } else {
            config.selector_timeout / 2
        };
        if page.wait_for_any(strategy.css, timeout).await?.found() {
            debug!(region = %region, page = page_number, css = strategy.css, "listing loaded");
            return Ok(true);
        }
    }
    info!(region = %region, page = page_number, "no cards rendered for region");
    Ok(false)
}

/// Reads up to `remaining` cards off the current listing page.
pub async fn collect_stubs<P: BrowserPage>(
    page: &P,
    region: RegionCode,
    remaining: usize,
) -> SessionResult<Vec<TenderStub>> {
    let cards = resolve_first(page, &CARD_CHAIN).await?;
    let listing_url = page.current_url().await?;

    let mut stubs = Vec::new();
    for (index, card) in cards.iter().take(remaining).enumerate() {
        let card_text = match card.text().await {
            Ok(text) => text,
            Err(error) => {
                warn!(region = %region, card = index, %error, "card text read failed, skipping");
                continue;
            }
        };
        let href = match card.attribute("href").await {
            Ok(href) => href,
            Err(error) => {
                debug!(region = %region, card = index, %error, "card href read failed");
                None
            }
        };
        let detail_url = href
            .as_deref()
            .and_then(|href| absolutize_href(&listing_url, href));
        stubs.push(stub_from_card(&card_text, detail_url, region, &listing_url));
    }
    Ok(stubs)
}

/// Whether an enabled next-page control is present on the current listing.
/// Checked while the listing is live, before detail visits disturb it.
pub async fn has_next_page<P: BrowserPage>(page: &P) -> SessionResult<bool> {
    let controls = resolve_first(page, &NEXT_PAGE_CHAIN).await?;
    let Some(control) = controls.first() else {
        return Ok(false);
    };
    match control.is_enabled().await {
        Ok(true) => {}
        Ok(false) => return Ok(false),
        Err(error) => {
            debug!(%error, "next-page enabled probe failed");
            return Ok(false);
        }
    }
    match control.attribute("aria-disabled").await {
        Ok(aria) => Ok(aria.as_deref() != Some("true")),
        Err(error) => {
            debug!(%error, "next-page aria probe failed");
            Ok(false)
        }
    }
}

/// Builds a stub from one card's visible text.
pub fn stub_from_card(
    card_text: &str,
    detail_url: Option<String>,
    region: RegionCode,
    listing_url: &str,
) -> TenderStub {
    let title = card_text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string();

    TenderStub {
        external_id: first_capture(&EXTERNAL_ID_PATTERNS, card_text, 5),
        region_code: region,
        title,
        card_text: card_text.to_string(),
        object_description: first_capture(&OBJECT_PATTERNS, card_text, 10),
        organization_name: first_capture(&ORGANIZATION_PATTERNS, card_text, 3),
        municipality_name: first_capture(&MUNICIPALITY_PATTERNS, card_text, 2),
        modality: first_capture(&MODALITY_PATTERNS, card_text, 3),
        publication_date: extract_publication_date(card_text),
        detail_url,
        listing_url: listing_url.to_string(),
    }
}

/// `d/m/Y` token on the update-label line, else the first bare token anywhere.
pub fn extract_publication_date(text: &str) -> Option<NaiveDate> {
    if let Some((_, after)) = text.split_once("Última Atualização:") {
        let line = after.lines().next().unwrap_or_default();
        if let Some(token) = DATE_TOKEN.find(line) {
            if let Some(date) = parse_date(token.as_str()) {
                return Some(date);
            }
        }
    }
    DATE_TOKEN
        .find(text)
        .and_then(|token| parse_date(token.as_str()))
}

fn first_capture(patterns: &[Regex], text: &str, min_len: usize) -> String {
    for pattern in patterns {
        let Some(captures) = pattern.captures(text) else {
            continue;
        };
        let Some(capture) = captures.get(1) else {
            continue;
        };
        let value = capture.as_str().trim();
        if value.chars().count() > min_len {
            return value.to_string();
        }
    }
    String::new()
}
