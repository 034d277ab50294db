//! Line-item extraction from the Items panel.
//!
//! Two passes. The structural pass walks the rendered data-table rows of the
//! active panel; rows of hidden panels are excluded by the selector chain
//! plus the resolver's visibility filter. When structure yields nothing the
//! text fallback re-reads the visible page text between the item-table header
//! and the next section heading. Both passes share one positional cell
//! interpretation so the two methods stay comparable in the stored records.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::HarvestConfig;
use crate::normalize::{first_integer, looks_like_currency, parse_money};
use crate::rows::is_line_item_row;
use crate::selectors::{resolve_first, SelectorChain, Strategy};
use crate::session::{BrowserPage, PageElement, SessionResult};
use crate::tabs::{activate_panel, Panel};
use crate::types::{ExtractionMethod, LineItem, MoneyValue};

pub(crate) const ITEM_ROW_CHAIN: SelectorChain = SelectorChain {
    name: "item-rows",
    strategies: &[
        Strategy::css("div[role=\"tabpanel\"]:not([hidden]) datatable-body-row"),
        Strategy::css("div[aria-hidden=\"false\"] datatable-body-row"),
        Strategy::css("div.tab-content:not(.d-none) datatable-body-row"),
        Strategy::css("div.active datatable-body-row"),
        Strategy::css("datatable-body-row"),
    ],
};

const ROW_PRESENCE: &str = "datatable-body-row";
const CELL_SELECTOR: &str = "datatable-body-cell";
const RENDERED_SPAN: &str = "span.ng-star-inserted";

lazy_static! {
    // Fallback lines split on tabs or wide gaps
    static ref COLUMN_SPLIT: Regex = Regex::new(r"\t+|\s{3,}").unwrap();
}

/// Result of one extraction attempt over a detail page.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemHarvest {
    pub items: Vec<LineItem>,
    /// `None` when the page yielded no items at all.
    pub method: Option<ExtractionMethod>,
}

impl ItemHarvest {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            method: None,
        }
    }
}

/// Extracts the line-items of the currently loaded detail page.
pub async fn extract_items<P: BrowserPage>(
    page: &P,
    config: &HarvestConfig,
) -> SessionResult<ItemHarvest> {
    let activated = activate_panel(page, Panel::Items, config).await?;
    if activated {
        let outcome = page
            .wait_for_any(ROW_PRESENCE, config.panel_timeout)
            .await?;
        if !outcome.found() {
            debug!("no data-table rows appeared within the panel timeout");
        }
    }

    let rows = resolve_first(page, &ITEM_ROW_CHAIN).await?;
    let mut items = Vec::new();
    for (index, row) in rows.iter().take(config.max_items_per_page).enumerate() {
        match structural_row(row, index).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(error) => {
                // One bad row never aborts the batch.
                warn!(row = index, %error, "item row extraction failed, skipping");
            }
        }
    }

    if !items.is_empty() {
        debug!(items = items.len(), "structural item extraction succeeded");
        return Ok(ItemHarvest {
            items,
            method: Some(ExtractionMethod::Structural),
        });
    }

    let body = page.body_text().await?;
    let items = parse_items_from_text(&body, config.max_items_per_page);
    if items.is_empty() {
        Ok(ItemHarvest::empty())
    } else {
        debug!(items = items.len(), "text fallback item extraction succeeded");
        Ok(ItemHarvest {
            items,
            method: Some(ExtractionMethod::TextFallback),
        })
    }
}

async fn structural_row<E: PageElement>(
    row: &E,
    index: usize,
) -> SessionResult<Option<LineItem>> {
    let row_text = row.text().await?;
    if !is_line_item_row(&row_text) {
        return Ok(None);
    }

    let cells = row.find_all(CELL_SELECTOR).await?;
    if cells.is_empty() {
        return Ok(None);
    }

    let mut texts = Vec::with_capacity(cells.len());
    for cell in &cells {
        texts.push(cell_text(cell).await?);
    }
    Ok(Some(interpret_cells(
        &texts,
        index,
        ExtractionMethod::Structural,
    )))
}

/// Cell value, preferring the framework-rendered span over the raw cell text.
async fn cell_text<E: PageElement>(cell: &E) -> SessionResult<String> {
    let spans = cell.find_all(RENDERED_SPAN).await?;
    for span in &spans {
        let text = span.text().await?;
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    Ok(cell.text().await?.trim().to_string())
}

fn money_cell(text: &str) -> Option<MoneyValue> {
    if looks_like_currency(text) || text.to_lowercase().contains("sigiloso") {
        parse_money(text)
    } else {
        None
    }
}

/// Positional interpretation shared by both passes.
///
/// Cell 0 is the sequence number when purely numeric, else the row position
/// stands in. Cell 1 is the description when long enough to be one. Remaining
/// cells: currency-shaped values are taken in order as unit then total; the
/// first plain integer among the rest is the quantity.
pub fn interpret_cells(
    cells: &[String],
    row_index: usize,
    method: ExtractionMethod,
) -> LineItem {
    let sequence_number = match cells.first() {
        Some(first)
            if !first.trim().is_empty()
                && first.trim().chars().all(|c| c.is_ascii_digit()) =>
        {
            first.trim().to_string()
        }
        _ => (row_index + 1).to_string(),
    };

    let description = match cells.get(1) {
        Some(second) if second.trim().chars().count() > 5 => second.trim().to_string(),
        _ => format!("Item {sequence_number}"),
    };

    let mut quantity = None;
    let mut unit_value = None;
    let mut total_value = None;
    for cell in cells.iter().skip(2) {
        if let Some(value) = money_cell(cell) {
            if unit_value.is_none() {
                unit_value = Some(value);
            } else if total_value.is_none() {
                total_value = Some(value);
            }
        } else if quantity.is_none() {
            quantity = first_integer(cell);
        }
    }

    LineItem {
        sequence_number,
        description,
        quantity,
        unit_value,
        total_value,
        raw_cells: cells.to_vec(),
        extraction_method: method,
    }
}

/// Text-fallback pass over the visible page text.
///
/// Scans from the item-table header (a line naming number, description and
/// quantity) until the next section heading, validating each line before
/// splitting it into positional columns.
pub fn parse_items_from_text(body: &str, cap: usize) -> Vec<LineItem> {
    let lines: Vec<&str> = body.lines().collect();
    let Some(header_index) = lines.iter().position(|line| {
        let lower = line.to_lowercase();
        (lower.contains("número") || lower.contains("numero"))
            && (lower.contains("descrição") || lower.contains("descricao"))
            && lower.contains("quantidade")
    }) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for line in &lines[header_index + 1..] {
        let lower = line.to_lowercase();
        if lower.contains("arquivos")
            || lower.contains("histórico")
            || lower.contains("historico")
            || lower.contains("voltar")
        {
            break;
        }
        if !is_line_item_row(line) {
            continue;
        }

        let cells: Vec<String> = COLUMN_SPLIT
            .split(line)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        if cells.is_empty() {
            continue;
        }

        items.push(interpret_cells(
            &cells,
            items.len(),
            ExtractionMethod::TextFallback,
        ));
        if items.len() >= cap {
            break;
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeNode, FakePage};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn amount(s: &str) -> Option<MoneyValue> {
        Some(MoneyValue::Amount(Decimal::from_str(s).unwrap()))
    }

    fn cells(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_interpret_cells_full_row() {
        let item = interpret_cells(
            &cells(&[
                "01",
                "Fornecimento de merenda escolar",
                "500",
                "R$ 12,50",
                "R$ 6250,00",
            ]),
            0,
            ExtractionMethod::Structural,
        );
        assert_eq!(item.sequence_number, "01");
        assert_eq!(item.description, "Fornecimento de merenda escolar");
        assert_eq!(item.quantity, Some(500));
        assert_eq!(item.unit_value, amount("12.50"));
        assert_eq!(item.total_value, amount("6250.00"));
        assert_eq!(item.raw_cells.len(), 5);
    }

    #[test]
    fn test_interpret_cells_positional_fallbacks() {
        let item = interpret_cells(
            &cells(&["n/a", "curto", "10"]),
            4,
            ExtractionMethod::Structural,
        );
        // Non-numeric first cell falls back to the row position.
        assert_eq!(item.sequence_number, "5");
        assert_eq!(item.description, "Item 5");
        assert_eq!(item.quantity, Some(10));
        assert_eq!(item.unit_value, None);
    }

    #[test]
    fn test_interpret_cells_confidential_values() {
        let item = interpret_cells(
            &cells(&[
                "02",
                "Serviço de vigilância patrimonial",
                "12",
                "Sigiloso",
                "Sigiloso",
            ]),
            1,
            ExtractionMethod::Structural,
        );
        assert_eq!(item.quantity, Some(12));
        assert_eq!(item.unit_value, Some(MoneyValue::Confidential));
        assert_eq!(item.total_value, Some(MoneyValue::Confidential));
    }

    #[test]
    fn test_parse_items_from_text_between_header_and_section() {
        let body = "Detalhes da contratação\n\
                    Número   Descrição   Quantidade   Valor unitário   Valor total\n\
                    1   Caneta esferográfica azul   1000   R$ 1,20   R$ 1200,00\n\
                    2   Papel A4 resma com 500 folhas   200   R$ 25,00   R$ 5000,00\n\
                    15/03/2024 10:22 Inclusão - Documento\n\
                    Arquivos\n\
                    3   Linha depois da seção   5   R$ 1,00   R$ 5,00\n";
        let items = parse_items_from_text(body, 10);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].description, "Caneta esferográfica azul");
        assert_eq!(items[0].quantity, Some(1000));
        assert_eq!(items[0].unit_value, amount("1.20"));
        assert_eq!(items[1].sequence_number, "2");
        assert!(items
            .iter()
            .all(|item| item.extraction_method == ExtractionMethod::TextFallback));
    }

    #[test]
    fn test_parse_items_from_text_without_header() {
        assert!(parse_items_from_text("sem tabela de itens aqui", 10).is_empty());
    }

    #[test]
    fn test_parse_items_from_text_honors_cap() {
        let mut body = String::from("Número   Descrição   Quantidade\n");
        for i in 0..50 {
            body.push_str(&format!(
                "{i}   Item de teste numero {i}   10   R$ 1,00   R$ 10,00\n"
            ));
        }
        assert_eq!(parse_items_from_text(&body, 10).len(), 10);
    }

    fn item_row(seq: &str, description: &str, qty: &str, unit: &str, total: &str) -> FakeNode {
        let text = format!("{seq} {description} {qty} {unit} {total}");
        FakeNode::text(&text)
            .child(
                CELL_SELECTOR,
                FakeNode::text("").child(RENDERED_SPAN, FakeNode::text(seq)),
            )
            .child(
                CELL_SELECTOR,
                FakeNode::text("").child(RENDERED_SPAN, FakeNode::text(description)),
            )
            .child(CELL_SELECTOR, FakeNode::text(qty))
            .child(CELL_SELECTOR, FakeNode::text(unit))
            .child(CELL_SELECTOR, FakeNode::text(total))
    }

    #[tokio::test]
    async fn test_extract_items_structural() {
        let config = HarvestConfig::default();
        let page = FakePage::builder()
            .view("detail", "https://pncp.gov.br/app/editais/1/2024/9")
            .node(
                "datatable-body-row",
                item_row("01", "Fornecimento de merenda escolar", "500", "R$ 12,50", "R$ 6250,00"),
            )
            .node(
                "datatable-body-row",
                item_row("02", "Transporte escolar rural", "12", "R$ 900,00", "R$ 10.800,00"),
            )
            .build();

        let harvest = extract_items(&page, &config).await.unwrap();
        assert_eq!(harvest.method, Some(ExtractionMethod::Structural));
        assert_eq!(harvest.items.len(), 2);
        assert_eq!(harvest.items[0].sequence_number, "01");
        assert_eq!(harvest.items[1].total_value, amount("10800.00"));
    }

    #[tokio::test]
    async fn test_extract_items_skips_hidden_rows() {
        let config = HarvestConfig::default();
        let page = FakePage::builder()
            .view("detail", "https://pncp.gov.br/app/editais/1/2024/9")
            .node(
                "datatable-body-row",
                item_row("01", "Material de expediente diverso", "10", "R$ 2,00", "R$ 20,00"),
            )
            .node(
                "datatable-body-row",
                item_row("09", "Linha de painel oculto", "99", "R$ 9,00", "R$ 891,00").hidden(),
            )
            .build();

        let harvest = extract_items(&page, &config).await.unwrap();
        assert_eq!(harvest.items.len(), 1);
        assert_eq!(harvest.items[0].sequence_number, "01");
    }

    #[tokio::test]
    async fn test_extract_items_caps_processed_rows() {
        let config = HarvestConfig::default();
        let mut builder = FakePage::builder().view(
            "detail",
            "https://pncp.gov.br/app/editais/1/2024/9",
        );
        for i in 0..50 {
            builder = builder.node(
                "datatable-body-row",
                item_row(
                    &format!("{i}"),
                    "Item repetido para teste de limite",
                    "1",
                    "R$ 1,00",
                    "R$ 1,00",
                ),
            );
        }
        let harvest = extract_items(&builder.build(), &config).await.unwrap();
        assert_eq!(harvest.items.len(), 10);
    }

    #[tokio::test]
    async fn test_extract_items_falls_back_to_text() {
        let config = HarvestConfig::default();
        let page = FakePage::builder()
            .view("detail", "https://pncp.gov.br/app/editais/1/2024/9")
            .body_text(
                "Número   Descrição   Quantidade\n\
                 1   Serviço de limpeza predial   4   R$ 2.000,00   R$ 8.000,00\n\
                 Voltar",
            )
            .build();

        let harvest = extract_items(&page, &config).await.unwrap();
        assert_eq!(harvest.method, Some(ExtractionMethod::TextFallback));
        assert_eq!(harvest.items.len(), 1);
        assert_eq!(harvest.items[0].unit_value, amount("2000.00"));
    }

    #[tokio::test]
    async fn test_extract_items_empty_page() {
        let config = HarvestConfig::default();
        let page = FakePage::builder()
            .view("detail", "https://pncp.gov.br/app/editais/1/2024/9")
            .build();

        let harvest = extract_items(&page, &config).await.unwrap();
        assert!(harvest.items.is_empty());
        assert_eq!(harvest.method, None);
    }
}
