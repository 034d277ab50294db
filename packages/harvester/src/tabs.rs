//! Activation of the tender detail sub-panels.
//!
//! The detail page hides its item table and attachment list behind tabs.
//! Activation is idempotent: an already-active panel is left alone so
//! repeated extraction passes never toggle the page state.

use tracing::{debug, warn};

use crate::config::HarvestConfig;
use crate::selectors::{resolve_first, SelectorChain, Strategy};
use crate::session::{BrowserPage, PageElement, SessionResult};

/// Named sub-panels of a tender detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Items,
    Files,
}

impl Panel {
    fn chain(self) -> &'static SelectorChain {
        match self {
            Panel::Items => &ITEMS_TAB_CHAIN,
            Panel::Files => &FILES_TAB_CHAIN,
        }
    }
}

pub(crate) const ITEMS_TAB_CHAIN: SelectorChain = SelectorChain {
    name: "items-tab",
    strategies: &[
        Strategy::labeled("li.tab-item", "itens"),
        Strategy::labeled("button", "itens"),
        Strategy::labeled("[role=\"tab\"]", "itens"),
        Strategy::labeled("li", "itens"),
        Strategy::labeled("a", "itens"),
    ],
};

pub(crate) const FILES_TAB_CHAIN: SelectorChain = SelectorChain {
    name: "files-tab",
    strategies: &[
        Strategy::labeled("li.tab-item", "arquivos"),
        Strategy::labeled("button", "arquivos"),
        Strategy::labeled("[role=\"tab\"]", "arquivos"),
        Strategy::labeled("li", "arquivos"),
        Strategy::labeled("a", "arquivos"),
    ],
};

fn is_active_class(class: &str) -> bool {
    class
        .split_whitespace()
        .any(|token| token == "active" || token == "is-active")
}

/// Brings the panel to the active state. Returns false when no matching tab
/// exists on the page; extraction then proceeds against whatever is visible.
pub async fn activate_panel<P: BrowserPage>(
    page: &P,
    panel: Panel,
    config: &HarvestConfig,
) -> SessionResult<bool> {
    let tabs = resolve_first(page, panel.chain()).await?;
    let Some(tab) = tabs.first() else {
        debug!(panel = ?panel, "no tab control found");
        return Ok(false);
    };

    let class = tab.attribute("class").await?.unwrap_or_default();
    if is_active_class(&class) {
        debug!(panel = ?panel, "panel already active");
        return Ok(true);
    }

    if let Err(error) = tab.click().await {
        warn!(panel = ?panel, %error, "tab click failed");
        return Ok(false);
    }
    page.settle(config.tab_settle).await;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ClickEffect, FakeNode, FakePage};

    fn detail_page() -> FakePage {
        FakePage::builder()
            .view("detail", "https://pncp.gov.br/app/editais/13069/2024/1")
            .node(
                "li.tab-item",
                FakeNode::text("Histórico").attr("class", "tab-item"),
            )
            .node(
                "li.tab-item",
                FakeNode::text("Itens")
                    .attr("class", "tab-item")
                    .on_click(ClickEffect::GoToView("detail-items")),
            )
            .view("detail-items", "https://pncp.gov.br/app/editais/13069/2024/1")
            .node(
                "li.tab-item",
                FakeNode::text("Itens").attr("class", "tab-item is-active"),
            )
            .build()
    }

    #[tokio::test]
    async fn test_activation_clicks_the_labeled_tab() {
        let config = HarvestConfig::default();
        let page = detail_page();

        let activated = activate_panel(&page, Panel::Items, &config).await.unwrap();
        assert!(activated);
        assert_eq!(page.clicks(), vec!["Itens".to_string()]);
        assert_eq!(page.current_view(), "detail-items");
    }

    #[tokio::test]
    async fn test_activation_is_idempotent() {
        let config = HarvestConfig::default();
        let page = detail_page();

        activate_panel(&page, Panel::Items, &config).await.unwrap();
        let again = activate_panel(&page, Panel::Items, &config).await.unwrap();
        assert!(again);
        // Second call saw the active class and left the page alone.
        assert_eq!(page.clicks().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_tab_reports_false() {
        let config = HarvestConfig::default();
        let page = FakePage::builder()
            .view("detail", "https://pncp.gov.br/app/editais/1/2024/1")
            .element("li.tab-item", "Histórico")
            .build();

        let activated = activate_panel(&page, Panel::Files, &config).await.unwrap();
        assert!(!activated);
        assert!(page.clicks().is_empty());
    }

    #[test]
    fn test_active_class_tokens() {
        assert!(is_active_class("tab-item is-active"));
        assert!(is_active_class("nav active"));
        assert!(!is_active_class("tab-item inactive"));
        assert!(!is_active_class(""));
    }
}
