//! PNCP Tender Harvester
//!
//! Extraction pipeline for public procurement notices published on Brazil's
//! PNCP portal (Portal Nacional de Contratações Públicas). The portal is an
//! Angular application with no stable API surface, so the harvester drives a
//! real browser over the listing and detail pages, extracts structured
//! records with layered fallbacks, and reconciles them into Postgres.
//!
//! # Design
//!
//! - Every component is generic over the [`session`] traits; production runs
//!   use the [`cdp`] Chrome driver, tests use the scripted fakes in
//!   [`testing`].
//! - Markup drift is absorbed by ordered [`selectors::SelectorChain`] values
//!   rather than scattered retries; timeouts are control-flow values.
//! - Extraction degrades, never guesses: structural harvest first, visible
//!   text second, and each stored field carries its provenance method.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pncp_harvester::{
//!     CdpBrowser, HarvestConfig, PostgresTenderStore, RegionCode, TenderPipeline,
//! };
//!
//! let store = PostgresTenderStore::new(&database_url).await?;
//! store.ensure_schema().await?;
//!
//! let browser = CdpBrowser::launch(true).await?;
//! let pipeline = TenderPipeline::new(browser, store, HarvestConfig::from_env());
//! let summary = pipeline.run(&[RegionCode::Sp, RegionCode::Rj], 10).await?;
//! println!("inserted {} tenders", summary.inserted);
//! ```
//!
//! # Modules
//!
//! - [`session`] - Browser-session trait abstractions
//! - [`cdp`] - chromiumoxide driver implementing the session traits
//! - [`selectors`] - Multi-strategy element resolution
//! - [`listing`] - Region listing walk and card parsing
//! - [`detail`] - Detail-page scalar extraction
//! - [`tabs`] - Panel activation (Itens / Arquivos)
//! - [`items`] - Line-item extraction with text fallback
//! - [`rows`] - Row classification for the items table
//! - [`files`] - Attachment collection and download handling
//! - [`normalize`] - Brazilian-format number, currency and date parsing
//! - [`pipeline`] - Region orchestration and record assembly
//! - [`reconcile`] - Batch dedup plus insert-or-update persistence
//! - [`storage`] - `TenderStore` trait and the Postgres implementation
//! - [`testing`] - Scripted fakes for pipeline and store tests

pub mod cdp;
pub mod config;
pub mod detail;
pub mod error;
pub mod files;
pub mod items;
pub mod listing;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod rows;
pub mod selectors;
pub mod session;
pub mod storage;
pub mod tabs;
pub mod testing;
pub mod types;

// Re-export core errors
pub use error::{SessionError, StoreError};

// Re-export configuration
pub use config::{DownloadPolicy, HarvestConfig};

// Re-export the session surface and its production driver
pub use cdp::{CdpBrowser, CdpElement, CdpPage};
pub use session::{
    BrowserPage, PageElement, SavedDownload, SessionFactory, SessionResult, WaitOutcome,
};

// Re-export orchestration
pub use pipeline::{CancelHandle, TenderPipeline};
pub use reconcile::{dedup_batch, reconcile, ReconcileOutcome};

// Re-export stores
pub use storage::{PostgresTenderStore, TenderStore};

// Re-export domain types
pub use types::{
    DownloadStatus, ExtractionMethod, FieldProvenance, FileDescriptor, LineItem, MoneyValue,
    RegionCode, RegionReport, RunSummary, TenderId, TenderRecord, TenderStub,
};

#[cfg(test)]
mod selector_fixtures {
    //! Static checks of the portal selector chains against fixture markup.
    //! Chains live next to the code that resolves them; this module only
    //! proves the CSS itself parses and matches the shapes it is written for.

    use scraper::{Html, Selector};

    use crate::files::DOWNLOAD_CHAIN;
    use crate::items::ITEM_ROW_CHAIN;
    use crate::listing::{CARD_CHAIN, NEXT_PAGE_CHAIN};
    use crate::selectors::SelectorChain;
    use crate::tabs::{FILES_TAB_CHAIN, ITEMS_TAB_CHAIN};

    const ALL_CHAINS: &[&SelectorChain] = &[
        &CARD_CHAIN,
        &NEXT_PAGE_CHAIN,
        &ITEMS_TAB_CHAIN,
        &FILES_TAB_CHAIN,
        &ITEM_ROW_CHAIN,
        &DOWNLOAD_CHAIN,
    ];

    #[test]
    fn test_every_chain_strategy_is_valid_css() {
        for chain in ALL_CHAINS {
            for strategy in chain.strategies {
                assert!(
                    Selector::parse(strategy.css).is_ok(),
                    "chain {} carries unparseable css: {}",
                    chain.name,
                    strategy.css
                );
            }
        }
    }

    #[test]
    fn test_card_chain_primary_matches_listing_markup() {
        let html = Html::parse_fragment(
            r#"
            <div class="br-list">
                <a class="br-item" href="/app/editais/00038000000100-1-000123/2024">
                    Pregão Eletrônico 12/2024
                </a>
                <a class="br-item" href="/app/editais/00038000000100-1-000124/2024">
                    Concorrência 03/2024
                </a>
            </div>
            "#,
        );
        let selector = Selector::parse(CARD_CHAIN.strategies[0].css).unwrap();
        assert_eq!(html.select(&selector).count(), 2);
    }

    #[test]
    fn test_row_chain_primary_skips_hidden_panels() {
        let html = Html::parse_fragment(
            r#"
            <div role="tabpanel" hidden>
                <datatable-body-row>registro de histórico</datatable-body-row>
            </div>
            <div role="tabpanel">
                <datatable-body-row>1 Caneta esferográfica 500 R$ 1,20</datatable-body-row>
            </div>
            "#,
        );
        let selector = Selector::parse(ITEM_ROW_CHAIN.strategies[0].css).unwrap();
        let rows: Vec<_> = html.select(&selector).collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0]
            .text()
            .collect::<String>()
            .contains("Caneta esferográfica"));
    }

    #[test]
    fn test_next_page_chain_covers_both_portal_button_labels() {
        for markup in [
            r#"<button data-next-page="true">&gt;</button>"#,
            r#"<button aria-label="Página seguinte">&gt;</button>"#,
            r#"<button aria-label="Próxima página">&gt;</button>"#,
            r#"<button title="Próxima página">&gt;</button>"#,
        ] {
            let html = Html::parse_fragment(markup);
            let matched = NEXT_PAGE_CHAIN.strategies.iter().any(|strategy| {
                let selector = Selector::parse(strategy.css).unwrap();
                html.select(&selector).next().is_some()
            });
            assert!(matched, "no strategy matches {markup}");
        }
    }

    #[test]
    fn test_download_chain_catches_attachment_extensions() {
        let html = Html::parse_fragment(
            r#"
            <a href="/files/edital_45.pdf">Edital</a>
            <a href="/files/planilha.xlsx">Planilha</a>
            <a download href="/files/anexo">Anexo</a>
            "#,
        );
        let pdf = Selector::parse(DOWNLOAD_CHAIN.strategies[0].css).unwrap();
        assert_eq!(html.select(&pdf).count(), 1);
        let marked = Selector::parse("a[download]").unwrap();
        assert_eq!(html.select(&marked).count(), 1);
    }
}
