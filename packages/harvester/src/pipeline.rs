//! Top-level harvest pipeline.
//!
//! One leased page per region worker, regions in waves of
//! `max_concurrent_regions`, a mandatory pause between waves as a rate limit
//! against the portal's anti-automation defenses. Partial failure is data:
//! the summary carries counts, and only a store that cannot even report its
//! known identifiers fails the run.

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use chrono::Utc;

use crate::config::HarvestConfig;
use crate::detail::{extract_detail, DetailData};
use crate::error::{SessionError, StoreError};
use crate::listing::{collect_stubs, has_next_page, load_listing};
use crate::reconcile::{dedup_batch, reconcile};
use crate::session::{BrowserPage, SessionFactory};
use crate::storage::TenderStore;
use crate::types::{
    ExtractionMethod, RegionCode, RegionReport, RunSummary, TenderRecord, TenderStub,
};

/// Cooperative cancel flag, honored at region-wave boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct TenderPipeline<F, S> {
    factory: F,
    store: S,
    config: HarvestConfig,
    cancel: CancelHandle,
}

impl<F, S> TenderPipeline<F, S>
where
    F: SessionFactory,
    S: TenderStore,
{
    pub fn new(factory: F, store: S, config: HarvestConfig) -> Self {
        Self {
            factory,
            store,
            config,
            cancel: CancelHandle::new(),
        }
    }

    /// Clonable handle for cancelling the run from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Hands the session factory back, for drivers with an orderly shutdown.
    pub fn into_factory(self) -> F {
        self.factory
    }

    /// Harvests the given regions, reconciles the batch against the store and
    /// returns the aggregate summary. Only the store's identifier snapshot is
    /// a fatal error; everything else degrades into counts.
    pub async fn run(
        &self,
        regions: &[RegionCode],
        per_region_limit: usize,
    ) -> Result<RunSummary, StoreError> {
        let workers = self.config.max_concurrent_regions.max(1);
        let mut harvested = Vec::new();
        let mut reports = Vec::new();

        for (wave_index, wave) in regions.chunks(workers).enumerate() {
            if self.cancel.is_cancelled() {
                info!("cancellation requested, abandoning remaining regions");
                break;
            }
            if wave_index > 0 {
                tokio::time::sleep(self.config.inter_region_pause).await;
            }

            let outcomes = join_all(
                wave.iter()
                    .map(|&region| self.harvest_region(region, per_region_limit)),
            )
            .await;
            for (records, report) in outcomes {
                harvested.extend(records);
                reports.push(report);
            }
        }

        let batch = dedup_batch(harvested);
        let outcome = reconcile(&self.store, batch.clone()).await?;

        let summary = RunSummary {
            inserted: outcome.inserted,
            updated: outcome.updated,
            failed: outcome.failed,
            records: batch,
            regions: reports,
        };
        let (structural, fallback) = summary.method_breakdown();
        info!(
            regions = summary.regions.len(),
            records = summary.records.len(),
            inserted = summary.inserted,
            updated = summary.updated,
            failed = summary.failed,
            structural,
            fallback,
            "harvest run complete"
        );
        Ok(summary)
    }

    /// One region, one leased page, strictly sequential navigation.
    async fn harvest_region(
        &self,
        region: RegionCode,
        limit: usize,
    ) -> (Vec<TenderRecord>, RegionReport) {
        let mut report = RegionReport {
            region,
            tenders: 0,
            structural: 0,
            fallback: 0,
            failures: 0,
            aborted: false,
        };
        let mut records = Vec::new();

        let page = match self.factory.open().await {
            Ok(page) => page,
            Err(error) => {
                error!(region = %region, %error, "session lease failed, region aborted");
                report.aborted = true;
                return (records, report);
            }
        };

        let mut tender_index = 0usize;
        for page_number in 1..=self.config.max_pages_per_region {
            let remaining = limit.saturating_sub(records.len());
            if remaining == 0 {
                break;
            }

            match load_listing(&page, region, page_number, &self.config).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(error) => {
                    error!(region = %region, page = page_number, %error, "listing unreachable, region aborted");
                    report.aborted = true;
                    break;
                }
            }

            let stubs = match collect_stubs(&page, region, remaining).await {
                Ok(stubs) => stubs,
                Err(error) => {
                    error!(region = %region, page = page_number, %error, "card collection failed, region aborted");
                    report.aborted = true;
                    break;
                }
            };
            if stubs.is_empty() {
                break;
            }

            // Probed while the listing is still live; detail visits replace
            // the page state and the next listing page is loaded by URL.
            let advance = match has_next_page(&page).await {
                Ok(advance) => advance,
                Err(error) => {
                    debug!(region = %region, %error, "next-page probe failed");
                    false
                }
            };
            info!(
                region = %region,
                page = page_number,
                cards = stubs.len(),
                "listing page collected"
            );

            for stub in stubs {
                match self.visit_detail(&page, stub, tender_index).await {
                    Ok(record) => {
                        for entry in &record.provenance {
                            if entry.field == "items" {
                                match entry.method {
                                    ExtractionMethod::Structural => report.structural += 1,
                                    ExtractionMethod::TextFallback => report.fallback += 1,
                                }
                            }
                        }
                        records.push(record);
                    }
                    Err(error) => {
                        warn!(
                            region = %region,
                            tender = tender_index,
                            %error,
                            "detail visit failed, tender dropped"
                        );
                        report.failures += 1;
                    }
                }
                tender_index += 1;
            }

            if !advance {
                break;
            }
        }

        report.tenders = records.len();
        info!(
            region = %region,
            tenders = report.tenders,
            failures = report.failures,
            aborted = report.aborted,
            "region complete"
        );
        (records, report)
    }

    async fn visit_detail(
        &self,
        page: &F::Page,
        stub: TenderStub,
        tender_index: usize,
    ) -> Result<TenderRecord, SessionError> {
        let Some(detail_url) = stub.detail_url.clone() else {
            debug!(
                external_id = %stub.external_id,
                "card without detail reference, keeping card-only record"
            );
            return Ok(assemble_record(stub, DetailData::default(), &self.config));
        };

        page.navigate(&detail_url).await?;
        let data = extract_detail(page, tender_index, &self.config).await?;
        Ok(assemble_record(stub, data, &self.config))
    }
}

/// Merges the card stub with whatever the detail page contributed.
fn assemble_record(stub: TenderStub, data: DetailData, config: &HarvestConfig) -> TenderRecord {
    let object_from_card = !stub.object_description.is_empty();
    let raw_description = if stub.card_text.trim().is_empty() {
        data.detailed_description.clone()
    } else {
        stub.card_text
    };
    let object_description = if object_from_card {
        stub.object_description
    } else {
        data.object_detail.unwrap_or_default()
    };

    let mut record = TenderRecord {
        external_id: stub.external_id,
        region_code: stub.region_code,
        title: stub.title,
        raw_description,
        object_description,
        organization_name: stub.organization_name,
        municipality_name: stub.municipality_name,
        modality: stub.modality,
        status: config.status_filter.clone(),
        estimated_total_value: data.estimated_total_value,
        publication_date: stub.publication_date,
        deadline: data.deadline,
        source_url: stub.listing_url,
        detail_url: stub.detail_url.unwrap_or_default(),
        data_source: config.data_source.clone(),
        scraped_at: Utc::now(),
        provenance: Vec::new(),
        items: data.items,
        files: data.files,
    };

    if let Some(method) = data.items_method {
        record.tag_method("items", method);
    }
    if !record.external_id.is_empty() {
        record.tag_method("external_id", ExtractionMethod::Structural);
    }
    if !record.organization_name.is_empty() {
        record.tag_method("organization_name", ExtractionMethod::Structural);
    }
    if !record.municipality_name.is_empty() {
        record.tag_method("municipality_name", ExtractionMethod::Structural);
    }
    if !record.modality.is_empty() {
        record.tag_method("modality", ExtractionMethod::Structural);
    }
    if record.publication_date.is_some() {
        record.tag_method("publication_date", ExtractionMethod::Structural);
    }
    if !record.object_description.is_empty() {
        let method = if object_from_card {
            ExtractionMethod::Structural
        } else {
            ExtractionMethod::TextFallback
        };
        record.tag_method("object_description", method);
    }
    if record.estimated_total_value.is_some() {
        record.tag_method("estimated_total_value", ExtractionMethod::TextFallback);
    }
    if record.deadline.is_some() {
        record.tag_method("deadline", ExtractionMethod::TextFallback);
    }
    record
}
