//! Runtime configuration for a harvest run.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::types::RegionCode;

/// What to do with the attachments of a tender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadPolicy {
    /// Click each link and persist the file locally.
    Save,
    /// Resolve links and record descriptors without downloading.
    #[default]
    Simulate,
    /// Only scan visible text for filenames.
    ListOnly,
}

impl FromStr for DownloadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "save" | "download" => Ok(DownloadPolicy::Save),
            "simulate" => Ok(DownloadPolicy::Simulate),
            "list" | "list-only" | "list_only" => Ok(DownloadPolicy::ListOnly),
            other => Err(format!("unknown download policy: {other}")),
        }
    }
}

/// Tunables for the pipeline. Defaults mirror the portal's observed behavior;
/// the caps are stability bounds, not suggestions.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub base_url: String,
    /// Listing status filter; harvested records carry it as their status.
    pub status_filter: String,
    pub data_source: String,
    pub download_policy: DownloadPolicy,
    pub download_dir: PathBuf,
    pub max_pages_per_region: usize,
    pub max_items_per_page: usize,
    pub max_files_per_tender: usize,
    /// Bounded wait for the primary selector of each chain.
    pub selector_timeout: Duration,
    /// Bounded wait for panel content after a tab switch.
    pub panel_timeout: Duration,
    pub tab_settle: Duration,
    pub download_timeout: Duration,
    pub listing_settle: Duration,
    pub detail_settle: Duration,
    /// Mandatory pause between regions; rate limit against the portal's
    /// anti-automation defenses.
    pub inter_region_pause: Duration,
    pub max_concurrent_regions: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://pncp.gov.br".to_string(),
            status_filter: "recebendo_proposta".to_string(),
            data_source: "pncp".to_string(),
            download_policy: DownloadPolicy::default(),
            download_dir: PathBuf::from("downloads"),
            max_pages_per_region: 3,
            max_items_per_page: 10,
            max_files_per_tender: 5,
            selector_timeout: Duration::from_secs(10),
            panel_timeout: Duration::from_secs(5),
            tab_settle: Duration::from_secs(1),
            download_timeout: Duration::from_secs(10),
            listing_settle: Duration::from_secs(2),
            detail_settle: Duration::from_millis(1500),
            inter_region_pause: Duration::from_secs(3),
            max_concurrent_regions: 1,
        }
    }
}

impl HarvestConfig {
    /// Defaults overlaid with environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(base_url) = env::var("PNCP_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(dir) = env::var("HARVEST_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Ok(policy) = env::var("HARVEST_DOWNLOAD_POLICY") {
            if let Ok(policy) = policy.parse() {
                config.download_policy = policy;
            }
        }
        if let Ok(parallel) = env::var("HARVEST_MAX_CONCURRENT_REGIONS") {
            if let Ok(parallel) = parallel.parse() {
                config.max_concurrent_regions = parallel;
            }
        }
        config
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_download_policy(mut self, policy: DownloadPolicy) -> Self {
        self.download_policy = policy;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_max_pages_per_region(mut self, pages: usize) -> Self {
        self.max_pages_per_region = pages;
        self
    }

    pub fn with_max_concurrent_regions(mut self, workers: usize) -> Self {
        self.max_concurrent_regions = workers.max(1);
        self
    }

    pub fn with_inter_region_pause(mut self, pause: Duration) -> Self {
        self.inter_region_pause = pause;
        self
    }

    /// Filtered listing URL for one region and page.
    pub fn listing_url(&self, region: RegionCode, page: usize) -> String {
        format!(
            "{}/app/editais?pagina={}&ufs={}&q=&status={}",
            self.base_url.trim_end_matches('/'),
            page,
            region,
            self.status_filter
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_url_carries_filter_and_page() {
        let config = HarvestConfig::default();
        assert_eq!(
            config.listing_url(RegionCode::Sp, 1),
            "https://pncp.gov.br/app/editais?pagina=1&ufs=SP&q=&status=recebendo_proposta"
        );

        let config = config.with_base_url("http://localhost:4444/");
        assert_eq!(
            config.listing_url(RegionCode::Df, 3),
            "http://localhost:4444/app/editais?pagina=3&ufs=DF&q=&status=recebendo_proposta"
        );
    }

    #[test]
    fn test_download_policy_parsing() {
        assert_eq!("save".parse::<DownloadPolicy>(), Ok(DownloadPolicy::Save));
        assert_eq!(
            "Download".parse::<DownloadPolicy>(),
            Ok(DownloadPolicy::Save)
        );
        assert_eq!(
            "simulate".parse::<DownloadPolicy>(),
            Ok(DownloadPolicy::Simulate)
        );
        assert_eq!(
            "list-only".parse::<DownloadPolicy>(),
            Ok(DownloadPolicy::ListOnly)
        );
        assert!("bogus".parse::<DownloadPolicy>().is_err());
    }

    #[test]
    fn test_stability_bounds_default_on() {
        let config = HarvestConfig::default();
        assert_eq!(config.max_pages_per_region, 3);
        assert_eq!(config.max_items_per_page, 10);
        assert_eq!(config.max_files_per_tender, 5);
        assert_eq!(config.max_concurrent_regions, 1);
    }
}
