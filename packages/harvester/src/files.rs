//! Attachment collection from the Files panel.
//!
//! Depending on the configured policy the collector either saves real
//! downloads through the browser engine, records link metadata without
//! downloading, or just lists filename tokens found in the page text. A
//! download that never completes within the timeout is "not found" and the
//! tender keeps harvesting.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

use crate::config::{DownloadPolicy, HarvestConfig};
use crate::selectors::{resolve_first, SelectorChain, Strategy};
use crate::session::{BrowserPage, PageElement, SessionResult};
use crate::tabs::{activate_panel, Panel};
use crate::types::{DownloadStatus, FileDescriptor};

pub(crate) const DOWNLOAD_CHAIN: SelectorChain = SelectorChain {
    name: "download-links",
    strategies: &[
        Strategy::css("a[href*=\".pdf\"]"),
        Strategy::css("a[href*=\".doc\"]"),
        Strategy::css("a[href*=\".rar\"]"),
        Strategy::css("a[href*=\".zip\"]"),
        Strategy::css("a[download]"),
        Strategy::labeled("button", "baixar"),
        Strategy::labeled("a", "baixar"),
        Strategy::labeled("a", "download"),
    ],
};

lazy_static! {
    // Filename-shaped tokens with a known attachment extension
    static ref FILE_TOKEN: Regex =
        Regex::new(r"(?i)[\w][\w\-.]*\.(?:pdf|docx?|xlsx?|rar|zip)\b").unwrap();
}

/// Collects the attachment descriptors of the currently loaded detail page.
pub async fn collect_files<P: BrowserPage>(
    page: &P,
    tender_index: usize,
    config: &HarvestConfig,
) -> SessionResult<Vec<FileDescriptor>> {
    let activated = activate_panel(page, Panel::Files, config).await?;
    if !activated {
        debug!("files panel not activated, matching against the whole page");
    }

    if config.download_policy == DownloadPolicy::ListOnly {
        let body = page.body_text().await?;
        return Ok(list_from_text(&body, config.max_files_per_tender));
    }

    let links = resolve_first(page, &DOWNLOAD_CHAIN).await?;
    if links.is_empty() {
        return Ok(Vec::new());
    }
    let page_url = page.current_url().await?;

    if config.download_policy == DownloadPolicy::Save {
        page.begin_download_capture(&config.download_dir).await?;
    }

    let mut files = Vec::new();
    for (file_index, link) in links.iter().take(config.max_files_per_tender).enumerate() {
        let href = match link.attribute("href").await {
            Ok(href) => href,
            Err(error) => {
                warn!(file = file_index, %error, "href lookup failed, skipping link");
                continue;
            }
        };
        let original_url = href
            .as_deref()
            .and_then(|href| absolutize_href(&page_url, href));

        if config.download_policy == DownloadPolicy::Save {
            if let Err(error) = link.click().await {
                warn!(file = file_index, %error, "download click failed, skipping link");
                continue;
            }
            match page.wait_for_download(config.download_timeout).await? {
                Some(saved) => {
                    let filename = format!(
                        "edital_{tender_index}_{file_index}_{}",
                        sanitize_filename(&saved.suggested_name)
                    );
                    let destination = config.download_dir.join(&filename);
                    let local_path = match tokio::fs::rename(&saved.path, &destination).await {
                        Ok(()) => destination,
                        Err(error) => {
                            warn!(file = file_index, %error, "rename failed, keeping engine path");
                            saved.path.clone()
                        }
                    };
                    files.push(FileDescriptor {
                        filename,
                        original_url,
                        local_path: Some(local_path),
                        size_bytes: Some(saved.size_bytes),
                        download_status: DownloadStatus::Downloaded,
                    });
                }
                None => {
                    warn!(file = file_index, "download did not complete within timeout");
                }
            }
        } else {
            let filename = original_url
                .as_deref()
                .and_then(filename_from_url)
                .unwrap_or_else(|| format!("arquivo_{file_index}"));
            files.push(FileDescriptor {
                filename,
                original_url,
                local_path: None,
                size_bytes: None,
                download_status: DownloadStatus::Simulated,
            });
        }
    }
    Ok(files)
}

/// Filename tokens visible in the page text, for the list-only policy.
pub fn list_from_text(body: &str, cap: usize) -> Vec<FileDescriptor> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for token in FILE_TOKEN.find_iter(body) {
        let filename = token.as_str().to_string();
        if !seen.insert(filename.to_lowercase()) {
            continue;
        }
        files.push(FileDescriptor {
            filename,
            original_url: None,
            local_path: None,
            size_bytes: None,
            download_status: DownloadStatus::ListedOnly,
        });
        if files.len() >= cap {
            break;
        }
    }
    files
}

pub(crate) fn absolutize_href(page_url: &str, href: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(href) {
        return Some(absolute.to_string());
    }
    let base = Url::parse(page_url).ok()?;
    base.join(href).ok().map(|joined| joined.to_string())
}

fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Some(segment.to_string())
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scratch_dir, ClickEffect, FakeNode, FakePage};

    const DETAIL_URL: &str = "https://pncp.gov.br/app/editais/13069/2024/1";

    #[test]
    fn test_list_from_text_dedupes_and_caps() {
        let body = "Edital_completo.pdf\nanexo-i.docx\nEDITAL_COMPLETO.PDF\nnotas.txt";
        let files = list_from_text(body, 5);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "Edital_completo.pdf");
        assert_eq!(files[0].download_status, DownloadStatus::ListedOnly);
        assert!(files.iter().all(|f| f.local_path.is_none()));

        let many = "a1.pdf b2.pdf c3.pdf d4.pdf e5.pdf f6.pdf g7.pdf";
        assert_eq!(list_from_text(many, 5).len(), 5);
    }

    #[test]
    fn test_absolutize_href() {
        assert_eq!(
            absolutize_href(DETAIL_URL, "/arquivos/edital_45.pdf").as_deref(),
            Some("https://pncp.gov.br/arquivos/edital_45.pdf")
        );
        assert_eq!(
            absolutize_href(DETAIL_URL, "https://cdn.example.com/x.zip").as_deref(),
            Some("https://cdn.example.com/x.zip")
        );
        assert!(absolutize_href("not a url", "also/relative").is_none());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a b/c.pdf"), "a_b_c.pdf");
        assert_eq!(sanitize_filename("edital-45_v2.PDF"), "edital-45_v2.PDF");
    }

    #[tokio::test]
    async fn test_simulate_policy_records_links_without_downloading() {
        let config = HarvestConfig::default();
        let page = FakePage::builder()
            .view("detail", DETAIL_URL)
            .node(
                "a[href*=\".pdf\"]",
                FakeNode::text("Edital").attr("href", "/arquivos/edital_45.pdf"),
            )
            .node(
                "a[href*=\".pdf\"]",
                FakeNode::text("Anexo").attr("href", "/arquivos/anexo_i.pdf"),
            )
            .build();

        let files = collect_files(&page, 0, &config).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "edital_45.pdf");
        assert_eq!(
            files[0].original_url.as_deref(),
            Some("https://pncp.gov.br/arquivos/edital_45.pdf")
        );
        assert_eq!(files[0].download_status, DownloadStatus::Simulated);
        assert!(page.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_save_policy_persists_with_deterministic_names() {
        let dir = scratch_dir("save");
        let config = HarvestConfig::default()
            .with_download_policy(DownloadPolicy::Save)
            .with_download_dir(&dir);
        let page = FakePage::builder()
            .view("detail", DETAIL_URL)
            .node(
                "a[href*=\".pdf\"]",
                FakeNode::text("Edital")
                    .attr("href", "/arquivos/edital_45.pdf")
                    .on_click(ClickEffect::EmitDownload("edital 45.pdf")),
            )
            .build();

        let files = collect_files(&page, 3, &config).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "edital_3_0_edital_45.pdf");
        assert_eq!(files[0].download_status, DownloadStatus::Downloaded);
        assert_eq!(files[0].size_bytes, Some(13));
        let path = files[0].local_path.clone().unwrap();
        assert!(path.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_save_policy_tolerates_missing_completion() {
        let dir = scratch_dir("timeout");
        let config = HarvestConfig::default()
            .with_download_policy(DownloadPolicy::Save)
            .with_download_dir(&dir);
        let page = FakePage::builder()
            .view("detail", DETAIL_URL)
            .node(
                "a[href*=\".pdf\"]",
                FakeNode::text("Edital").attr("href", "/arquivos/edital_45.pdf"),
            )
            .build();

        let files = collect_files(&page, 0, &config).await.unwrap();
        assert!(files.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_link_cap() {
        let config = HarvestConfig::default();
        let mut builder = FakePage::builder().view("detail", DETAIL_URL);
        for i in 0..7 {
            builder = builder.node(
                "a[href*=\".pdf\"]",
                FakeNode::text("Anexo").attr("href", &format!("/arquivos/anexo_{i}.pdf")),
            );
        }
        let files = collect_files(&builder.build(), 0, &config).await.unwrap();
        assert_eq!(files.len(), 5);
    }
}
