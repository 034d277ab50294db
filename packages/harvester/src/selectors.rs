//! Multi-strategy element resolution.
//!
//! The portal's markup shifts between deployments, so every lookup carries an
//! ordered list of candidate strategies. A strategy is a CSS selector plus an
//! optional label filter (the portal renders some controls distinguishable
//! only by their text). The resolver returns the matches of the first
//! strategy that yields any visible, non-empty result; a chain that never
//! matches resolves to an empty list, which callers treat as "feature not on
//! this page".

use tracing::debug;

use crate::session::{BrowserPage, PageElement, SessionResult};

/// One way of locating a capability on the page.
#[derive(Debug, Clone, Copy)]
pub struct Strategy {
    pub css: &'static str,
    /// Case-insensitive substring the element text must contain.
    pub label: Option<&'static str>,
}

impl Strategy {
    pub const fn css(css: &'static str) -> Self {
        Self { css, label: None }
    }

    pub const fn labeled(css: &'static str, label: &'static str) -> Self {
        Self {
            css,
            label: Some(label),
        }
    }
}

/// Ordered fallback strategies for one capability.
#[derive(Debug, Clone, Copy)]
pub struct SelectorChain {
    pub name: &'static str,
    pub strategies: &'static [Strategy],
}

pub(crate) fn matches_label(text: &str, label: &str) -> bool {
    text.to_lowercase().contains(&label.to_lowercase())
}

/// Resolves a chain to the visible matches of its first productive strategy.
pub async fn resolve_first<P: BrowserPage>(
    page: &P,
    chain: &SelectorChain,
) -> SessionResult<Vec<P::Element>> {
    for (rank, strategy) in chain.strategies.iter().enumerate() {
        let candidates = page.find_all(strategy.css).await?;
        if candidates.is_empty() {
            continue;
        }

        let mut matched = Vec::new();
        for element in candidates {
            // One stale or detached element must not sink the strategy.
            let visible = match element.is_visible().await {
                Ok(visible) => visible,
                Err(error) => {
                    debug!(chain = chain.name, %error, "visibility probe failed, skipping element");
                    continue;
                }
            };
            if !visible {
                continue;
            }
            if let Some(label) = strategy.label {
                let text = match element.text().await {
                    Ok(text) => text,
                    Err(error) => {
                        debug!(chain = chain.name, %error, "text probe failed, skipping element");
                        continue;
                    }
                };
                if !matches_label(&text, label) {
                    continue;
                }
            }
            matched.push(element);
        }

        if !matched.is_empty() {
            debug!(
                chain = chain.name,
                rank,
                css = strategy.css,
                matches = matched.len(),
                "selector chain resolved"
            );
            return Ok(matched);
        }
    }

    debug!(chain = chain.name, "selector chain exhausted without matches");
    Ok(Vec::new())
}
