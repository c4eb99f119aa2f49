pub mod content;
pub mod example;

use std::sync::LazyLock;

use anyhow::{Context, Result};
use scraper::{Html, Selector};
use thiserror::Error;

use crate::db::{ContentRow, ScrapedPage};
use content::ContentBlock;

static SECTION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("section").unwrap());

/// Errors raised while extracting structured content from a page tree.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("malformed query example: {0}")]
    MalformedExample(String),
    #[error("<{tag}> element missing required '{attr}' attribute")]
    MissingAttribute {
        tag: &'static str,
        attr: &'static str,
    },
}

/// Two-pass pipeline: html → element tree → content blocks. An extraction
/// failure is recorded on the row so the page is skipped, not the batch.
pub fn process_page(page: &ScrapedPage) -> ContentRow {
    match page_blocks(&page.html) {
        Ok(blocks) => {
            let examples = blocks
                .iter()
                .filter(|b| matches!(b, ContentBlock::Example { .. }))
                .count();
            ContentRow {
                page_data_id: page.page_data_id,
                slug: page.slug.clone(),
                url: page.url.clone(),
                content: Some(serde_json::to_string(&blocks).unwrap_or_default()),
                block_count: blocks.len() as i64,
                example_count: examples as i64,
                error: None,
            }
        }
        Err(e) => ContentRow {
            page_data_id: page.page_data_id,
            slug: page.slug.clone(),
            url: page.url.clone(),
            content: None,
            block_count: 0,
            example_count: 0,
            error: Some(e.to_string()),
        },
    }
}

/// Parse a page leniently and build its content blocks. The content root is
/// the document's first `section` element.
pub fn page_blocks(html: &str) -> Result<Vec<ContentBlock>> {
    let doc = Html::parse_document(html);
    let root = doc
        .select(&SECTION)
        .next()
        .context("page has no <section> content root")?;
    Ok(content::build_content(root)?)
}

// ── Tests ──
