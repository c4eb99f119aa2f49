use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

static SIDEBAR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul.toc.nav.nav-site-sidebar").unwrap());
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static DOC_PAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z0-9][a-zA-Z0-9_-]*)\.html$").unwrap());

/// One sidebar entry: a section title, its page link, and nested sub-sections.
#[derive(Debug, Clone, Serialize)]
pub struct SectionEntry {
    pub title: String,
    pub link: String,
    pub children: Vec<SectionEntry>,
}

/// A flattened hierarchy entry, ready for the page queue.
pub struct PageSeed {
    pub url: String,
    pub slug: String,
    pub title: String,
    pub parent_slug: Option<String>,
    pub position: i64,
}

/// Build the nested navigation hierarchy from the docs sidebar, in sidebar
/// order. Pages without a sidebar produce an empty hierarchy.
pub fn build_hierarchy(doc: &Html) -> Vec<SectionEntry> {
    match doc.select(&SIDEBAR).next() {
        Some(sidebar) => entries_of(sidebar),
        None => Vec::new(),
    }
}

/// Recurse over a list's immediate `li` children. Each item contributes its
/// first anchor (title + link); items without an anchor are skipped. A nested
/// `ul` inside the item holds its sub-sections.
fn entries_of(list: ElementRef) -> Vec<SectionEntry> {
    let mut entries = Vec::new();

    for item in list
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "li")
    {
        let Some(anchor) = item.select(&ANCHOR).next() else {
            continue;
        };
        let Some(link) = anchor.value().attr("href") else {
            continue;
        };
        let title = anchor.text().collect::<String>().trim().to_string();

        let children = item
            .children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "ul")
            .map(entries_of)
            .unwrap_or_default();

        entries.push(SectionEntry {
            title,
            link: link.to_string(),
            children,
        });
    }

    entries
}

/// Flatten the hierarchy into page seeds for the scrape queue. Only same-site
/// doc pages (bare `*.html` links) become pages; other entries keep their
/// place in the hierarchy but contribute no page of their own.
pub fn flatten(entries: &[SectionEntry], base_url: &str) -> Vec<PageSeed> {
    let mut seeds = Vec::new();
    walk(entries, None, base_url, &mut seeds);
    seeds
}

fn walk(entries: &[SectionEntry], parent: Option<&str>, base_url: &str, out: &mut Vec<PageSeed>) {
    for (position, entry) in entries.iter().enumerate() {
        match page_slug(&entry.link) {
            Some(slug) => {
                out.push(PageSeed {
                    url: format!("{}{}", base_url, entry.link),
                    slug: slug.clone(),
                    title: entry.title.clone(),
                    parent_slug: parent.map(str::to_string),
                    position: position as i64,
                });
                walk(&entry.children, Some(&slug), base_url, out);
            }
            None => walk(&entry.children, parent, base_url, out),
        }
    }
}

/// `pu_avg.html` → `pu_avg`; absolute URLs and non-page links yield nothing.
pub fn page_slug(link: &str) -> Option<String> {
    DOC_PAGE_RE.captures(link).map(|c| c[1].to_string())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    const SIDEBAR_HTML: &str = r#"
        <html><body>
        <ul class="toc nav nav-site-sidebar">
          <li><a href="pql---process-query-language.html">PQL</a>
            <ul>
              <li><a href="pu_avg.html">PU_AVG</a></li>
              <li><a href="index_order.html">INDEX_ORDER</a></li>
              <li><span>no link here</span></li>
            </ul>
          </li>
          <li><a href="https://example.com/external">External</a>
            <ul><li><a href="getting-started.html">Getting started</a></li></ul>
          </li>
        </ul>
        </body></html>
    "#;

    #[test]
    fn builds_nested_hierarchy_in_sidebar_order() {
        let doc = Html::parse_document(SIDEBAR_HTML);
        let entries = build_hierarchy(&doc);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "PQL");
        assert_eq!(entries[0].link, "pql---process-query-language.html");
        let titles: Vec<_> = entries[0].children.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["PU_AVG", "INDEX_ORDER"]);
    }

    #[test]
    fn no_sidebar_means_empty_hierarchy() {
        let doc = Html::parse_document("<html><body><p>nothing</p></body></html>");
        assert!(build_hierarchy(&doc).is_empty());
    }

    #[test]
    fn flatten_skips_external_links_but_keeps_their_children() {
        let doc = Html::parse_document(SIDEBAR_HTML);
        let entries = build_hierarchy(&doc);
        let seeds = flatten(&entries, "https://docs.example.com/en/");

        let slugs: Vec<_> = seeds.iter().map(|s| s.slug.as_str()).collect();
        assert_eq!(
            slugs,
            vec!["pql---process-query-language", "pu_avg", "index_order", "getting-started"]
        );
        assert_eq!(seeds[1].parent_slug.as_deref(), Some("pql---process-query-language"));
        // The external entry itself is not a page, so its child has no parent.
        assert_eq!(seeds[3].parent_slug, None);
        assert_eq!(
            seeds[0].url,
            "https://docs.example.com/en/pql---process-query-language.html"
        );
    }

    #[test]
    fn page_slug_filters_non_doc_links() {
        assert_eq!(page_slug("pu_avg.html").as_deref(), Some("pu_avg"));
        assert_eq!(page_slug("https://example.com/a.html"), None);
        assert_eq!(page_slug("#fragment"), None);
        assert_eq!(page_slug("../up/level.html"), None);
    }
}
