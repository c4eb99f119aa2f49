use std::collections::VecDeque;
use std::sync::LazyLock;

use indexmap::IndexMap;
use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};

use super::example;
use super::ExtractError;

static TR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());

/// Semantic category of a markup element, decided by tag name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Container,
    Title,
    Text,
    Code,
    List,
    Image,
    Table,
    Ignore,
}

/// Map a tag name to its category. Total: unknown tags (video, iframe,
/// script, ...) are `Ignore`, never an error.
pub fn classify(el: ElementRef) -> Category {
    match el.value().name() {
        "div" | "section" => Category::Container,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Category::Title,
        "p" => Category::Text,
        "pre" | "code" => Category::Code,
        "ul" | "ol" => Category::List,
        "img" => Category::Image,
        "table" => Category::Table,
        _ => Category::Ignore,
    }
}

/// One extracted unit of page content. Serializes as `{"type": ..., "data": ...}`,
/// the format downstream consumers parse — variant and field names are fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ContentBlock {
    Title(String),
    Text(String),
    Code(String),
    List(Vec<String>),
    Image {
        description: String,
        source: String,
    },
    Table(Vec<Vec<String>>),
    Example {
        description: String,
        query: Vec<String>,
        input_tables: IndexMap<String, Vec<Vec<String>>>,
        output_table: Vec<Vec<String>>,
    },
}

/// Walk the subtree under `root` and assemble its content blocks in document
/// order. `root` itself is never emitted; container children are flattened in
/// place. PQL example runs are handed to the example decoder, which returns
/// control (and any unconsumed sibling) when the run ends.
pub fn build_content(root: ElementRef) -> Result<Vec<ContentBlock>, ExtractError> {
    let mut queue: VecDeque<ElementRef> = root.children().filter_map(ElementRef::wrap).collect();
    let mut blocks = Vec::new();

    while let Some(el) = queue.pop_front() {
        if example::is_example_start(el) {
            // Let the decoder see the whole run, trigger table included.
            queue.push_front(el);
            blocks.extend(example::decode_example_run(&mut queue)?);
            continue;
        }

        match classify(el) {
            Category::Container => {
                let children: Vec<_> = el.children().filter_map(ElementRef::wrap).collect();
                for child in children.into_iter().rev() {
                    queue.push_front(child);
                }
            }
            Category::Title => blocks.push(ContentBlock::Title(node_text(el))),
            Category::Text => {
                let text = node_text(el);
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text(text));
                }
            }
            Category::Code => blocks.push(ContentBlock::Code(node_text(el))),
            Category::List => blocks.push(ContentBlock::List(extract_list(el))),
            Category::Image => blocks.push(extract_image(el)?),
            Category::Table => blocks.push(ContentBlock::Table(extract_table(el))),
            Category::Ignore => {}
        }
    }

    Ok(blocks)
}

/// Concatenated text of every descendant text node, verbatim.
pub fn node_text(el: ElementRef) -> String {
    el.text().collect()
}

/// One string per immediate `li` child; other children are skipped.
/// Nested sublists are read as flat text, not recursed into.
fn extract_list(el: ElementRef) -> Vec<String> {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| c.value().name() == "li")
        .map(node_text)
        .collect()
}

fn extract_image(el: ElementRef) -> Result<ContentBlock, ExtractError> {
    let attr = |name: &'static str| {
        el.value()
            .attr(name)
            .map(str::to_string)
            .ok_or(ExtractError::MissingAttribute {
                tag: "img",
                attr: name,
            })
    };
    Ok(ContentBlock::Image {
        description: attr("alt")?,
        source: attr("src")?,
    })
}

/// Row-major text matrix: every `tr`, every `td`/`th` child, trimmed with
/// single quotes stripped. Rows are not required to have uniform length.
pub fn extract_table(el: ElementRef) -> Vec<Vec<String>> {
    el.select(&TR)
        .map(|row| {
            row.children()
                .filter_map(ElementRef::wrap)
                .filter(|c| matches!(c.value().name(), "td" | "th"))
                .map(|cell| node_text(cell).trim().replace('\'', ""))
                .collect()
        })
        .collect()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn doc(body: &str) -> Html {
        Html::parse_document(&format!("<html><body>{}</body></html>", body))
    }

    fn first<'a>(html: &'a Html, selector: &str) -> ElementRef<'a> {
        let sel = Selector::parse(selector).unwrap();
        html.select(&sel).next().unwrap()
    }

    #[test]
    fn classify_is_total() {
        let html = doc(
            "<div></div><section></section><h1></h1><h4></h4><p></p><pre></pre>\
             <code></code><ul></ul><ol></ol><img><table></table>\
             <video></video><iframe></iframe><blink></blink>",
        );
        let expected = [
            ("div", Category::Container),
            ("section", Category::Container),
            ("h1", Category::Title),
            ("h4", Category::Title),
            ("p", Category::Text),
            ("pre", Category::Code),
            ("code", Category::Code),
            ("ul", Category::List),
            ("ol", Category::List),
            ("img", Category::Image),
            ("table", Category::Table),
            ("video", Category::Ignore),
            ("iframe", Category::Ignore),
            ("blink", Category::Ignore),
        ];
        for (tag, category) in expected {
            assert_eq!(classify(first(&html, tag)), category, "tag <{}>", tag);
        }
    }

    #[test]
    fn nested_sections_flatten_to_title_and_text() {
        let html = doc("<section><div><h1>title</h1></div><section><div><p>text</p></div></section></section>");
        let blocks = build_content(first(&html, "section")).unwrap();
        assert_eq!(
            blocks,
            vec![
                ContentBlock::Title("title".into()),
                ContentBlock::Text("text".into()),
            ]
        );
    }

    #[test]
    fn container_children_precede_later_siblings() {
        let html = doc("<section><p>a</p><div><p>b</p><p>c</p></div><p>d</p></section>");
        let blocks = build_content(first(&html, "section")).unwrap();
        let texts: Vec<_> = blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text(t) => t.as_str(),
                _ => panic!("expected only text blocks"),
            })
            .collect();
        assert_eq!(texts, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn empty_paragraph_dropped_empty_title_kept() {
        let html = doc("<section><p></p><h2></h2><pre></pre></section>");
        let blocks = build_content(first(&html, "section")).unwrap();
        assert_eq!(
            blocks,
            vec![ContentBlock::Title(String::new()), ContentBlock::Code(String::new())]
        );
    }

    #[test]
    fn generic_table_extraction() {
        let html = doc(
            "<table><thead><tr><th>Name</th><th>Age</th></tr></thead>\
             <tbody><tr><td>Caine</td><td>26</td></tr></tbody></table>",
        );
        let matrix = extract_table(first(&html, "table"));
        assert_eq!(
            matrix,
            vec![vec!["Name".to_string(), "Age".to_string()], vec![
                "Caine".to_string(),
                "26".to_string()
            ]]
        );
    }

    #[test]
    fn table_rows_need_not_be_uniform() {
        let html = doc(
            "<table><tbody><tr><td>a</td><td>b</td><td>c</td></tr>\
             <tr><td>'d'</td></tr></tbody></table>",
        );
        let matrix = extract_table(first(&html, "table"));
        assert_eq!(matrix, vec![vec!["a", "b", "c"], vec!["d"]]);
    }

    #[test]
    fn list_items_flat() {
        let html = doc("<ul><li>one</li><li>two</li><li>three</li></ul>");
        let blocks = build_content(first(&html, "body")).unwrap();
        assert_eq!(
            blocks,
            vec![ContentBlock::List(vec![
                "one".into(),
                "two".into(),
                "three".into()
            ])]
        );
    }

    #[test]
    fn nested_sublist_read_as_flat_text() {
        let html = doc("<ul><li>one</li><li>two<ul><li>deep</li></ul></li></ul>");
        let blocks = build_content(first(&html, "body")).unwrap();
        assert_eq!(
            blocks,
            vec![ContentBlock::List(vec!["one".into(), "twodeep".into()])]
        );
    }

    #[test]
    fn image_requires_alt_and_src() {
        let html = doc(r#"<section><img src="pic.png"></section>"#);
        let err = build_content(first(&html, "section")).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::MissingAttribute { tag: "img", attr: "alt" }
        ));

        let html = doc(r#"<section><img alt="diagram" src="pic.png"></section>"#);
        let blocks = build_content(first(&html, "section")).unwrap();
        assert_eq!(
            blocks,
            vec![ContentBlock::Image {
                description: "diagram".into(),
                source: "pic.png".into(),
            }]
        );
    }

    #[test]
    fn video_is_ignored() {
        let html = doc(r#"<section><p>before</p><video src="v.mp4"></video><p>after</p></section>"#);
        let blocks = build_content(first(&html, "section")).unwrap();
        assert_eq!(
            blocks,
            vec![
                ContentBlock::Text("before".into()),
                ContentBlock::Text("after".into())
            ]
        );
    }

    #[test]
    fn build_content_is_pure() {
        let html = doc("<section><h1>t</h1><div><p>x</p></div></section>");
        let root = first(&html, "section");
        assert_eq!(build_content(root).unwrap(), build_content(root).unwrap());
    }

    #[test]
    fn wire_format_type_data() {
        let json = serde_json::to_value(ContentBlock::Title("title".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "title", "data": "title"}));

        let json = serde_json::to_value(ContentBlock::Image {
            description: "d".into(),
            source: "s.png".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "image", "data": {"description": "d", "source": "s.png"}})
        );
    }
}
