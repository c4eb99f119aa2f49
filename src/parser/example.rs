use std::collections::VecDeque;
use std::sync::LazyLock;

use indexmap::IndexMap;
use scraper::{ElementRef, Selector};

use super::content::{extract_table, node_text, ContentBlock};
use super::ExtractError;

/// Class tokens on the wrapper element around every PQL example table.
const WRAPPER_CLASSES: [&str; 2] = ["informaltable", "table-responsive"];
/// Input-table scanning stops here; foreign-key tables are not extracted.
const FOREIGN_KEYS_MARKER: &str = "Foreign Keys";
/// Label of the output table in the second layout cell.
const RESULT_LABEL: &str = "Result";

static P: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static PRE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("pre").unwrap());
static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static TD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());

/// True when `el` is a table sitting directly inside an example wrapper.
/// Must be checked before generic table classification.
pub fn is_example_start(el: ElementRef) -> bool {
    el.value().name() == "table"
        && el
            .parent()
            .and_then(ElementRef::wrap)
            .is_some_and(is_example_wrapper)
}

fn is_example_wrapper(el: ElementRef) -> bool {
    WRAPPER_CLASSES
        .iter()
        .all(|wanted| el.value().classes().any(|c| c == *wanted))
}

/// The example table opened by a sibling within a run, if any. The walker's
/// trigger arrives as a bare table (its wrapper already expanded); subsequent
/// wrappers arrive unexpanded, so their table child is looked up here.
fn run_table(el: ElementRef) -> Option<ElementRef> {
    if is_example_start(el) {
        return Some(el);
    }
    if is_example_wrapper(el) {
        return el
            .children()
            .filter_map(ElementRef::wrap)
            .find(|c| c.value().name() == "table");
    }
    None
}

fn is_blank_separator(el: ElementRef) -> bool {
    el.value().name() == "p" && node_text(el).trim().is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    AwaitHeader,
    AwaitFirstTable,
    InRun,
    Done,
}

/// Consume a run of example tables from the front of the sibling stream:
/// zero or more blank separators, then one or more example tables, each
/// decoded independently and emitted in encounter order. The first sibling
/// that is neither ends the run and is returned to the stream for the walker.
pub fn decode_example_run(
    queue: &mut VecDeque<ElementRef>,
) -> Result<Vec<ContentBlock>, ExtractError> {
    let mut examples = Vec::new();
    let mut state = RunState::AwaitHeader;

    while state != RunState::Done {
        let Some(el) = queue.pop_front() else { break };

        if is_blank_separator(el) {
            if state == RunState::AwaitHeader {
                state = RunState::AwaitFirstTable;
            }
            continue;
        }
        if let Some(table) = run_table(el) {
            examples.push(decode_example(table)?);
            state = RunState::InRun;
            continue;
        }
        queue.push_front(el);
        state = RunState::Done;
    }

    if examples.is_empty() {
        return Err(malformed("example run contained no example tables"));
    }
    Ok(examples)
}

/// Decode one example table. The body is expected to hold exactly three rows:
/// description, query, input/output. Any shape violation aborts the whole
/// example — a half-decoded query example is worse than none.
pub fn decode_example(table: ElementRef) -> Result<ContentBlock, ExtractError> {
    let rows = body_rows(table);
    if rows.len() < 3 {
        return Err(malformed(format!(
            "expected 3 body rows (description, query, input/output), found {}",
            rows.len()
        )));
    }

    let description = decode_description(rows[0])?;
    let query = decode_query(rows[1])?;
    let (input_tables, output_table) = decode_io_row(rows[2])?;

    Ok(ContentBlock::Example {
        description,
        query,
        input_tables,
        output_table,
    })
}

/// Immediate `tr` children of the table's first `tbody`.
fn body_rows(table: ElementRef) -> Vec<ElementRef> {
    table
        .children()
        .filter_map(ElementRef::wrap)
        .find(|c| c.value().name() == "tbody")
        .map(|tbody| {
            tbody
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| c.value().name() == "tr")
                .collect()
        })
        .unwrap_or_default()
}

/// Row 0: the last paragraph is the description; some variants carry an
/// auxiliary leading paragraph that must be skipped.
fn decode_description(row: ElementRef) -> Result<String, ExtractError> {
    let last = row
        .select(&P)
        .last()
        .ok_or_else(|| malformed("description row has no paragraphs"))?;
    let text = node_text(last).trim().to_string();
    if text.is_empty() {
        return Err(malformed("description row is empty"));
    }
    Ok(text)
}

/// Row 1: one column expression per `pre` fragment, in document order.
fn decode_query(row: ElementRef) -> Result<Vec<String>, ExtractError> {
    let columns: Vec<String> = row
        .select(&PRE)
        .map(|pre| node_text(pre).trim().to_string())
        .collect();
    if columns.is_empty() {
        return Err(malformed("query row has no code fragments"));
    }
    Ok(columns)
}

/// Row 2 holds a nested table used purely for layout: input tables in its
/// first cell, the output table in the cell sibling that follows.
fn decode_io_row(
    row: ElementRef,
) -> Result<(IndexMap<String, Vec<Vec<String>>>, Vec<Vec<String>>), ExtractError> {
    let layout = row
        .select(&TABLE)
        .next()
        .ok_or_else(|| malformed("input/output row has no layout table"))?;
    let input_cell = layout
        .select(&TD)
        .next()
        .ok_or_else(|| malformed("layout table has no cells"))?;
    let output_cell = input_cell
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "td")
        .ok_or_else(|| malformed("layout table has no output cell"))?;

    let input_tables = labelled_tables(input_cell, Some(FOREIGN_KEYS_MARKER))?;
    let mut output = labelled_tables(output_cell, None)?;
    let output_table = output
        .shift_remove(RESULT_LABEL)
        .ok_or_else(|| malformed("output cell has no Result table"))?;

    Ok((input_tables, output_table))
}

/// Walk a layout cell's children in order: a non-empty paragraph names the
/// current table, the `div` that follows holds its data. Scanning stops at
/// `stop_marker` — content past it belongs to the foreign-key feature and is
/// deliberately excluded.
fn labelled_tables(
    cell: ElementRef,
    stop_marker: Option<&str>,
) -> Result<IndexMap<String, Vec<Vec<String>>>, ExtractError> {
    let mut tables = IndexMap::new();
    let mut current: Option<String> = None;

    for node in cell.children() {
        if let Some(text) = node.value().as_text() {
            if stop_marker.is_some_and(|m| text.trim() == m) {
                break;
            }
            continue;
        }
        let Some(child) = ElementRef::wrap(node) else { continue };

        let text = node_text(child);
        let text = text.trim();
        if stop_marker.is_some_and(|m| text == m) {
            break;
        }

        match child.value().name() {
            "p" if !text.is_empty() => current = Some(text.to_string()),
            "div" => {
                let name = current
                    .clone()
                    .ok_or_else(|| malformed("data table without a label"))?;
                let data = child
                    .select(&TABLE)
                    .next()
                    .ok_or_else(|| malformed(format!("no table under label '{}'", name)))?;
                tables.insert(name, extract_table(data));
            }
            _ => {}
        }
    }

    Ok(tables)
}

fn malformed(msg: impl Into<String>) -> ExtractError {
    ExtractError::MalformedExample(msg.into())
}

// ── Tests ──
