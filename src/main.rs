mod db;
mod fetch;
mod hierarchy;
mod parser;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "docs_scraper", about = "Celonis documentation scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the docs index, build the section hierarchy and populate the page queue
    Init,
    /// Fetch unvisited pages
    Scrape {
        /// Max pages to fetch (default: all unvisited)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Extract structured content from fetched pages
    Process {
        /// Max pages to process (default: all unprocessed)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Scrape + process in one pipeline
    Run {
        /// Max pages to scrape+process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Write the nested hierarchy with each page's content as JSON
    Export {
        /// Output file
        #[arg(short, long, default_value = "data/docs_export.json")]
        output: PathBuf,
    },
    /// Show scraping statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let client = fetch::client()?;
            let html = fetch::fetch_html(&client, fetch::BASE_URL).await?;
            let seeds = {
                let doc = scraper::Html::parse_document(&html);
                hierarchy::flatten(&hierarchy::build_hierarchy(&doc), fetch::BASE_URL)
            };
            let inserted = db::insert_pages(&conn, &seeds)?;
            println!(
                "Inserted {} new doc pages ({} found in sidebar)",
                inserted,
                seeds.len()
            );
            Ok(())
        }
        Commands::Scrape { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let pages = db::fetch_unvisited(&conn, limit)?;
            if pages.is_empty() {
                println!("No unvisited pages. Run 'init' first or all pages are fetched.");
                return Ok(());
            }
            println!("Fetching {} pages (streaming to DB)...", pages.len());
            let stats = fetch::fetch_pages_streaming(&conn, pages).await?;
            println!(
                "Done: {} fetched ({} ok, {} errors).",
                stats.total, stats.ok, stats.errors
            );
            Ok(())
        }
        Commands::Process { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let pages = db::fetch_unprocessed(&conn, limit)?;
            if pages.is_empty() {
                println!("No unprocessed pages. Run 'scrape' first.");
                return Ok(());
            }
            println!("Processing {} pages...", pages.len());
            let counts = process_pages(&conn, &pages)?;
            counts.print();
            Ok(())
        }
        Commands::Run { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let pages = db::fetch_unvisited(&conn, limit)?;
            if pages.is_empty() {
                println!("No unvisited pages. Run 'init' first.");
                return Ok(());
            }

            // Phase 1: Fetch (streaming to DB)
            let t_fetch = Instant::now();
            println!("Pipeline: fetching {} pages (streaming to DB)...", pages.len());
            let stats = fetch::fetch_pages_streaming(&conn, pages).await?;
            println!(
                "Fetched {} pages ({} ok, {} errors) in {:.1}s",
                stats.total,
                stats.ok,
                stats.errors,
                t_fetch.elapsed().as_secs_f64()
            );

            // Phase 2: Process
            let t_process = Instant::now();
            let unprocessed = db::fetch_unprocessed(&conn, None)?;
            if unprocessed.is_empty() {
                println!("Nothing to process (all fetched pages had errors).");
                return Ok(());
            }
            println!("Processing {} pages...", unprocessed.len());
            let counts = process_pages(&conn, &unprocessed)?;
            println!("Processed in {:.1}s", t_process.elapsed().as_secs_f64());
            counts.print();
            Ok(())
        }
        Commands::Export { output } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let nodes = db::fetch_hierarchy(&conn)?;
            if nodes.is_empty() {
                println!("No hierarchy stored. Run 'init' first.");
                return Ok(());
            }
            let mut content: HashMap<String, serde_json::Value> = db::fetch_content_json(&conn)?
                .into_iter()
                .filter_map(|(slug, json)| {
                    serde_json::from_str(&json).ok().map(|v| (slug, v))
                })
                .collect();
            let tree = export_tree(&nodes, &mut content, None);
            std::fs::write(&output, serde_json::to_string_pretty(&tree)?)?;
            println!(
                "Exported {} top-level sections to {}",
                tree.len(),
                output.display()
            );
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Total:          {}", s.total);
            println!("Visited:        {}", s.visited);
            println!("Unvisited:      {}", s.unvisited);
            println!("Fetched:        {}", s.scraped);
            println!("Fetch errors:   {}", s.fetch_errors);
            println!("Processed:      {}", s.processed);
            println!("Extract errors: {}", s.extract_errors);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

struct ProcessCounts {
    pages: usize,
    blocks: usize,
    examples: usize,
    errors: usize,
}

impl ProcessCounts {
    fn print(&self) {
        println!(
            "Extracted {} pages: {} blocks, {} query examples ({} pages failed).",
            self.pages, self.blocks, self.examples, self.errors,
        );
    }
}

fn process_pages(
    conn: &rusqlite::Connection,
    pages: &[db::ScrapedPage],
) -> anyhow::Result<ProcessCounts> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;
    use tracing::warn;

    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut counts = ProcessCounts {
        pages: 0,
        blocks: 0,
        examples: 0,
        errors: 0,
    };

    for chunk in pages.chunks(200) {
        let rows: Vec<_> = chunk.par_iter().map(parser::process_page).collect();

        for row in &rows {
            match &row.error {
                Some(e) => {
                    warn!("Skipping {}: {}", row.slug, e);
                    counts.errors += 1;
                }
                None => counts.pages += 1,
            }
            counts.blocks += row.block_count as usize;
            counts.examples += row.example_count as usize;
        }

        db::save_content(conn, &rows)?;
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    Ok(counts)
}

#[derive(serde::Serialize)]
struct ExportNode {
    title: String,
    link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    children: Vec<ExportNode>,
}

/// Reassemble the stored hierarchy, attaching each page's extracted content.
fn export_tree(
    nodes: &[db::PageNode],
    content: &mut HashMap<String, serde_json::Value>,
    parent: Option<&str>,
) -> Vec<ExportNode> {
    let mut siblings: Vec<&db::PageNode> = nodes
        .iter()
        .filter(|n| n.parent_slug.as_deref() == parent)
        .collect();
    siblings.sort_by_key(|n| n.position);

    siblings
        .into_iter()
        .map(|n| ExportNode {
            title: n.title.clone(),
            link: n.url.clone(),
            content: content.remove(&n.slug),
            children: export_tree(nodes, content, Some(&n.slug)),
        })
        .collect()
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
