use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::db::FetchRow;

pub const BASE_URL: &str = "https://docs.celonis.com/en/";

const CONCURRENCY: usize = 8;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1000;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fetch stats returned after completion.
pub struct FetchStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

pub fn client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("docs_scraper/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .context("Failed to build HTTP client")
}

/// Fetch one URL's raw HTML, failing on non-success status.
pub async fn fetch_html(client: &Client, url: &str) -> Result<String> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        anyhow::bail!("GET {} returned {}", url, status);
    }
    resp.text().await.context("Failed to read response body")
}

/// Fetch pages concurrently, saving each result to DB as it arrives.
pub async fn fetch_pages_streaming(
    conn: &Connection,
    pages: Vec<(i64, String, String)>,
) -> Result<FetchStats> {
    let client = Arc::new(client()?);
    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let total = pages.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Channel: workers send results, main loop saves to DB
    let (tx, mut rx) = tokio::sync::mpsc::channel::<FetchRow>(CONCURRENCY * 2);

    for (page_id, url, slug) in pages {
        let client = Arc::clone(&client);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let row = fetch_with_retry(&client, page_id, &url, &slug).await;
            let _ = tx.send(row).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut ok = 0usize;
    let mut errors = 0usize;

    // Prepare statements once, reuse for each row
    let mut insert_stmt = conn.prepare(
        "INSERT INTO page_data (page_id, url, slug, html, status, error, latency_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let mut update_stmt =
        conn.prepare("UPDATE pages SET visited = 1, visited_at = datetime('now') WHERE id = ?1")?;

    while let Some(row) = rx.recv().await {
        if row.error.is_some() {
            errors += 1;
        } else {
            ok += 1;
        }

        insert_stmt.execute(rusqlite::params![
            row.page_id,
            row.url,
            row.slug,
            row.html,
            row.status,
            row.error,
            row.latency_ms,
        ])?;
        update_stmt.execute(rusqlite::params![row.page_id])?;
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Fetched {} pages ({} ok, {} errors)", total, ok, errors);

    Ok(FetchStats { total, ok, errors })
}

async fn fetch_with_retry(client: &Client, page_id: i64, url: &str, slug: &str) -> FetchRow {
    for attempt in 0..=MAX_RETRIES {
        let row = fetch_one(client, page_id, url, slug).await;

        let should_retry = matches!(row.status, Some(429) | Some(500..=599));
        if !should_retry || attempt == MAX_RETRIES {
            return row;
        }

        let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
        warn!(
            "Retrying {} (attempt {}/{}), backing off {:.1}s",
            slug,
            attempt + 1,
            MAX_RETRIES,
            backoff.as_secs_f64()
        );
        tokio::time::sleep(backoff).await;
    }

    fetch_one(client, page_id, url, slug).await
}

async fn fetch_one(client: &Client, page_id: i64, url: &str, slug: &str) -> FetchRow {
    let start = Instant::now();
    let response = client.get(url).send().await;
    let latency_ms = Some(start.elapsed().as_millis() as i64);

    match response {
        Ok(resp) => {
            let status = resp.status();
            if !status.is_success() {
                return FetchRow {
                    page_id,
                    url: url.to_string(),
                    slug: slug.to_string(),
                    html: None,
                    status: Some(status.as_u16() as i32),
                    error: Some(format!("HTTP {}", status)),
                    latency_ms,
                };
            }
            match resp.text().await {
                Ok(body) => FetchRow {
                    page_id,
                    url: url.to_string(),
                    slug: slug.to_string(),
                    html: Some(body),
                    status: Some(status.as_u16() as i32),
                    error: None,
                    latency_ms,
                },
                Err(e) => FetchRow {
                    page_id,
                    url: url.to_string(),
                    slug: slug.to_string(),
                    html: None,
                    status: Some(status.as_u16() as i32),
                    error: Some(e.to_string()),
                    latency_ms,
                },
            }
        }
        Err(e) => FetchRow {
            page_id,
            url: url.to_string(),
            slug: slug.to_string(),
            html: None,
            status: None,
            error: Some(e.to_string()),
            latency_ms,
        },
    }
}
