use anyhow::Result;
use rusqlite::Connection;

use crate::hierarchy::PageSeed;

const DB_PATH: &str = "data/docs.sqlite";

pub fn connect() -> Result<Connection> {
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pages (
            id          INTEGER PRIMARY KEY,
            url         TEXT UNIQUE NOT NULL,
            slug        TEXT NOT NULL,
            title       TEXT NOT NULL,
            parent_slug TEXT,
            position    INTEGER NOT NULL DEFAULT 0,
            visited     BOOLEAN NOT NULL DEFAULT 0,
            visited_at  TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_pages_visited ON pages(visited);
        CREATE INDEX IF NOT EXISTS idx_pages_parent ON pages(parent_slug);

        CREATE TABLE IF NOT EXISTS page_data (
            id         INTEGER PRIMARY KEY,
            page_id    INTEGER NOT NULL REFERENCES pages(id),
            url        TEXT NOT NULL,
            slug       TEXT NOT NULL,
            html       TEXT,
            status     INTEGER,
            error      TEXT,
            latency_ms INTEGER,
            scraped_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_page_data_slug ON page_data(slug);

        CREATE TABLE IF NOT EXISTS page_content (
            id            INTEGER PRIMARY KEY,
            page_data_id  INTEGER NOT NULL REFERENCES page_data(id),
            slug          TEXT NOT NULL,
            url           TEXT NOT NULL,
            content       TEXT,
            block_count   INTEGER NOT NULL DEFAULT 0,
            example_count INTEGER NOT NULL DEFAULT 0,
            error         TEXT,
            processed_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_content_slug ON page_content(slug);
        ",
    )?;
    Ok(())
}

// ── Hierarchy / page queue ──

pub fn insert_pages(conn: &Connection, seeds: &[PageSeed]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO pages (url, slug, title, parent_slug, position)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for s in seeds {
            count += stmt.execute(rusqlite::params![
                s.url,
                s.slug,
                s.title,
                s.parent_slug,
                s.position
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_unvisited(
    conn: &Connection,
    limit: Option<usize>,
) -> Result<Vec<(i64, String, String)>> {
    let sql = match limit {
        Some(n) => format!(
            "SELECT id, url, slug FROM pages WHERE visited = 0 ORDER BY id LIMIT {}",
            n
        ),
        None => "SELECT id, url, slug FROM pages WHERE visited = 0 ORDER BY id".to_string(),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// One hierarchy node as stored, for rebuilding the nested export tree.
pub struct PageNode {
    pub slug: String,
    pub title: String,
    pub url: String,
    pub parent_slug: Option<String>,
    pub position: i64,
}

pub fn fetch_hierarchy(conn: &Connection) -> Result<Vec<PageNode>> {
    let mut stmt =
        conn.prepare("SELECT slug, title, url, parent_slug, position FROM pages ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PageNode {
                slug: row.get(0)?,
                title: row.get(1)?,
                url: row.get(2)?,
                parent_slug: row.get(3)?,
                position: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Fetching ──

pub struct FetchRow {
    pub page_id: i64,
    pub url: String,
    pub slug: String,
    pub html: Option<String>,
    pub status: Option<i32>,
    pub error: Option<String>,
    pub latency_ms: Option<i64>,
}

// ── Content extraction ──

pub struct ScrapedPage {
    pub page_data_id: i64,
    pub slug: String,
    pub url: String,
    pub html: String,
}

pub fn fetch_unprocessed(conn: &Connection, limit: Option<usize>) -> Result<Vec<ScrapedPage>> {
    let sql = format!(
        "SELECT pd.id, pd.slug, pd.url, pd.html
         FROM page_data pd
         LEFT JOIN page_content pc ON pc.page_data_id = pd.id
         WHERE pd.html IS NOT NULL AND pc.id IS NULL
         ORDER BY pd.id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ScrapedPage {
                page_data_id: row.get(0)?,
                slug: row.get(1)?,
                url: row.get(2)?,
                html: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Extraction result for one page: the block JSON, or the error that made
/// the caller skip the page.
pub struct ContentRow {
    pub page_data_id: i64,
    pub slug: String,
    pub url: String,
    pub content: Option<String>,
    pub block_count: i64,
    pub example_count: i64,
    pub error: Option<String>,
}

pub fn save_content(conn: &Connection, rows: &[ContentRow]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO page_content
             (page_data_id, slug, url, content, block_count, example_count, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![
                r.page_data_id,
                r.slug,
                r.url,
                r.content,
                r.block_count,
                r.example_count,
                r.error,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Extracted block JSON per slug, for attaching onto the export hierarchy.
pub fn fetch_content_json(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt =
        conn.prepare("SELECT slug, content FROM page_content WHERE content IS NOT NULL")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub visited: usize,
    pub unvisited: usize,
    pub scraped: usize,
    pub fetch_errors: usize,
    pub processed: usize,
    pub extract_errors: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?;
    let visited: usize =
        conn.query_row("SELECT COUNT(*) FROM pages WHERE visited = 1", [], |r| r.get(0))?;
    let scraped: usize = conn.query_row("SELECT COUNT(*) FROM page_data", [], |r| r.get(0))?;
    let fetch_errors: usize = conn.query_row(
        "SELECT COUNT(*) FROM page_data WHERE error IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let processed: usize =
        conn.query_row("SELECT COUNT(*) FROM page_content", [], |r| r.get(0))?;
    let extract_errors: usize = conn.query_row(
        "SELECT COUNT(*) FROM page_content WHERE error IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        total,
        visited,
        unvisited: total - visited,
        scraped,
        fetch_errors,
        processed,
        extract_errors,
    })
}
