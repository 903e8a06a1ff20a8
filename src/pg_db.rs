use crate::error::Result;
use crate::models::{
    Chapter, ChapterContent, ChapterContentItem, ChapterItem, ChapterKey, DbCounts, Novel,
    NovelItem, UpsertOutcome,
};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use log::{debug, info, warn};
use tokio_postgres::{NoTls, Row};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS novels (
    id SERIAL PRIMARY KEY,
    novel_id VARCHAR(255) NOT NULL UNIQUE,
    title VARCHAR(255),
    url VARCHAR(255),
    chapters INTEGER,
    status VARCHAR(50),
    created_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
    updated_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc')
);

CREATE TABLE IF NOT EXISTS chapters (
    id SERIAL PRIMARY KEY,
    novel_id VARCHAR(255) NOT NULL REFERENCES novels (novel_id),
    chapter_number INTEGER NOT NULL,
    chapter_title VARCHAR(255),
    chapter_url VARCHAR(255),
    chapter_date VARCHAR(50),
    created_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
    updated_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
    UNIQUE (novel_id, chapter_number)
);

CREATE TABLE IF NOT EXISTS chapter_contents (
    id SERIAL PRIMARY KEY,
    chapter_id INTEGER NOT NULL UNIQUE REFERENCES chapters (id),
    chapter_text TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
    updated_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc')
);

CREATE INDEX IF NOT EXISTS idx_chapters_novel ON chapters (novel_id);
"#;

/// Creates a PostgreSQL connection pool from a `postgres://` URL
pub fn create_pool(database_url: &str, pool_size: usize) -> Result<Pool> {
    info!("Creating PostgreSQL connection pool...");

    let mut cfg = Config::new();
    cfg.url = Some(database_url.to_string());
    cfg.pool = Some(PoolConfig::new(pool_size.max(1)));
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

    info!("PostgreSQL connection pool created successfully");
    Ok(pool)
}

/// Ensure the schema exists
pub async fn create_tables(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;
    info!("Tables ensured.");
    Ok(())
}

/// Cut a value to the column width, on a char boundary
fn clip(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Width of every `novel_id` column. Reads and writes go through
/// `novel_key` so an over-long id resolves to the same row everywhere.
const NOVEL_ID_WIDTH: usize = 255;

fn novel_key(novel_id: &str) -> &str {
    clip(novel_id, NOVEL_ID_WIDTH)
}

fn outcome(inserted: bool) -> UpsertOutcome {
    if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    }
}

/// Insert a novel or update every field except `created_at`
pub async fn upsert_novel(pool: &Pool, item: &NovelItem) -> Result<UpsertOutcome> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let row = tx
        .query_one(
            "INSERT INTO novels (novel_id, title, url, chapters, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             ON CONFLICT (novel_id) DO UPDATE SET
                title = EXCLUDED.title,
                url = EXCLUDED.url,
                chapters = EXCLUDED.chapters,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
             RETURNING (xmax = 0) AS inserted",
            &[
                &novel_key(&item.novel_id),
                &clip(&item.title, 255),
                &clip(&item.url, 255),
                &item.chapters,
                &clip(&item.status, 50),
                &item.scraped_at,
            ],
        )
        .await?;
    tx.commit().await?;

    let result = outcome(row.get("inserted"));
    debug!("{:?} novel: {} ({})", result, item.title, item.novel_id);
    Ok(result)
}

/// Upsert a chapter keyed on (novel_id, chapter_number). Skipped when the
/// novel is not stored yet.
pub async fn upsert_chapter(pool: &Pool, item: &ChapterItem) -> Result<UpsertOutcome> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let novel = tx
        .query_opt("SELECT 1 FROM novels WHERE novel_id = $1", &[&novel_key(&item.novel_id)])
        .await?;
    if novel.is_none() {
        let reason = format!("Novel with ID {} not found, cannot add chapter", item.novel_id);
        warn!("{}", reason);
        return Ok(UpsertOutcome::Skipped(reason));
    }

    let row = tx
        .query_one(
            "INSERT INTO chapters (novel_id, chapter_number, chapter_title, chapter_url, chapter_date, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             ON CONFLICT (novel_id, chapter_number) DO UPDATE SET
                chapter_title = EXCLUDED.chapter_title,
                chapter_url = EXCLUDED.chapter_url,
                chapter_date = EXCLUDED.chapter_date,
                updated_at = EXCLUDED.updated_at
             RETURNING (xmax = 0) AS inserted",
            &[
                &novel_key(&item.novel_id),
                &item.chapter_number,
                &clip(&item.chapter_title, 255),
                &clip(&item.chapter_url, 255),
                &clip(&item.chapter_date, 50),
                &item.scraped_at,
            ],
        )
        .await?;
    tx.commit().await?;

    let result = outcome(row.get("inserted"));
    debug!("{:?} chapter: {}", result, item.key());
    Ok(result)
}

/// Upsert chapter text for the chapter identified by its key. Skipped when
/// the chapter row is missing.
pub async fn upsert_chapter_content(pool: &Pool, item: &ChapterContentItem) -> Result<UpsertOutcome> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let chapter = tx
        .query_opt(
            "SELECT id FROM chapters WHERE novel_id = $1 AND chapter_number = $2",
            &[&novel_key(&item.key.novel_id), &item.key.chapter_number],
        )
        .await?;
    let Some(chapter) = chapter else {
        let reason = format!(
            "Chapter not found for novel_id={}, chapter_number={}",
            item.key.novel_id, item.key.chapter_number
        );
        warn!("{}", reason);
        return Ok(UpsertOutcome::Skipped(reason));
    };
    let chapter_id: i32 = chapter.get(0);

    let row = tx
        .query_one(
            "INSERT INTO chapter_contents (chapter_id, chapter_text, created_at, updated_at)
             VALUES ($1, $2, $3, $3)
             ON CONFLICT (chapter_id) DO UPDATE SET
                chapter_text = EXCLUDED.chapter_text,
                updated_at = EXCLUDED.updated_at
             RETURNING (xmax = 0) AS inserted",
            &[&chapter_id, &item.chapter_text, &item.scraped_at],
        )
        .await?;
    tx.commit().await?;

    let result = outcome(row.get("inserted"));
    debug!("{:?} chapter content for chapter_id: {}", result, chapter_id);
    Ok(result)
}

fn novel_from_row(row: &Row) -> Novel {
    Novel {
        id: row.get("id"),
        novel_id: row.get("novel_id"),
        title: row.get("title"),
        url: row.get("url"),
        chapters: row.get("chapters"),
        status: row.get("status"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn chapter_from_row(row: &Row) -> Chapter {
    Chapter {
        id: row.get("id"),
        novel_id: row.get("novel_id"),
        chapter_number: row.get("chapter_number"),
        chapter_title: row.get("chapter_title"),
        chapter_url: row.get("chapter_url"),
        chapter_date: row.get("chapter_date"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub async fn get_novel(pool: &Pool, novel_id: &str) -> Result<Option<Novel>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT id, novel_id, title, url, chapters, status, created_at, updated_at
             FROM novels WHERE novel_id = $1",
            &[&novel_key(novel_id)],
        )
        .await?;
    Ok(row.as_ref().map(novel_from_row))
}

/// Chapters of a novel in chapter order
pub async fn get_chapters(pool: &Pool, novel_id: &str) -> Result<Vec<Chapter>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, novel_id, chapter_number, chapter_title, chapter_url, chapter_date, created_at, updated_at
             FROM chapters WHERE novel_id = $1 ORDER BY chapter_number",
            &[&novel_key(novel_id)],
        )
        .await?;
    Ok(rows.iter().map(chapter_from_row).collect())
}

pub async fn get_chapter_content(pool: &Pool, key: &ChapterKey) -> Result<Option<ChapterContent>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT cc.id, cc.chapter_id, cc.chapter_text, cc.created_at, cc.updated_at
             FROM chapter_contents cc
             JOIN chapters c ON c.id = cc.chapter_id
             WHERE c.novel_id = $1 AND c.chapter_number = $2",
            &[&novel_key(&key.novel_id), &key.chapter_number],
        )
        .await?;

    Ok(row.map(|row| ChapterContent {
        id: row.get("id"),
        chapter_id: row.get("chapter_id"),
        chapter_text: row.get("chapter_text"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}

/// Row counts per table
pub async fn counts(pool: &Pool) -> Result<DbCounts> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT
                (SELECT COUNT(*) FROM novels),
                (SELECT COUNT(*) FROM chapters),
                (SELECT COUNT(*) FROM chapter_contents)",
            &[],
        )
        .await?;

    Ok(DbCounts {
        novels: row.get(0),
        chapters: row.get(1),
        chapter_contents: row.get(2),
    })
}
