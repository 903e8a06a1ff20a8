use crate::error::Result;
use crate::models::{Item, UpsertOutcome};
use crate::pg_db;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use log::{debug, error, info};

/// Destination for scraped items.
///
/// The crawler calls `process_item` in discovery order, so a novel is always
/// handed over before its chapters and a chapter before its text.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn process_item(&self, item: &Item) -> Result<UpsertOutcome>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes items to PostgreSQL, one transaction per item
pub struct PostgresPipeline {
    pool: Pool,
}

impl PostgresPipeline {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_url(database_url: &str, pool_size: usize) -> Result<Self> {
        Ok(Self::new(pg_db::create_pool(database_url, pool_size)?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl ItemStore for PostgresPipeline {
    async fn open(&self) -> Result<()> {
        pg_db::create_tables(&self.pool).await?;
        info!("Connected to PostgreSQL and ensured tables exist");
        Ok(())
    }

    async fn process_item(&self, item: &Item) -> Result<UpsertOutcome> {
        let result = match item {
            Item::Novel(novel) => pg_db::upsert_novel(&self.pool, novel).await,
            Item::Chapter(chapter) => pg_db::upsert_chapter(&self.pool, chapter).await,
            Item::ChapterContent(content) => pg_db::upsert_chapter_content(&self.pool, content).await,
        };

        match &result {
            Ok(outcome) => debug!("{} stored: {:?}", item.kind(), outcome),
            Err(e) => error!("Error processing {}: {}", item.kind(), e),
        }
        result
    }

    async fn close(&self) -> Result<()> {
        let status = self.pool.status();
        self.pool.close();
        info!(
            "Closed PostgreSQL pool ({} connections, {} idle)",
            status.size, status.available
        );
        Ok(())
    }
}
