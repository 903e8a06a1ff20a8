use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Natural key of a chapter within the site
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct ChapterKey {
    pub novel_id: String,
    pub chapter_number: i32,
}

impl std::fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.novel_id, self.chapter_number)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NovelItem {
    pub novel_id: String,
    pub title: String,
    pub url: String,
    /// Chapter count shown on the list page
    pub chapters: Option<i32>,
    pub status: String,
    pub scraped_at: NaiveDateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChapterItem {
    pub novel_id: String,
    pub chapter_number: i32,
    pub chapter_title: String,
    pub chapter_url: String,
    pub chapter_date: String,
    pub scraped_at: NaiveDateTime,
}

impl ChapterItem {
    pub fn key(&self) -> ChapterKey {
        ChapterKey {
            novel_id: self.novel_id.clone(),
            chapter_number: self.chapter_number,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChapterContentItem {
    pub key: ChapterKey,
    pub chapter_text: String,
    pub scraped_at: NaiveDateTime,
}

/// Everything the parser hands to the pipeline
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Item {
    Novel(NovelItem),
    Chapter(ChapterItem),
    ChapterContent(ChapterContentItem),
}

impl Item {
    pub fn kind(&self) -> &'static str {
        match self {
            Item::Novel(_) => "NovelItem",
            Item::Chapter(_) => "ChapterItem",
            Item::ChapterContent(_) => "ChapterContentItem",
        }
    }
}

/// Current UTC time without zone, matching the `TIMESTAMP` columns
pub fn utc_now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Novel {
    pub id: i32,
    pub novel_id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub chapters: Option<i32>,
    pub status: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Chapter {
    pub id: i32,
    pub novel_id: String,
    pub chapter_number: i32,
    pub chapter_title: Option<String>,
    pub chapter_url: Option<String>,
    pub chapter_date: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChapterContent {
    pub id: i32,
    pub chapter_id: i32,
    pub chapter_text: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbCounts {
    pub novels: i64,
    pub chapters: i64,
    pub chapter_contents: i64,
}

/// What an upsert did with an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Parent row missing; nothing written
    Skipped(String),
}
