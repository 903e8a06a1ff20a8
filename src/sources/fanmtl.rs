use crate::error::{Result, ScraperError};
use crate::models::{utc_now, ChapterItem, NovelItem};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use url::Url;

pub const BASE_URL: &str = "https://www.fanmtl.com";

static NOVEL_ITEM: LazyLock<Selector> = LazyLock::new(|| css("li.novel-item"));
static NOVEL_TITLE: LazyLock<Selector> = LazyLock::new(|| css("h4.novel-title"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| css("a[href]"));
static CHAPTER_COUNT: LazyLock<Selector> = LazyLock::new(|| css("span.chapter"));
static STATUS: LazyLock<Selector> = LazyLock::new(|| css("span.status"));
static NEXT_PAGE: LazyLock<Selector> = LazyLock::new(|| css("a.next[href]"));
static CHAPTER_LIST_ITEM: LazyLock<Selector> = LazyLock::new(|| css("ul.chapter-list li"));
static CHAPTER_TIME: LazyLock<Selector> = LazyLock::new(|| css("span.time"));
static CHAPTER_CONTENT: LazyLock<Selector> = LazyLock::new(|| css("div.chapter-content"));
static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| css("p"));

static NOVEL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/novel/([^./?#]+)\.html").expect("novel id regex"));
static CHAPTER_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)chapter\s+(\d+)").expect("chapter number regex"));
static FIRST_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*").expect("number regex"));

fn css(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector")
}

/// One page of the novel listing
#[derive(Debug, Clone, Default)]
pub struct NovelListPage {
    pub novels: Vec<NovelItem>,
    pub next_page: Option<String>,
}

/// One page of a novel's chapter list
#[derive(Debug, Clone, Default)]
pub struct ChapterListPage {
    pub chapters: Vec<ChapterItem>,
    pub next_page: Option<NextChapterPage>,
    /// Total chapter count when the JSON endpoint reports one
    pub total: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextChapterPage {
    pub url: String,
    pub page: u32,
}

/// `{base}/e/extend/fy.php?page={page}&wjm={novel_id}`
pub fn chapter_list_url(base: &Url, novel_id: &str, page: u32) -> Result<String> {
    let mut url = base.join("/e/extend/fy.php")?;
    url.query_pairs_mut()
        .append_pair("page", &page.to_string())
        .append_pair("wjm", novel_id);
    Ok(url.to_string())
}

pub fn novel_id_from_url(href: &str) -> Option<String> {
    NOVEL_ID_RE
        .captures(href)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// First integer in a text such as "1,234 Chapters"
pub fn parse_count(text: &str) -> Option<i32> {
    FIRST_NUMBER_RE
        .find(text)
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
}

pub fn chapter_number_from_title(title: &str) -> Option<i32> {
    CHAPTER_NUMBER_RE
        .captures(title)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> String {
    scope.select(selector).next().map(element_text).unwrap_or_default()
}

fn absolute(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(|u| u.to_string())
}

/// Parse a novel list page.
///
/// Entries whose link carries no `/novel/{id}.html` are skipped.
pub fn parse_novel_list(html: &str, base: &Url) -> NovelListPage {
    let document = Html::parse_document(html);
    let mut page = NovelListPage::default();

    for item in document.select(&NOVEL_ITEM) {
        let title_el = item.select(&NOVEL_TITLE).next();
        let title = title_el.map(element_text).unwrap_or_default();

        // Link usually sits inside the title, some layouts wrap the whole card
        let href = title_el
            .and_then(|t| t.select(&ANCHOR).next())
            .or_else(|| item.select(&ANCHOR).next())
            .and_then(|a| a.value().attr("href"))
            .unwrap_or("");

        let Some(novel_id) = novel_id_from_url(href) else {
            log::warn!("Could not extract novel_id from URL: {:?}", href);
            continue;
        };
        let Some(url) = absolute(base, href) else {
            log::warn!("Invalid novel URL: {:?}", href);
            continue;
        };

        page.novels.push(NovelItem {
            novel_id,
            title,
            url,
            chapters: parse_count(&first_text(item, &CHAPTER_COUNT)),
            status: first_text(item, &STATUS),
            scraped_at: utc_now(),
        });
    }

    page.next_page = document
        .select(&NEXT_PAGE)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| absolute(base, href));

    page
}

#[derive(Debug, Deserialize)]
struct ChapterListJson {
    #[serde(default)]
    total: Value,
    #[serde(default)]
    data: Vec<ChapterJson>,
}

#[derive(Debug, Deserialize)]
struct ChapterJson {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a chapter list response: JSON from the paging endpoint, or the
/// HTML chapter list when the body is not JSON.
pub fn parse_chapter_list(
    body: &str,
    base: &Url,
    novel_id: &str,
    page: u32,
    per_page: u32,
) -> Result<ChapterListPage> {
    match serde_json::from_str::<ChapterListJson>(body) {
        Ok(json) => parse_chapter_list_json(json, base, novel_id, page, per_page),
        Err(e) => {
            log::warn!(
                "Failed to parse JSON chapter list for {} page {} ({}), trying HTML parsing",
                novel_id,
                page,
                e
            );
            Ok(parse_chapter_list_html(body, base, novel_id, page, per_page))
        }
    }
}

fn position_number(page: u32, per_page: u32, index: usize) -> i32 {
    let offset = page.saturating_sub(1) as i64 * per_page as i64;
    (offset + index as i64 + 1).min(i32::MAX as i64) as i32
}

fn parse_chapter_list_json(
    json: ChapterListJson,
    base: &Url,
    novel_id: &str,
    page: u32,
    per_page: u32,
) -> Result<ChapterListPage> {
    let total = value_as_i64(&json.total).and_then(|t| u32::try_from(t).ok());
    let mut result = ChapterListPage {
        total,
        ..Default::default()
    };

    for (idx, chapter) in json.data.into_iter().enumerate() {
        let chapter_title = chapter.title.unwrap_or_default().trim().to_string();
        let Some(chapter_url) = chapter.url.as_deref().and_then(|u| absolute(base, u)) else {
            log::warn!("Chapter without URL in list for {} page {}", novel_id, page);
            continue;
        };
        let chapter_number = value_as_i64(&chapter.id)
            .and_then(|n| i32::try_from(n).ok())
            .or_else(|| chapter_number_from_title(&chapter_title))
            .unwrap_or_else(|| position_number(page, per_page, idx));

        result.chapters.push(ChapterItem {
            novel_id: novel_id.to_string(),
            chapter_number,
            chapter_title,
            chapter_url,
            chapter_date: chapter.date.unwrap_or_default().trim().to_string(),
            scraped_at: utc_now(),
        });
    }

    let total_pages = match (total, per_page) {
        (Some(t), p) if p > 0 => t.div_ceil(p),
        _ => 0,
    };
    if page < total_pages {
        result.next_page = Some(NextChapterPage {
            url: chapter_list_url(base, novel_id, page + 1)?,
            page: page + 1,
        });
    }

    Ok(result)
}

fn parse_chapter_list_html(
    html: &str,
    base: &Url,
    novel_id: &str,
    page: u32,
    per_page: u32,
) -> ChapterListPage {
    let document = Html::parse_document(html);
    let mut result = ChapterListPage::default();

    for (idx, item) in document.select(&CHAPTER_LIST_ITEM).enumerate() {
        let Some(link) = item.select(&ANCHOR).next() else {
            continue;
        };
        let Some(chapter_url) = link.value().attr("href").and_then(|h| absolute(base, h)) else {
            continue;
        };
        let chapter_title = element_text(link);
        let chapter_number = chapter_number_from_title(&chapter_title)
            .unwrap_or_else(|| position_number(page, per_page, idx));

        result.chapters.push(ChapterItem {
            novel_id: novel_id.to_string(),
            chapter_number,
            chapter_title,
            chapter_url,
            chapter_date: first_text(item, &CHAPTER_TIME),
            scraped_at: utc_now(),
        });
    }

    result.next_page = document
        .select(&NEXT_PAGE)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| absolute(base, href))
        .map(|url| NextChapterPage { url, page: page + 1 });

    result
}

/// Extract the chapter text. Paragraphs are joined with blank lines; pages
/// without paragraphs fall back to every visible text node.
pub fn parse_chapter_content(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let content = document.select(&CHAPTER_CONTENT).next()?;

    let paragraphs: Vec<String> = content
        .select(&PARAGRAPH)
        .map(element_text)
        .filter(|p| !p.is_empty())
        .collect();
    if !paragraphs.is_empty() {
        return Some(paragraphs.join("\n\n"));
    }

    let texts: Vec<String> = content
        .descendants()
        .filter(|node| {
            !node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| matches!(e.name(), "script" | "style")))
                .unwrap_or(false)
        })
        .filter_map(|node| node.value().as_text().map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
        .collect();
    Some(texts.join("\n\n"))
}

/// Fails on anything that does not parse as an absolute URL
pub fn base_url(base: &str) -> Result<Url> {
    let url = Url::parse(base)?;
    if url.cannot_be_a_base() {
        return Err(ScraperError::Parse(format!("not a base URL: {}", base)));
    }
    Ok(url)
}
