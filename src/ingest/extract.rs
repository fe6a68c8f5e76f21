// src/ingest/extract.rs
//! Turns a fetched body into article candidates.
//!
//! Extraction is tolerant by contract: malformed or unrecognized markup yields
//! an empty list (and a warning), never an error. The only hard failure is a
//! source whose own URL cannot serve as a base for relative links, see
//! [`base_url`].

use chrono::{DateTime, NaiveDate, Utc};
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use regex::{Captures, Regex};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::HashSet;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use url::Url;

use crate::error::CrawlError;
use crate::ingest::normalize_text;
use crate::ingest::types::{ArticleCandidate, Source, SourceKind};

pub const DEFAULT_ITEM_SELECTOR: &str = "h1 a[href], h2 a[href], h3 a[href]";

/// Max chars kept from a description/summary.
const EXCERPT_CHARS: usize = 600;

/* ----------------------------
RSS 2.0
---------------------------- */

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/* ----------------------------
Atom
---------------------------- */

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

/// The source URL parsed as a base for relative links.
pub fn base_url(source: &Source) -> Result<Url, CrawlError> {
    let url = Url::parse(source.url.trim())
        .map_err(|e| CrawlError::Parse(format!("invalid source url `{}`: {e}", source.url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CrawlError::Parse(format!(
            "unsupported scheme `{}` in source url",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Resolve the effective document kind for `raw`.
pub fn detect_kind(declared: SourceKind, raw: &str) -> SourceKind {
    if declared != SourceKind::Auto {
        return declared;
    }
    let head: String = raw
        .trim_start()
        .chars()
        .take(1024)
        .collect::<String>()
        .to_ascii_lowercase();
    if head.contains("<rss") {
        SourceKind::Rss
    } else if head.contains("<feed") {
        SourceKind::Atom
    } else {
        SourceKind::Html
    }
}

/// Extract candidates from `raw`. Never fails; unusable input gives an empty list.
pub fn extract(
    source: &Source,
    base: &Url,
    raw: &str,
    fetched_at: DateTime<Utc>,
) -> Vec<ArticleCandidate> {
    let t0 = std::time::Instant::now();
    let kind = detect_kind(source.kind, raw);

    let parsed = match kind {
        SourceKind::Rss => parse_rss(raw).map(|items| {
            items
                .into_iter()
                .map(|it| RawItem {
                    title: it.title.unwrap_or_default(),
                    link: it.link.unwrap_or_default(),
                    published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
                    excerpt: it.description.unwrap_or_default(),
                })
                .collect::<Vec<_>>()
        }),
        SourceKind::Atom => parse_atom(raw).map(|entries| {
            entries
                .into_iter()
                .map(|e| RawItem {
                    title: e.title.map(|t| t.value).unwrap_or_default(),
                    link: pick_atom_link(&e.links).unwrap_or_default(),
                    published_at: e
                        .published
                        .as_deref()
                        .or(e.updated.as_deref())
                        .and_then(parse_rfc3339),
                    excerpt: e
                        .summary
                        .or(e.content)
                        .map(|t| t.value)
                        .unwrap_or_default(),
                })
                .collect::<Vec<_>>()
        }),
        SourceKind::Html | SourceKind::Auto => parse_html(source, raw),
    };

    let items = match parsed {
        Ok(items) => items,
        Err(reason) => {
            tracing::warn!(
                target: "crawler",
                source = %source.id,
                kind = ?kind,
                %reason,
                "unparseable source content, no candidates"
            );
            counter!("crawler_unparseable_documents_total").increment(1);
            return Vec::new();
        }
    };

    let out = finish(source, base, items, fetched_at);
    histogram!("crawler_extract_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    out
}

/// Source-format-independent item before URL resolution and normalization.
struct RawItem {
    title: String,
    link: String,
    published_at: Option<DateTime<Utc>>,
    excerpt: String,
}

fn finish(
    source: &Source,
    base: &Url,
    items: Vec<RawItem>,
    fetched_at: DateTime<Utc>,
) -> Vec<ArticleCandidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let title = normalize_text(&it.title);
        if title.is_empty() {
            continue;
        }
        let Some(url) = resolve_link(base, &it.link) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        let mut excerpt = normalize_text(&it.excerpt);
        if excerpt.chars().count() > EXCERPT_CHARS {
            excerpt = excerpt.chars().take(EXCERPT_CHARS).collect();
        }
        out.push(ArticleCandidate {
            source_id: source.id.clone(),
            url,
            title,
            published_at: it.published_at.unwrap_or(fetched_at),
            raw_excerpt: excerpt,
        });
    }
    out
}

/// Absolute http(s) URL for `link`, resolved against `base`. Fragments are dropped.
pub fn resolve_link(base: &Url, link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    let mut url = base.join(link).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

fn parse_rss(raw: &str) -> Result<Vec<RssItem>, String> {
    let xml = scrub_html_entities_for_xml(raw);
    let rss: Rss = from_str(&xml).map_err(|e| format!("rss: {e}"))?;
    Ok(rss.channel.items)
}

fn parse_atom(raw: &str) -> Result<Vec<AtomEntry>, String> {
    let xml = scrub_html_entities_for_xml(raw);
    let feed: AtomFeed = from_str(&xml).map_err(|e| format!("atom: {e}"))?;
    Ok(feed.entries)
}

fn pick_atom_link(links: &[AtomLink]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .and_then(|l| l.href.clone())
}

fn parse_html(source: &Source, raw: &str) -> Result<Vec<RawItem>, String> {
    let selector_src = source
        .item_selector
        .as_deref()
        .unwrap_or(DEFAULT_ITEM_SELECTOR);
    let link_sel =
        Selector::parse(selector_src).map_err(|e| format!("bad item selector: {e:?}"))?;
    let p_sel = Selector::parse("p").map_err(|e| format!("{e:?}"))?;
    let time_sel = Selector::parse("time[datetime]").map_err(|e| format!("{e:?}"))?;

    let doc = Html::parse_document(raw);
    let mut out = Vec::new();
    for a in doc.select(&link_sel) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let title = a.text().collect::<Vec<_>>().join(" ");

        // The enclosing card (article/li) carries the teaser and date, when present.
        let card = a
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| matches!(e.value().name(), "article" | "li"));

        let (excerpt, published_at) = match card {
            Some(card) => {
                let excerpt = card
                    .select(&p_sel)
                    .next()
                    .map(|p| p.text().collect::<Vec<_>>().join(" "))
                    .unwrap_or_default();
                let published_at = card
                    .select(&time_sel)
                    .next()
                    .and_then(|t| t.value().attr("datetime"))
                    .and_then(parse_loose_date);
                (excerpt, published_at)
            }
            None => (String::new(), None),
        };

        out.push(RawItem {
            title,
            link: href.to_string(),
            published_at,
            excerpt,
        });
    }
    Ok(out)
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_loose_date(ts: &str) -> Option<DateTime<Utc>> {
    parse_rfc3339(ts).or_else(|| {
        NaiveDate::parse_from_str(ts.trim(), "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    })
}

/// HTML named entities are not valid XML; feeds still ship them. Known ones
/// become their character, unknown ones are escaped so the parser keeps going.
fn scrub_html_entities_for_xml(s: &str) -> Cow<'_, str> {
    static RE_ENTITY: OnceCell<Regex> = OnceCell::new();
    let re = RE_ENTITY
        .get_or_init(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]*);").expect("entity regex"));
    re.replace_all(s, |caps: &Captures| {
        let name = &caps[1];
        if matches!(name, "amp" | "lt" | "gt" | "quot" | "apos") {
            return caps[0].to_string();
        }
        let decoded = html_escape::decode_html_entities(&caps[0]);
        if decoded == caps[0] {
            format!("&amp;{name};")
        } else {
            decoded.into_owned()
        }
    })
}
