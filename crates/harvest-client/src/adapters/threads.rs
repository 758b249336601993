use std::sync::Arc;

use chrono::DateTime;
use harvest_core::error::AppError;
use harvest_core::models::Record;
use harvest_core::traits::{CapturePredicate, ParseFn};
use harvest_core::util::AdapterParams;
use serde_json::{Value, json};

use super::{AdapterInfo, AdapterOption, CrawlMode};

pub const SITE_ID: &str = "threads";
const BASE_URL: &str = "https://www.threads.net";

pub const INFO: AdapterInfo = AdapterInfo {
    site_id: SITE_ID,
    display_name: "Threads (threads.net)",
    login_url: Some("https://www.threads.net/login"),
    requires_login: true,
    description: "Scrape posts and replies from Threads users via GraphQL interception",
    mode: CrawlMode::Intercept,
};

pub const OPTIONS: &[AdapterOption] = &[
    AdapterOption {
        name: "--user",
        help: "Threads username (e.g. @someone)",
        required: false,
        default: None,
    },
    AdapterOption {
        name: "--mode",
        help: "posts or replies",
        required: false,
        default: Some("posts"),
    },
    AdapterOption {
        name: "--url",
        help: "Profile or post URL to crawl directly",
        required: false,
        default: None,
    },
];

/// Accept GraphQL responses whose `data` carries a `mediaData` connection.
pub fn capture_predicate() -> CapturePredicate {
    Arc::new(|url: &str, body: &Value| {
        url.contains("graphql")
            && body
                .get("data")
                .and_then(Value::as_object)
                .is_some_and(|data| data.keys().any(|k| k.contains("mediaData")))
    })
}

pub fn parser() -> ParseFn {
    Arc::new(parse_payload)
}

pub fn targets(params: &AdapterParams) -> Result<Vec<String>, AppError> {
    if let Some(url) = params.get("url") {
        return Ok(vec![url.clone()]);
    }
    let Some(user) = params.get("user") else {
        return Err(AppError::ConfigError(
            "threads adapter requires --user or --url".to_string(),
        ));
    };
    let username = user.trim_start_matches('@');
    match params.get("mode").map(String::as_str).unwrap_or("posts") {
        "posts" => Ok(vec![format!("{BASE_URL}/@{username}")]),
        "replies" => Ok(vec![format!("{BASE_URL}/@{username}/replies")]),
        other => Err(AppError::ConfigError(format!(
            "Unknown threads mode '{other}'. Use posts or replies."
        ))),
    }
}

/// Parse one `mediaData` payload.
///
/// A posts feed carries one thread item per edge; a replies feed carries the
/// root post followed by the chain of replies, so the first edge decides
/// which layout applies to the whole payload.
pub fn parse_payload(body: &Value) -> Vec<Record> {
    let edges = match body.pointer("/data/mediaData/edges").and_then(Value::as_array) {
        Some(edges) if !edges.is_empty() => edges,
        _ => return Vec::new(),
    };

    if thread_items(&edges[0]).len() >= 2 {
        edges.iter().flat_map(parse_reply_chain).collect()
    } else {
        edges
            .iter()
            .filter_map(|edge| thread_items(edge).first())
            .filter_map(|item| item.get("post"))
            .filter_map(|post| parse_post(post, &ReplyLink::default()))
            .collect()
    }
}

fn thread_items(edge: &Value) -> &[Value] {
    edge.pointer("/node/thread_items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn parse_reply_chain(edge: &Value) -> Vec<Record> {
    let items = thread_items(edge);
    let Some(root) = items.first().and_then(|item| item.get("post")) else {
        return Vec::new();
    };
    let conversation_id = id_string(root.get("pk"));

    let mut records = Vec::new();
    let mut previous: Option<String> = None;
    for post in items.iter().filter_map(|item| item.get("post")) {
        let link = ReplyLink {
            parent_post_id: previous.clone(),
            conversation_id: Some(conversation_id.clone()),
        };
        if let Some(record) = parse_post(post, &link) {
            previous = Some(record.id.clone());
            records.push(record);
        }
    }
    records
}

#[derive(Default)]
struct ReplyLink {
    parent_post_id: Option<String>,
    conversation_id: Option<String>,
}

fn parse_post(post: &Value, link: &ReplyLink) -> Option<Record> {
    let taken_at = post.get("taken_at").and_then(|v| {
        v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
    })?;
    let timestamp = DateTime::from_timestamp(taken_at, 0)?;

    let user = post.get("user").unwrap_or(&Value::Null);
    let username = str_field(user, "username");
    let code = str_field(post, "code");
    let id = id_string(post.get("pk"));

    let text = post
        .pointer("/caption/text")
        .and_then(Value::as_str)
        .map(str::to_string);
    let media_type = post
        .get("media_type")
        .and_then(Value::as_i64)
        .and_then(media_type_name);

    let info = post.get("text_post_app_info").unwrap_or(&Value::Null);
    let reply_to_username = info
        .pointer("/reply_to_author/username")
        .and_then(Value::as_str);

    let mut record = Record::new(
        id,
        SITE_ID,
        format!("{BASE_URL}/@{username}/post/{code}"),
        timestamp,
    )
    .with_attribute("like_count", json!(count(post, "like_count")))
    .with_attribute("reply_count", json!(count(info, "direct_reply_count")))
    .with_attribute("repost_count", json!(count(info, "repost_count")))
    .with_attribute("media_type", json!(media_type))
    .with_attribute("media_urls", json!(media_urls(post)))
    .with_attribute("is_reply", json!(link.parent_post_id.is_some()))
    .with_attribute("parent_post_id", json!(link.parent_post_id))
    .with_attribute("conversation_id", json!(link.conversation_id))
    .with_attribute("reply_to_username", json!(reply_to_username));

    record.text = text;
    if !username.is_empty() {
        record = record.with_author(id_string(user.get("pk")), username);
    }
    Some(record)
}

/// Image/video candidates; a carousel replaces the single-media URLs.
fn media_urls(post: &Value) -> Vec<String> {
    let first_candidate = |media: &Value| {
        media
            .pointer("/image_versions2/candidates/0/url")
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let urls: Vec<Option<String>> = match post.get("carousel_media").and_then(Value::as_array) {
        Some(carousel) if !carousel.is_empty() => carousel.iter().map(first_candidate).collect(),
        _ => vec![
            first_candidate(post),
            post.pointer("/video_versions/0/url")
                .and_then(Value::as_str)
                .map(str::to_string),
        ],
    };
    urls.into_iter().flatten().filter(|u| !u.is_empty()).collect()
}

fn media_type_name(code: i64) -> Option<&'static str> {
    match code {
        1 => Some("IMAGE"),
        2 => Some("VIDEO"),
        8 => Some("CAROUSEL_ALBUM"),
        19 => Some("TEXT_POST"),
        _ => None,
    }
}

fn count(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Ids arrive as strings or bare numbers depending on the endpoint.
fn id_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
