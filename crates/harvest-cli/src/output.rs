use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use harvest_client::Adapter;
use harvest_core::models::{CrawlLogEntry, Page, Record, StoreStats};

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

const CSV_COLUMNS: [&str; 7] = [
    "id",
    "source_id",
    "url",
    "text",
    "author_id",
    "author_name",
    "timestamp",
];

pub fn export_records(records: &[Record], format: ExportFormat, path: &Path) -> Result<()> {
    match format {
        ExportFormat::Json => {
            let json = serde_json::to_string_pretty(records)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        ExportFormat::Csv => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_csv(records, file)?;
        }
    }
    Ok(())
}

/// Flat CSV of the core record fields; attributes are left out.
fn write_csv<W: Write>(records: &[Record], out: W) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(CSV_COLUMNS)?;
    for record in records {
        writer.write_record([
            record.id.as_str(),
            record.source_id.as_str(),
            record.url.as_str(),
            record.text.as_deref().unwrap_or(""),
            record.author_id.as_deref().unwrap_or(""),
            record.author_name.as_deref().unwrap_or(""),
            record.timestamp.to_rfc3339().as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_records<W: Write>(out: &mut W, records: &[Record]) -> std::io::Result<()> {
    for record in records {
        let author = record.author_name.as_deref().unwrap_or("-");
        writeln!(
            out,
            "@{author} {} [{}]",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.source_id
        )?;
        if let Some(text) = &record.text {
            writeln!(out, "  {}", preview(text, PREVIEW_CHARS))?;
        }
        writeln!(out, "  {}", record.url)?;

        let attrs = &record.attributes;
        if attrs.contains_key("like_count") || attrs.contains_key("reply_count") {
            let count = |key: &str| attrs.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
            writeln!(
                out,
                "  ♥ {}  ↩ {}  🔁 {}",
                count("like_count"),
                count("reply_count"),
                count("repost_count")
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_stats<W: Write>(out: &mut W, stats: &StoreStats) -> std::io::Result<()> {
    writeln!(out, "Total items: {}", stats.total)?;
    for (source_id, count) in &stats.by_source {
        writeln!(out, "  [{source_id}] items: {count}")?;
        if let Some(Some(latest)) = stats.latest_by_source.get(source_id) {
            writeln!(
                out,
                "  [{source_id}] latest: {}",
                latest.format("%Y-%m-%d %H:%M:%S")
            )?;
        }
    }
    Ok(())
}

pub fn write_adapters<W: Write>(out: &mut W, adapters: &[Adapter]) -> std::io::Result<()> {
    writeln!(out, "{:<10} {:<24} {:<6} {:<10} DESCRIPTION", "SITE", "NAME", "LOGIN", "MODE")?;
    for adapter in adapters {
        let info = adapter.info();
        writeln!(
            out,
            "{:<10} {:<24} {:<6} {:<10} {}",
            info.site_id,
            info.display_name,
            if info.requires_login { "yes" } else { "no" },
            info.mode.to_string(),
            info.description
        )?;
        for option in adapter.options() {
            let required = if option.required { " (required)" } else { "" };
            let default = option
                .default
                .map(|d| format!(" [default: {d}]"))
                .unwrap_or_default();
            writeln!(out, "    {:<12} {}{required}{default}", option.name, option.help)?;
        }
    }
    Ok(())
}

pub fn write_pages<W: Write>(out: &mut W, pages: &[Page]) -> std::io::Result<()> {
    for page in pages {
        writeln!(
            out,
            "{} [{}] {}",
            page.fetched_at.format("%Y-%m-%d %H:%M"),
            page.source_id,
            page.url
        )?;
        if let Some(title) = &page.title {
            writeln!(out, "  {title}")?;
        }
        writeln!(out, "  {} chars of markdown", page.body.chars().count())?;
    }
    Ok(())
}

pub fn write_history<W: Write>(out: &mut W, entries: &[CrawlLogEntry]) -> std::io::Result<()> {
    for entry in entries {
        let secs = (entry.finished_at - entry.started_at).num_seconds();
        writeln!(
            out,
            "{} [{}] {}: {} found, {} new ({secs}s)",
            entry.started_at.format("%Y-%m-%d %H:%M"),
            entry.source_id,
            entry.target,
            entry.items_found,
            entry.items_new
        )?;
    }
    Ok(())
}

/// First `max` characters of `text` on one line, with an ellipsis if cut.
fn preview(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat,
    }
}
