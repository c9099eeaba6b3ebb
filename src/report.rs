//! Aggregated Report
//!
//! Collects the report-tagged outputs of a run into one document, grouped
//! by category and subcategory. Written as JSON or as a self-contained
//! HTML page.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use log::{info, warn};
use serde::Serialize;

use crate::error::{Result, WorkflowError};
use crate::execution::record::{ExecutionRecord, RecordStatus};
use crate::workflow::Dag;

/// Text outputs up to this size are inlined.
const MAX_INLINE_BYTES: u64 = 64 * 1024;

const DEFAULT_CATEGORY: &str = "Results";
const DEFAULT_SUBCATEGORY: &str = "General";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg"];
const TEXT_EXTENSIONS: &[&str] = &["txt", "tsv", "csv", "log", "vcf", "json", "yaml", "md"];

/// How an item is presented.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Image,
    Text,
    File,
}

/// One report-tagged output.
#[derive(Debug, Clone, Serialize)]
pub struct ReportItem {
    pub path: String,
    pub job: String,
    pub labels: BTreeMap<String, String>,
    pub caption: Option<String>,
    pub kind: ItemKind,
    pub size_bytes: u64,
    /// Inlined content of small text outputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// The aggregated report.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated: DateTime<Local>,
    /// category -> subcategory -> items
    pub categories: BTreeMap<String, BTreeMap<String, Vec<ReportItem>>>,
    /// Directory the item paths are relative to
    #[serde(skip)]
    working_dir: PathBuf,
}

impl Report {
    /// Collects report entries of jobs that succeeded or were up to date.
    pub fn collect(dag: &Dag, records: &[ExecutionRecord], working_dir: &Path) -> Result<Self> {
        let mut categories: BTreeMap<String, BTreeMap<String, Vec<ReportItem>>> = BTreeMap::new();

        for record in records {
            if !matches!(record.status, RecordStatus::Succeeded | RecordStatus::UpToDate) {
                continue;
            }
            let Some(job) = dag.job(record.job) else { continue };

            for entry in &job.reports {
                let full = working_dir.join(&entry.path);
                let size_bytes = match fs::metadata(&full) {
                    Ok(meta) => meta.len(),
                    Err(e) => {
                        warn!("Report output '{}' unavailable: {}", entry.path, e);
                        continue;
                    }
                };

                let mut kind = classify(&entry.path);
                let mut content = None;
                if kind == ItemKind::Text && size_bytes <= MAX_INLINE_BYTES {
                    match fs::read(&full).map(String::from_utf8) {
                        Ok(Ok(text)) => content = Some(text),
                        Ok(Err(_)) => {
                            warn!("Report output '{}' is not UTF-8 text, linking instead", entry.path);
                            kind = ItemKind::File;
                        }
                        Err(e) => {
                            warn!("Report output '{}' unreadable: {}", entry.path, e);
                            kind = ItemKind::File;
                        }
                    }
                }

                let category = entry.category.clone().unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
                let subcategory = entry
                    .subcategory
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SUBCATEGORY.to_string());

                categories
                    .entry(category)
                    .or_default()
                    .entry(subcategory)
                    .or_default()
                    .push(ReportItem {
                        path: entry.path.clone(),
                        job: job.label(),
                        labels: entry.labels.clone(),
                        caption: entry.caption.clone(),
                        kind,
                        size_bytes,
                        content,
                    });
            }
        }

        Ok(Self {
            generated: Local::now(),
            categories,
            working_dir: working_dir.to_path_buf(),
        })
    }

    /// Number of items across all categories.
    pub fn len(&self) -> usize {
        self.categories
            .values()
            .flat_map(|subs| subs.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the report; `.json` paths get JSON, anything else HTML.
    pub fn write(&self, path: &Path) -> Result<()> {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let report_dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|e| WorkflowError::io(parent, e))?;
                parent
            }
            None => Path::new("."),
        };

        let content = if is_json {
            serde_json::to_string_pretty(self)?
        } else {
            self.to_html(&relative_dir(report_dir, &self.working_dir))
        };

        fs::write(path, content).map_err(|e| WorkflowError::io(path, e))?;
        info!("Report with {} items written to {}", self.len(), path.display());
        Ok(())
    }

    /// Renders a self-contained HTML page.
    ///
    /// Links to items are prefixed with `link_base`, the working directory
    /// as seen from the page.
    pub fn to_html(&self, link_base: &Path) -> String {
        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str("<title>Pipeline report</title>\n<style>\n");
        html.push_str("body { font-family: sans-serif; margin: 2em; }\n");
        html.push_str("table.labels td { padding: 0 1em 0 0; }\n");
        html.push_str("pre { background: #f4f4f4; padding: 1em; overflow-x: auto; }\n");
        html.push_str("img { max-width: 100%; }\n");
        html.push_str("</style>\n</head>\n<body>\n");
        let _ = writeln!(html, "<h1>Pipeline report</h1>\n<p>Generated {}</p>", self.generated.format("%Y-%m-%d %H:%M:%S"));

        for (category, subcategories) in &self.categories {
            let _ = writeln!(html, "<h2>{}</h2>", escape_html(category));
            for (subcategory, items) in subcategories {
                let _ = writeln!(html, "<h3>{}</h3>", escape_html(subcategory));
                for item in items {
                    render_item(&mut html, item, link_base);
                }
            }
        }

        html.push_str("</body>\n</html>\n");
        html
    }
}

fn render_item(html: &mut String, item: &ReportItem, link_base: &Path) {
    let path = escape_html(&item.path);
    let link = escape_html(&link_base.join(&item.path).to_string_lossy());
    let _ = writeln!(html, "<div class=\"item\">\n<h4>{}</h4>", path);
    let _ = writeln!(html, "<p>Produced by <code>{}</code></p>", escape_html(&item.job));

    if !item.labels.is_empty() {
        html.push_str("<table class=\"labels\">\n");
        for (key, value) in &item.labels {
            let _ = writeln!(html, "<tr><td>{}</td><td>{}</td></tr>", escape_html(key), escape_html(value));
        }
        html.push_str("</table>\n");
    }
    if let Some(caption) = &item.caption {
        let _ = writeln!(html, "<p>{}</p>", escape_html(caption));
    }

    match (&item.kind, &item.content) {
        (ItemKind::Image, _) => {
            let _ = writeln!(html, "<img src=\"{}\" alt=\"{}\">", link, path);
        }
        (ItemKind::Text, Some(content)) => {
            let _ = writeln!(html, "<pre>{}</pre>", escape_html(content));
        }
        _ => {
            let _ = writeln!(html, "<p><a href=\"{}\">{}</a> ({} bytes)</p>", link, path, item.size_bytes);
        }
    }
    html.push_str("</div>\n");
}

/// Path of `target` relative to `from`, both directories.
///
/// Falls back to `target` unchanged when either cannot be resolved.
fn relative_dir(from: &Path, target: &Path) -> PathBuf {
    let (Ok(from), Ok(to)) = (from.canonicalize(), target.canonicalize()) else {
        return target.to_path_buf();
    };
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &to[common..] {
        relative.push(component);
    }
    relative
}

fn classify(path: &str) -> ItemKind {
    let ext = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        ItemKind::Image
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        ItemKind::Text
    } else {
        ItemKind::File
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
