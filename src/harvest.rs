//! Harvests images rendered in the current page: enumerates `img` elements
//! from the session's page source, filters out inline/icon noise, and
//! downloads anything the ledger has not seen before.

use crate::ledger::{content_address, Ledger, LedgerStore};
use crate::Result;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

pub const DEFAULT_MIN_DIMENSION: i64 = 50;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";

// Checked against the whole source address, longest hints first.
const IMAGE_EXT_HINTS: &[(&str, &str)] = &[
    (".jpeg", "jpg"),
    (".webp", "webp"),
    (".png", "png"),
    (".gif", "gif"),
    (".jpg", "jpg"),
];
const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub source_url: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub min_dimension: i64,
    pub download_delay: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            min_dimension: DEFAULT_MIN_DIMENSION,
            download_delay: Duration::from_millis(100),
        }
    }
}

pub struct FetchedImage {
    pub status: u16,
    pub body: Vec<u8>,
}

pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage>;
}

/// Blocking fetcher with a bounded per-request timeout.
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new(timeout: Duration) -> Self {
        let mut config = ureq::Agent::config_builder();
        config = config
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .user_agent(DEFAULT_USER_AGENT);
        let agent: ureq::Agent = config.build().into();
        Self { agent }
    }
}

impl ImageFetcher for UreqFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage> {
        let mut response = self.agent.get(url).call()?;
        let status = response.status().as_u16();
        let mut body = Vec::new();
        response.body_mut().as_reader().read_to_end(&mut body)?;
        Ok(FetchedImage { status, body })
    }
}

/// Enumerates rendered `img` elements whose source resolves to a network URL.
/// Inline `data:` and ephemeral `blob:` references never become candidates.
pub fn extract_image_candidates(html: &str, page_url: &str) -> Vec<ImageCandidate> {
    let base_url = match Url::parse(page_url) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let selector_img = Selector::parse("img").expect("img selector");
    let document = Html::parse_document(html);
    let mut out = Vec::new();
    for img in document.select(&selector_img) {
        let Some(raw) = img.value().attr("src") else {
            continue;
        };
        let Some(source_url) = normalize_network_url(raw, &base_url) else {
            continue;
        };
        out.push(ImageCandidate {
            source_url,
            width: parse_dimension_attr(&img, "width"),
            height: parse_dimension_attr(&img, "height"),
        });
    }
    out
}

/// Icons and emoji declare tiny dimensions; candidates without declared
/// dimensions are kept.
pub fn is_icon_sized(candidate: &ImageCandidate, min_dimension: i64) -> bool {
    match (candidate.width, candidate.height) {
        (Some(w), Some(h)) => w < min_dimension || h < min_dimension,
        _ => false,
    }
}

/// Downloads every candidate the filter pipeline and ledger let through.
/// Returns the number of newly downloaded images in this pass.
pub fn harvest_pass<S, F, FLog>(
    page_url: &str,
    page_html: &str,
    output_dir: &Path,
    config: &HarvestConfig,
    ledger: &mut Ledger<S>,
    fetcher: &F,
    mut log_line: FLog,
) -> Result<usize>
where
    S: LedgerStore,
    F: ImageFetcher + ?Sized,
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    std::fs::create_dir_all(output_dir)?;

    let candidates = extract_image_candidates(page_html, page_url);
    log_line(
        "info",
        "harvest_pass_started",
        json!({ "candidates": candidates.len() }),
    )?;

    let mut downloaded = 0_usize;
    for candidate in &candidates {
        if is_icon_sized(candidate, config.min_dimension) {
            continue;
        }

        let digest = content_address(&candidate.source_url);
        if ledger.contains(&digest) {
            continue;
        }

        let fetched = match fetcher.fetch(&candidate.source_url) {
            Ok(fetched) => fetched,
            Err(err) => {
                log_line(
                    "warn",
                    "image_fetch_failed",
                    json!({
                        "url": redact_url_for_log(&candidate.source_url),
                        "error": err.to_string(),
                    }),
                )?;
                continue;
            }
        };
        if !(200..300).contains(&fetched.status) {
            log_line(
                "warn",
                "image_fetch_rejected",
                json!({
                    "url": redact_url_for_log(&candidate.source_url),
                    "status": fetched.status,
                }),
            )?;
            continue;
        }

        let filename = image_file_name(&candidate.source_url, ledger.len());
        let out_path = output_dir.join(&filename);
        std::fs::write(&out_path, &fetched.body)?;
        // Ledger entries exist only for confirmed writes; a crash mid-download
        // must never leave a recorded hash pointing at a missing file.
        ledger.record(&digest)?;
        downloaded += 1;

        log_line(
            "info",
            "image_downloaded",
            json!({ "file": filename, "bytes": fetched.body.len() }),
        )?;

        if !config.download_delay.is_zero() {
            thread::sleep(config.download_delay);
        }
    }

    log_line(
        "info",
        "harvest_pass_finished",
        json!({ "downloaded": downloaded }),
    )?;
    Ok(downloaded)
}

fn normalize_network_url(raw: &str, base_url: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("data:") || lower.starts_with("blob:") || lower.starts_with('#') {
        return None;
    }
    let joined = base_url.join(raw).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    Some(joined.to_string())
}

fn parse_dimension_attr(tag: &ElementRef<'_>, key: &str) -> Option<i64> {
    let raw = tag.value().attr(key)?.trim().trim_end_matches("px");
    raw.parse::<i64>().ok().filter(|v| *v >= 0)
}

/// `img_<epoch-millis>_<index>.<ext>`; the index is the ledger cardinality at
/// naming time, so it keeps growing across passes and names stay unique even
/// when the clock does not advance between passes.
fn image_file_name(url: &str, index: usize) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("img_{timestamp}_{index}.{}", guess_extension(url))
}

fn guess_extension(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();
    for (hint, ext) in IMAGE_EXT_HINTS {
        if lower.contains(hint) {
            return ext;
        }
    }
    DEFAULT_EXTENSION
}

fn redact_url_for_log(value: &str) -> String {
    match Url::parse(value) {
        Ok(uri) => {
            let scheme = uri.scheme();
            let authority = uri.host_str().unwrap_or("unknown-host");
            format!("{scheme}://{authority}/...")
        }
        Err(_) => "[invalid-url]".to_string(),
    }
}
