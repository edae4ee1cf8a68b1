use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::Url;
use reqwest::blocking::Client;
use tracing::{debug, info, warn};

use crate::exceptions::{ExceptionRule, ExceptionTable};

/// Site path under which every post's media directory is published.
pub const IMAGES_SITE_ROOT: &str = "/images";
/// Hosts that are gone for good; never contacted.
pub const BLACKLISTED_HOSTS: &[&str] = &["sphear.demon.nl"];
const LEGACY_URL_FRAGMENTS: &[&str] = &["-linux.azurewebsites", "/sites/2"];

static TITLE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s*"[^"]*"\s*$"#).expect("valid title regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub alt: String,
    pub source_url: String,
    pub site_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDownload {
    pub source_url: String,
    pub file_name: String,
}

/// Source URL to file name, in first-seen order, one entry per source URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadPlan {
    entries: Vec<PlannedDownload>,
}

impl DownloadPlan {
    fn insert(&mut self, source_url: String, file_name: String) {
        if self.get(&source_url).is_none() {
            self.entries.push(PlannedDownload {
                source_url,
                file_name,
            });
        }
    }

    pub fn get(&self, source_url: &str) -> Option<&PlannedDownload> {
        self.entries
            .iter()
            .find(|entry| entry.source_url == source_url)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedDownload> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedImages {
    pub markdown: String,
    pub references: Vec<ImageReference>,
    pub plan: DownloadPlan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderImage {
    pub source_url: String,
    pub file_name: String,
    pub site_path: String,
}

/// Point every `![alt](url)` at `/images/<slug>/<file>` and plan the downloads.
pub fn resolve_images(markdown: &str, slug: &str, site_url: &Url) -> ResolvedImages {
    let mut plan = DownloadPlan::default();
    let mut references = Vec::new();
    let mut rewritten = String::with_capacity(markdown.len());
    let mut cursor = 0;

    while let Some(found) = markdown[cursor..].find("![") {
        let start = cursor + found;
        rewritten.push_str(&markdown[cursor..start]);
        let Some(image) = parse_image(markdown, start) else {
            rewritten.push_str("![");
            cursor = start + 2;
            continue;
        };
        cursor = image.end;

        let source = match site_url.join(&image.destination) {
            Ok(source) => source,
            Err(error) => {
                warn!(
                    slug,
                    url = %image.destination,
                    %error,
                    "leaving unparseable image reference alone"
                );
                rewritten.push_str(&markdown[start..image.end]);
                continue;
            }
        };
        let segment = last_segment(&source);
        let site_path = site_path(slug, segment);
        debug!(slug, source = %source, %site_path, "image");

        plan.insert(source.to_string(), file_name_from_segment(segment));
        references.push(ImageReference {
            alt: image.alt.to_string(),
            source_url: source.to_string(),
            site_path: site_path.clone(),
        });
        rewritten.push_str(&format!("![{}]({site_path})", image.alt));
    }
    rewritten.push_str(&markdown[cursor..]);

    ResolvedImages {
        markdown: rewritten,
        references,
        plan,
    }
}

struct ImageSyntax<'a> {
    alt: &'a str,
    destination: String,
    /// Byte offset just past the closing `)`.
    end: usize,
}

/// Parse the image starting at the `![` found at `start`.
///
/// Destinations may be bare (balanced parens, backslash escapes) or wrapped in
/// `<...>`. A trailing `"title"` is dropped, inside or outside the brackets.
fn parse_image(text: &str, start: usize) -> Option<ImageSyntax<'_>> {
    let bytes = text.as_bytes();
    let alt_start = start + 2;
    let alt_end = closing_bracket(bytes, alt_start, b'[', b']')?;
    if bytes.get(alt_end + 1) != Some(&b'(') {
        return None;
    }

    let mut inner_start = alt_end + 2;
    while bytes.get(inner_start).is_some_and(|byte| *byte == b' ' || *byte == b'\t') {
        inner_start += 1;
    }
    let (raw, close) = if bytes.get(inner_start) == Some(&b'<') {
        let angle_end = unescaped(bytes, inner_start + 1, b'>')?;
        let close = closing_bracket(bytes, angle_end + 1, b'(', b')')?;
        (&text[inner_start + 1..angle_end], close)
    } else {
        let close = closing_bracket(bytes, inner_start, b'(', b')')?;
        (&text[inner_start..close], close)
    };

    let destination = unescape(TITLE_SUFFIX.replace(raw, "").trim());
    Some(ImageSyntax {
        alt: &text[alt_start..alt_end],
        destination,
        end: close + 1,
    })
}

/// Offset of the `close` that balances an already consumed `open`.
fn closing_bracket(bytes: &[u8], from: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut index = from;
    while let Some(&byte) = bytes.get(index) {
        match byte {
            b'\\' => index += 1,
            b'\n' => return None,
            _ if byte == open => depth += 1,
            _ if byte == close => {
                if depth == 0 {
                    return Some(index);
                }
                depth -= 1;
            }
            _ => {}
        }
        index += 1;
    }
    None
}

fn unescaped(bytes: &[u8], from: usize, target: u8) -> Option<usize> {
    let mut index = from;
    while let Some(&byte) = bytes.get(index) {
        match byte {
            b'\\' => index += 1,
            b'\n' => return None,
            _ if byte == target => return Some(index),
            _ => {}
        }
        index += 1;
    }
    None
}

/// Drop the backslash in front of ASCII punctuation and spaces.
fn unescape(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\'
            && let Some(&next) = chars.peek()
            && (next.is_ascii_punctuation() || next == ' ')
        {
            output.push(next);
            chars.next();
            continue;
        }
        output.push(ch);
    }
    output
}

/// The featured image, stored as `header.<ext>` next to the post's other media.
pub fn header_image(source_url: &str, slug: &str, site_url: &Url) -> Result<HeaderImage> {
    let source = site_url
        .join(source_url)
        .with_context(|| format!("invalid featured image URL: {source_url}"))?;
    let extension = Path::new(&file_name_from_segment(last_segment(&source)))
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()))
        .unwrap_or_default();
    let file_name = format!("header{extension}");
    Ok(HeaderImage {
        source_url: source.to_string(),
        site_path: site_path(slug, &file_name),
        file_name,
    })
}

/// Map old `bloggingabout-linux.azurewebsites` media URLs onto the live host.
pub fn normalize_legacy_source(url: &str) -> String {
    LEGACY_URL_FRAGMENTS
        .iter()
        .fold(url.to_string(), |url, fragment| url.replace(fragment, ""))
}

/// Last path segment, still percent-encoded.
fn last_segment(url: &Url) -> &str {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default()
}

/// The on-disk name: the decoded segment, unless decoding would yield a separator.
fn file_name_from_segment(segment: &str) -> String {
    let decoded = percent_decode_str(segment).decode_utf8_lossy();
    if decoded.contains(['/', '\\']) {
        segment.to_string()
    } else {
        decoded.into_owned()
    }
}

fn site_path(slug: &str, file_name: &str) -> String {
    format!("{IMAGES_SITE_ROOT}/{slug}/{file_name}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Status(u16),
    Unreachable,
}

pub trait MediaFetcher {
    /// HEAD the URL.
    fn probe(&mut self, url: &str) -> Result<Probe>;
    /// GET the body; `None` when the host cannot be reached.
    fn fetch(&mut self, url: &str) -> Result<Option<Vec<u8>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded,
    AlreadyPresent,
    Blacklisted,
    InvalidFileName,
    NotAvailable { status: u16 },
    Unreachable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
}

impl DownloadSummary {
    pub fn record(&mut self, outcome: DownloadOutcome) {
        match outcome {
            DownloadOutcome::Downloaded => self.downloaded += 1,
            _ => self.skipped += 1,
        }
    }
}

pub struct HttpFetcher {
    client: Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build media HTTP client")?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

impl MediaFetcher for HttpFetcher {
    fn probe(&mut self, url: &str) -> Result<Probe> {
        let response = self
            .client
            .head(url)
            .header("User-Agent", self.user_agent.clone())
            .send();
        match response {
            Ok(response) => Ok(Probe::Status(response.status().as_u16())),
            Err(error) if error.is_connect() => Ok(Probe::Unreachable),
            Err(error) => Err(error).with_context(|| format!("failed to probe {url}")),
        }
    }

    fn fetch(&mut self, url: &str) -> Result<Option<Vec<u8>>> {
        let response = match self
            .client
            .get(url)
            .header("User-Agent", self.user_agent.clone())
            .send()
        {
            Ok(response) => response,
            Err(error) if error.is_connect() => return Ok(None),
            Err(error) => return Err(error).with_context(|| format!("failed to fetch {url}")),
        };
        let bytes = response
            .error_for_status()
            .with_context(|| format!("failed to fetch {url}"))?
            .bytes()
            .with_context(|| format!("failed to read body of {url}"))?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Download `source_url` to `<directory>/<file_name>` unless there is a reason not to.
pub fn download<F: MediaFetcher>(
    fetcher: &mut F,
    source_url: &str,
    directory: &Path,
    file_name: &str,
) -> Result<DownloadOutcome> {
    if BLACKLISTED_HOSTS.iter().any(|host| source_url.contains(host)) {
        debug!(source_url, "blacklisted host");
        return Ok(DownloadOutcome::Blacklisted);
    }

    fs::create_dir_all(directory)
        .with_context(|| format!("failed to create {}", directory.display()))?;

    if file_name.is_empty() {
        warn!(source_url, directory = %directory.display(), "not a valid file name");
        return Ok(DownloadOutcome::InvalidFileName);
    }

    let destination = directory.join(file_name);
    if destination.exists() {
        return Ok(DownloadOutcome::AlreadyPresent);
    }

    match fetcher.probe(source_url)? {
        Probe::Unreachable => {
            warn!(source_url, "host unreachable, skipping download");
            return Ok(DownloadOutcome::Unreachable);
        }
        Probe::Status(200) => {}
        Probe::Status(status) => {
            warn!(source_url, status, "could not download");
            return Ok(DownloadOutcome::NotAvailable { status });
        }
    }

    let Some(bytes) = fetcher.fetch(source_url)? else {
        warn!(source_url, "host unreachable, skipping download");
        return Ok(DownloadOutcome::Unreachable);
    };
    fs::write(&destination, bytes).with_context(|| {
        format!(
            "unable to store {source_url} as {}",
            destination.display()
        )
    })?;
    debug!(source_url, destination = %destination.display(), "downloaded");
    Ok(DownloadOutcome::Downloaded)
}

/// Fetch every planned image of a post into `directory`.
pub fn download_planned<F: MediaFetcher>(
    fetcher: &mut F,
    plan: &DownloadPlan,
    directory: &Path,
    post_id: u64,
    exceptions: &ExceptionTable,
) -> Result<DownloadSummary> {
    let mut summary = DownloadSummary::default();
    if exceptions.applies(post_id, ExceptionRule::SkipImageDownloads) {
        info!(
            post_id,
            rule = ExceptionRule::SkipImageDownloads.as_str(),
            images = plan.len(),
            reason = exceptions.reason(post_id, ExceptionRule::SkipImageDownloads),
            "skipping image downloads"
        );
        summary.skipped = plan.len();
        return Ok(summary);
    }

    for entry in plan.iter() {
        let source_url = normalize_legacy_source(&entry.source_url);
        let outcome = download(fetcher, &source_url, directory, &entry.file_name)
            .with_context(|| format!("post {post_id}: failed to download {source_url}"))?;
        summary.record(outcome);
    }
    Ok(summary)
}
