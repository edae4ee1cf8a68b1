use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Url;

use crate::config::MigrationConfig;
use crate::convert::MarkdownConverter;
use crate::wordpress::{Post, TermIndex};

pub const LAYOUT: &str = "post";
pub const DESCRIPTION_LENGTH: usize = 85;
const DESCRIPTION_SUFFIX: &str = "...";
const PERSONAL_REDIRECT_ROOT: &str = "/dennis";

static MARKDOWN_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\([\\`*_{}\[\]()<>#+\-.!|~])").expect("valid markdown escape regex")
});

/// Removed, in this order, from every value written into the front matter.
const UNSAFE_FRAGMENTS: &[&str] = &[
    "\"",
    "/ ",
    "/",
    ":",
    "-",
    "[spam] ",
    "[Spam] ",
    "[offtopic] ",
    "[VB] ",
    "[winform] ",
    "&quot;",
    "&amp;",
];

pub fn clean_for_front_matter(value: &str) -> String {
    UNSAFE_FRAGMENTS
        .iter()
        .fold(value.to_string(), |value, fragment| value.replace(fragment, ""))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatter {
    pub id: u64,
    pub author: String,
    pub image: Option<String>,
    pub date: String,
    pub title: String,
    pub description: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub redirect_from: Vec<String>,
}

impl FrontMatter {
    pub fn render(&self) -> String {
        let mut lines = vec![
            "---".to_string(),
            format!("layout: {LAYOUT}"),
            format!("id: {}", self.id),
            format!("author: {}", self.author),
        ];
        if let Some(image) = &self.image {
            lines.push(format!("image: '{image}'"));
        }
        lines.push(format!("date: {}", self.date));
        lines.push(format!("title: {}", self.title));
        lines.push(format!("description: {}", self.description));
        if !self.categories.is_empty() {
            lines.push("categories:".to_string());
            for category in &self.categories {
                lines.push(format!("    - {category}"));
            }
        }
        if !self.tags.is_empty() {
            lines.push("tags:".to_string());
            for tag in &self.tags {
                lines.push(format!("  - {tag}"));
            }
        }
        lines.push("redirect_from:".to_string());
        for redirect in &self.redirect_from {
            lines.push(format!("  - \"{redirect}\""));
        }
        lines.push("---".to_string());
        lines.push(String::new());
        lines.join("\n")
    }
}

/// Front matter, a blank line, then the body.
pub fn render_document(front_matter: &FrontMatter, markdown: &str) -> String {
    format!("{}\n{markdown}\n", front_matter.render())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatterSettings {
    pub author: String,
    pub uncategorized_id: u64,
    /// Site path of the old `.aspx` archive, e.g. `/blogs/dennis/archive`.
    pub archive_redirect_root: String,
}

impl FrontMatterSettings {
    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        let prefix = config.legacy_link_prefix();
        let archive = Url::parse(prefix)
            .with_context(|| format!("invalid legacy link prefix: {prefix}"))?;
        Ok(Self {
            author: config.author().to_string(),
            uncategorized_id: config.uncategorized_id(),
            archive_redirect_root: archive.path().trim_end_matches('/').to_string(),
        })
    }
}

pub fn build_front_matter<C: MarkdownConverter>(
    converter: &C,
    post: &Post,
    categories: &TermIndex,
    tags: &TermIndex,
    extracted_tags: &[String],
    header_image: Option<&str>,
    settings: &FrontMatterSettings,
) -> Result<FrontMatter> {
    let title = plain_text(
        &converter
            .convert(&post.title.rendered)
            .with_context(|| format!("post {}: failed to convert title", post.id))?,
    );
    let excerpt = plain_text(
        &converter
            .convert(&post.excerpt.rendered)
            .with_context(|| format!("post {}: failed to convert excerpt", post.id))?,
    );
    let excerpt = excerpt.chars().take(DESCRIPTION_LENGTH).collect::<String>();

    let category_names = post
        .categories
        .iter()
        .filter(|id| **id != settings.uncategorized_id)
        .map(|id| {
            categories
                .name(*id)
                .map(clean_for_front_matter)
                .with_context(|| format!("post {}: unknown category", post.id))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut tag_names = post
        .tags
        .iter()
        .map(|id| {
            tags.name(*id)
                .map(clean_for_front_matter)
                .with_context(|| format!("post {}: unknown tag", post.id))
        })
        .collect::<Result<Vec<_>>>()?;
    tag_names.extend(
        extracted_tags
            .iter()
            .map(|tag| clean_for_front_matter(&strip_markdown_escapes(tag))),
    );

    let day = post.date.format("%Y/%m/%d");
    Ok(FrontMatter {
        id: post.id,
        author: settings.author.clone(),
        image: header_image.map(str::to_string),
        date: clean_for_front_matter(&post.date.format("%Y-%m-%d %I:%M:%S").to_string()),
        title: clean_for_front_matter(&title),
        description: format!("{}{DESCRIPTION_SUFFIX}", clean_for_front_matter(&excerpt)),
        categories: category_names,
        tags: tag_names,
        redirect_from: vec![
            format!("{PERSONAL_REDIRECT_ROOT}/{day}/{}", post.slug),
            format!("{}/{day}/{}.aspx", settings.archive_redirect_root, post.slug),
        ],
    })
}

/// Converter output as one line of text, without Markdown escapes.
fn plain_text(markdown: &str) -> String {
    strip_markdown_escapes(markdown)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn strip_markdown_escapes(text: &str) -> String {
    MARKDOWN_ESCAPE.replace_all(text, "$1").into_owned()
}
