use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::MigrationConfig;

const TERM_PAGE_SIZE: u32 = 100;
const INVALID_PAGE_CODE: &str = "rest_post_invalid_page_number";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct Rendered {
    #[serde(default)]
    pub rendered: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: u64,
    pub slug: String,
    pub date: NaiveDateTime,
    #[serde(default)]
    pub title: Rendered,
    #[serde(default)]
    pub excerpt: Rendered,
    #[serde(default)]
    pub content: Rendered,
    #[serde(default)]
    pub categories: Vec<u64>,
    #[serde(default)]
    pub tags: Vec<u64>,
    /// `0` when the post has no featured image.
    #[serde(default)]
    pub featured_media: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Media {
    pub id: u64,
    pub source_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Term {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub author_name: String,
    pub date: NaiveDateTime,
    #[serde(default)]
    pub content: Rendered,
}

pub trait BlogApi {
    /// One page of posts; empty once `page` runs past the last page.
    fn list_posts(&mut self, page: u32, per_page: u32) -> Result<Vec<Post>>;
    fn get_post(&mut self, id: u64) -> Result<Post>;
    fn get_media(&mut self, id: u64) -> Result<Media>;
    fn list_categories(&mut self) -> Result<Vec<Term>>;
    fn list_tags(&mut self) -> Result<Vec<Term>>;
    fn list_comments(&mut self, post_id: u64) -> Result<Vec<Comment>>;
    fn request_count(&self) -> usize;
}

/// Category or tag names by id.
#[derive(Debug, Clone, Default)]
pub struct TermIndex {
    names: BTreeMap<u64, String>,
}

impl TermIndex {
    pub fn from_terms(terms: Vec<Term>) -> Self {
        Self {
            names: terms.into_iter().map(|term| (term.id, term.name)).collect(),
        }
    }

    pub fn name(&self, id: u64) -> Result<&str> {
        match self.names.get(&id) {
            Some(name) => Ok(name),
            None => bail!("unknown term id {id}"),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct WordPressClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl WordPressClientConfig {
    pub fn from_config(config: &MigrationConfig) -> Self {
        let mut api_url = config.api_url();
        if !api_url.ends_with('/') {
            api_url.push('/');
        }
        Self {
            api_url,
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
        }
    }
}

pub struct WordPressClient {
    client: Client,
    config: WordPressClientConfig,
    request_count: usize,
}

impl WordPressClient {
    pub fn new(config: WordPressClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build WordPress HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    fn request_json(&mut self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = Url::parse(&self.config.api_url)
            .and_then(|base| base.join(path))
            .with_context(|| format!("invalid WordPress API URL: {}{path}", self.config.api_url))?;

        self.request_count += 1;
        debug!(%url, ?params, "WordPress request");
        let response = self
            .client
            .get(url.clone())
            .header("User-Agent", self.config.user_agent.clone())
            .query(params)
            .send()
            .with_context(|| format!("failed to call WordPress API {url}"))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .with_context(|| format!("failed to decode WordPress response from {url}"))?;
        if status == StatusCode::BAD_REQUEST && error_code(&payload) == Some(INVALID_PAGE_CODE) {
            return Ok(Value::Array(Vec::new()));
        }
        if !status.is_success() {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no message");
            bail!("WordPress API request {url} failed with HTTP {status}: {message}");
        }
        Ok(payload)
    }

    fn get<T: DeserializeOwned>(&mut self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let payload = self.request_json(path, params)?;
        serde_json::from_value(payload)
            .with_context(|| format!("failed to decode WordPress {path} response"))
    }

    fn get_all<T: DeserializeOwned>(
        &mut self,
        path: &str,
        extra: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let mut params = vec![
                ("per_page", TERM_PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ];
            params.extend(extra.iter().cloned());
            let batch: Vec<T> = self.get(path, &params)?;
            let fetched = batch.len();
            items.extend(batch);
            if fetched < TERM_PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        Ok(items)
    }
}

impl BlogApi for WordPressClient {
    fn list_posts(&mut self, page: u32, per_page: u32) -> Result<Vec<Post>> {
        self.get(
            "wp/v2/posts",
            &[
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ],
        )
        .with_context(|| format!("failed to list posts (page {page})"))
    }

    fn get_post(&mut self, id: u64) -> Result<Post> {
        self.get(&format!("wp/v2/posts/{id}"), &[])
            .with_context(|| format!("failed to fetch post {id}"))
    }

    fn get_media(&mut self, id: u64) -> Result<Media> {
        self.get(&format!("wp/v2/media/{id}"), &[])
            .with_context(|| format!("failed to fetch media {id}"))
    }

    fn list_categories(&mut self) -> Result<Vec<Term>> {
        self.get_all("wp/v2/categories", &[])
            .context("failed to list categories")
    }

    fn list_tags(&mut self) -> Result<Vec<Term>> {
        self.get_all("wp/v2/tags", &[]).context("failed to list tags")
    }

    fn list_comments(&mut self, post_id: u64) -> Result<Vec<Comment>> {
        self.get_all("wp/v2/comments", &[("post", post_id.to_string())])
            .with_context(|| format!("failed to list comments for post {post_id}"))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn error_code(payload: &Value) -> Option<&str> {
    payload.get("code").and_then(Value::as_str)
}
