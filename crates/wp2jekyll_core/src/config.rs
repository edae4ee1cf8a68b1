use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::exceptions::ExceptionRule;

pub const DEFAULT_CONFIG_FILENAME: &str = "wp2jekyll.toml";
pub const DEFAULT_USER_AGENT: &str = "WeblogConverter/1.0.0";
pub const DEFAULT_API_URL: &str = "https://bloggingabout-linux.azurewebsites.net/wp-json/";
pub const DEFAULT_SITE_URL: &str = "https://bloggingabout.net/";
pub const DEFAULT_AUTHOR: &str = "Dennis van der Stelt";
pub const DEFAULT_LEGACY_LINK_PREFIX: &str =
    "https://bloggingabout-linux.azurewebsites.net/blogs/dennis/archive/";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com/graphql";

pub const OWNER_TOKEN_ENV: &str = "WP2JEKYLL_GITHUB_OWNER_TOKEN";
pub const BOT_TOKEN_ENV: &str = "WP2JEKYLL_GITHUB_BOT_TOKEN";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    #[serde(default)]
    pub blog: BlogSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub github: GithubSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub exceptions: Vec<ExceptionEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BlogSection {
    pub api_url: Option<String>,
    pub site_url: Option<String>,
    pub author: Option<String>,
    pub uncategorized_id: Option<u64>,
    pub legacy_link_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct OutputSection {
    pub blog_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RunSection {
    #[serde(default = "default_start_page")]
    pub start_page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_true")]
    pub process_posts: bool,
    #[serde(default = "default_true")]
    pub process_comments: bool,
    #[serde(default)]
    pub post_ids: Vec<u64>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            start_page: default_start_page(),
            per_page: default_per_page(),
            process_posts: true,
            process_comments: true,
            post_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GithubSection {
    #[serde(default = "default_github_owner")]
    pub owner: String,
    #[serde(default = "default_github_repository")]
    pub repository: String,
    #[serde(default = "default_github_category")]
    pub category: String,
    pub api_url: Option<String>,
    #[serde(default = "default_discussion_delay_ms")]
    pub discussion_delay_ms: u64,
    #[serde(default = "default_comment_delay_ms")]
    pub comment_delay_ms: u64,
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            owner: default_github_owner(),
            repository: default_github_repository(),
            category: default_github_category(),
            api_url: None,
            discussion_delay_ms: default_discussion_delay_ms(),
            comment_delay_ms: default_comment_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub post_id: u64,
    pub rule: ExceptionRule,
}

impl MigrationConfig {
    /// WordPress `wp-json/` root: env WP2JEKYLL_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        env_override("WP2JEKYLL_API_URL")
            .or_else(|| self.blog.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn site_url(&self) -> String {
        let url = self
            .blog
            .site_url
            .clone()
            .unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
        if url.ends_with('/') {
            url
        } else {
            format!("{url}/")
        }
    }

    pub fn author(&self) -> &str {
        self.blog.author.as_deref().unwrap_or(DEFAULT_AUTHOR)
    }

    pub fn uncategorized_id(&self) -> u64 {
        self.blog.uncategorized_id.unwrap_or(1)
    }

    pub fn legacy_link_prefix(&self) -> &str {
        self.blog
            .legacy_link_prefix
            .as_deref()
            .unwrap_or(DEFAULT_LEGACY_LINK_PREFIX)
    }

    pub fn github_api_url(&self) -> String {
        self.github
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string())
    }

    pub fn user_agent(&self) -> String {
        env_override("WP2JEKYLL_USER_AGENT")
            .or_else(|| self.http.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn timeout_ms(&self) -> u64 {
        env_override("WP2JEKYLL_HTTP_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .or(self.http.timeout_ms)
            .unwrap_or(30_000)
    }
}

/// The two GitHub identities used by the discussion synchronizer.
#[derive(Clone)]
pub struct GithubCredentials {
    pub owner_token: String,
    pub bot_token: String,
}

impl std::fmt::Debug for GithubCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubCredentials")
            .field("owner_token", &"<redacted>")
            .field("bot_token", &"<redacted>")
            .finish()
    }
}

impl GithubCredentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| -> Result<String> {
            match lookup(key).map(|value| value.trim().to_string()) {
                Some(value) if !value.is_empty() => Ok(value),
                _ => bail!("{key} is required; both GitHub tokens must be present"),
            }
        };
        Ok(Self {
            owner_token: read(OWNER_TOKEN_ENV)?,
            bot_token: read(BOT_TOKEN_ENV)?,
        })
    }
}

/// Load and parse a MigrationConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrationConfig> {
    if !config_path.exists() {
        return Ok(MigrationConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrationConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    if parsed.run.per_page == 0 {
        bail!(
            "run.per_page must be greater than zero in {}",
            config_path.display()
        );
    }
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn default_start_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_github_owner() -> String {
    "dvdstelt".to_string()
}

fn default_github_repository() -> String {
    "blogcomments".to_string()
}

fn default_github_category() -> String {
    "General".to_string()
}

fn default_discussion_delay_ms() -> u64 {
    3_000
}

fn default_comment_delay_ms() -> u64 {
    2_000
}
