use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{DEFAULT_CONFIG_FILENAME, MigrationConfig};

pub const BLOG_ROOT_ENV: &str = "WP2JEKYLL_BLOG_ROOT";
pub const POSTS_DIRNAME: &str = "_posts";
pub const IMAGES_DIRNAME: &str = "images";
const DEFAULT_BLOG_DIRNAME: &str = "blog";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub blog_root: PathBuf,
    pub posts_dir: PathBuf,
    pub images_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "blog_root={} ({})\nposts_dir={}\nimages_dir={}\nconfig_path={} ({})",
            normalize_for_display(&self.blog_root),
            self.root_source.as_str(),
            normalize_for_display(&self.posts_dir),
            normalize_for_display(&self.images_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }

    /// `<images_dir>/<slug>`, the per-post media directory.
    pub fn post_images_dir(&self, slug: &str) -> PathBuf {
        self.images_dir.join(slug)
    }
}

/// Config file location: `--config` flag, else `wp2jekyll.toml` in the working directory.
pub fn resolve_config_path(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> (PathBuf, ValueSource) {
    match overrides.config.as_deref() {
        Some(path) => (absolutize(path, &context.cwd), ValueSource::Flag),
        None => (
            context.cwd.join(DEFAULT_CONFIG_FILENAME),
            ValueSource::Default,
        ),
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    config: &MigrationConfig,
) -> ResolvedPaths {
    resolve_paths_with_lookup(context, overrides, config, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    config: &MigrationConfig,
    lookup_env: F,
) -> ResolvedPaths
where
    F: Fn(&str) -> Option<String>,
{
    let (config_path, config_source) = resolve_config_path(context, overrides);

    let env_root = lookup_env(BLOG_ROOT_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let (blog_root, root_source) = if let Some(value) = env_root {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else if let Some(path) = config.output.blog_root.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Config)
    } else {
        (context.cwd.join(DEFAULT_BLOG_DIRNAME), ValueSource::Default)
    };

    ResolvedPaths {
        posts_dir: blog_root.join(POSTS_DIRNAME),
        images_dir: blog_root.join(IMAGES_DIRNAME),
        blog_root,
        config_path,
        root_source,
        config_source,
    }
}

/// Create the posts and images directories; returns the ones that were missing.
pub fn ensure_layout(paths: &ResolvedPaths) -> Result<Vec<PathBuf>> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.posts_dir, &paths.images_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }
    Ok(created_dirs)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
