use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wp2jekyll_core::config::{GithubCredentials, MigrationConfig, load_config};
use wp2jekyll_core::convert::HtmdConverter;
use wp2jekyll_core::discussions::{DiscussionSync, SyncSettings};
use wp2jekyll_core::github::{GitHubClient, GitHubClientConfig};
use wp2jekyll_core::media::HttpFetcher;
use wp2jekyll_core::migrate::{self, MigrationReport};
use wp2jekyll_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, normalize_for_display, resolve_config_path,
    resolve_paths,
};
use wp2jekyll_core::wordpress::{BlogApi, WordPressClient, WordPressClientConfig};

#[derive(Debug, Parser)]
#[command(
    name = "wp2jekyll",
    version,
    about = "Convert a WordPress blog into Jekyll posts and mirror its comments to GitHub Discussions"
)]
struct Cli {
    #[arg(long, value_name = "PATH", help = "Config file (default: ./wp2jekyll.toml)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let overrides = PathOverrides {
        config: cli.config.clone(),
    };
    let (config, paths) = resolve_runtime(&overrides)?;
    if cli.diagnostics {
        println!("{}", paths.diagnostics());
    }

    let credentials = GithubCredentials::from_env()?;
    let converter = HtmdConverter::new();
    let mut blog = WordPressClient::new(WordPressClientConfig::from_config(&config))?;
    let mut fetcher = HttpFetcher::new(&config.user_agent(), config.timeout_ms())?;

    let mut synchronizer = if config.run.process_comments {
        let github = GitHubClientConfig::from_config(&config);
        let owner = GitHubClient::new(github.clone(), credentials.owner_token)?;
        let bot = GitHubClient::new(github, credentials.bot_token)?;
        let sync = DiscussionSync::connect(owner, bot, &converter, SyncSettings::from_config(&config))
            .context("failed to prepare discussion synchronization")?;
        Some(sync)
    } else {
        None
    };

    let report = migrate::run(
        &mut blog,
        &mut fetcher,
        &converter,
        synchronizer.as_mut(),
        &config,
        &paths,
    )?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize run report")?
        );
    } else {
        let github = synchronizer
            .as_ref()
            .map(|sync| (sync.cache().len(), sync.request_count()));
        print_report(&paths, &report, blog.request_count(), github);
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_runtime(overrides: &PathOverrides) -> Result<(MigrationConfig, ResolvedPaths)> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let (config_path, _) = resolve_config_path(&context, overrides);
    let config = load_config(&config_path)?;

    let initial = resolve_paths(&context, overrides, &config);
    let blog_env = initial.blog_root.join(".env");
    if blog_env.exists() {
        let _ = dotenvy::from_path_override(&blog_env);
    }

    let paths = resolve_paths(&context, overrides, &config);
    Ok((config, paths))
}

fn print_report(
    paths: &ResolvedPaths,
    report: &MigrationReport,
    wordpress_requests: usize,
    github: Option<(usize, usize)>,
) {
    println!("blog_root: {}", normalize_for_display(&paths.blog_root));
    println!("posts_dir: {}", normalize_for_display(&paths.posts_dir));
    println!("images_dir: {}", normalize_for_display(&paths.images_dir));
    println!("pages_fetched: {}", report.pages_fetched);
    println!("posts_processed: {}", report.posts_processed);
    println!("files_written: {}", report.files_written);
    println!("images_referenced: {}", report.images_referenced);
    println!("images_downloaded: {}", report.images_downloaded);
    println!("images_skipped: {}", report.images_skipped);
    println!("discussions_created: {}", report.discussions_created);
    println!("discussions_present: {}", report.discussions_present);
    println!("comments_posted: {}", report.comments_posted);
    println!("wordpress_requests: {wordpress_requests}");
    match github {
        Some((cached, requests)) => {
            println!("discussions_cached: {cached}");
            println!("github_requests: {requests}");
        }
        None => println!("github_requests: <comments disabled>"),
    }
    if report.post_ids.is_empty() {
        println!("post_ids: <none>");
    } else {
        let ids = report
            .post_ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!("post_ids: {ids}");
    }
}

