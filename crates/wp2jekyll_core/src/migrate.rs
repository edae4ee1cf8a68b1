use std::fs;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use serde::Serialize;
use tracing::info;

use crate::config::MigrationConfig;
use crate::convert::MarkdownConverter;
use crate::discussions::{PostSynchronizer, SyncOutcome};
use crate::exceptions::{ExceptionRule, ExceptionTable};
use crate::frontmatter::{FrontMatterSettings, build_front_matter, render_document};
use crate::media::{
    DownloadSummary, MediaFetcher, download, download_planned, header_image, resolve_images,
};
use crate::normalize::Normalizer;
use crate::runtime::{ResolvedPaths, ensure_layout};
use crate::wordpress::{BlogApi, Post, TermIndex};

/// Report returned after a migration run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub pages_fetched: usize,
    pub posts_processed: usize,
    pub files_written: usize,
    /// Every `![..](..)` rewritten, duplicates included.
    pub images_referenced: usize,
    pub images_downloaded: usize,
    pub images_skipped: usize,
    pub discussions_created: usize,
    pub discussions_present: usize,
    pub comments_posted: usize,
    pub post_ids: Vec<u64>,
}

impl MigrationReport {
    fn record_downloads(&mut self, summary: DownloadSummary) {
        self.images_downloaded += summary.downloaded;
        self.images_skipped += summary.skipped;
    }

    fn record_sync(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::AlreadyPresent { .. } => self.discussions_present += 1,
            SyncOutcome::Created {
                comments_posted, ..
            } => {
                self.discussions_created += 1;
                self.comments_posted += comments_posted;
            }
        }
    }
}

/// `YYYY-MM-DD-slug.md`
pub fn post_file_name(post: &Post) -> String {
    format!("{}-{}.md", post.date.format("%Y-%m-%d"), post.slug)
}

/// Walk the configured posts and convert them and/or mirror their comments.
pub fn run<W, F, C, S>(
    blog: &mut W,
    fetcher: &mut F,
    converter: &C,
    synchronizer: Option<&mut S>,
    config: &MigrationConfig,
    paths: &ResolvedPaths,
) -> Result<MigrationReport>
where
    W: BlogApi,
    F: MediaFetcher,
    C: MarkdownConverter,
    S: PostSynchronizer,
{
    if config.run.process_comments && synchronizer.is_none() {
        bail!("comment processing is enabled but no discussion synchronizer is available");
    }

    let exceptions = ExceptionTable::with_entries(&config.exceptions);
    let site_url = config.site_url();
    let site = Url::parse(&site_url).with_context(|| format!("invalid site URL: {site_url}"))?;
    let normalizer = Normalizer::new(
        converter,
        &exceptions,
        config.legacy_link_prefix(),
        &site_url,
    )?;

    let (categories, tags) = if config.run.process_posts {
        ensure_layout(paths)?;
        info!("retrieving categories");
        let categories = TermIndex::from_terms(blog.list_categories()?);
        info!("retrieving tags");
        let tags = TermIndex::from_terms(blog.list_tags()?);
        (categories, tags)
    } else {
        (TermIndex::default(), TermIndex::default())
    };

    let mut migration = Migration {
        blog,
        fetcher,
        converter,
        synchronizer,
        config,
        paths,
        exceptions: &exceptions,
        normalizer,
        site,
        settings: FrontMatterSettings::from_config(config)?,
        categories,
        tags,
        report: MigrationReport::default(),
    };

    if config.run.post_ids.is_empty() {
        migration.run_pages()?;
    } else {
        for id in &config.run.post_ids {
            info!(post_id = *id, "processing single post");
            let post = migration.blog.get_post(*id)?;
            migration.process(&post)?;
        }
    }

    Ok(migration.report)
}

struct Migration<'a, W, F, C, S>
where
    C: MarkdownConverter,
{
    blog: &'a mut W,
    fetcher: &'a mut F,
    converter: &'a C,
    synchronizer: Option<&'a mut S>,
    config: &'a MigrationConfig,
    paths: &'a ResolvedPaths,
    exceptions: &'a ExceptionTable,
    normalizer: Normalizer<'a, C>,
    site: Url,
    settings: FrontMatterSettings,
    categories: TermIndex,
    tags: TermIndex,
    report: MigrationReport,
}

impl<W, F, C, S> Migration<'_, W, F, C, S>
where
    W: BlogApi,
    F: MediaFetcher,
    C: MarkdownConverter,
    S: PostSynchronizer,
{
    fn run_pages(&mut self) -> Result<()> {
        let per_page = self.config.run.per_page;
        let mut page = self.config.run.start_page;
        loop {
            info!(page, "page of blog posts");
            let posts = self.blog.list_posts(page, per_page)?;
            self.report.pages_fetched += 1;
            for post in &posts {
                self.process(post)?;
            }
            if posts.len() < per_page as usize {
                return Ok(());
            }
            page += 1;
        }
    }

    fn process(&mut self, post: &Post) -> Result<()> {
        if self.config.run.process_posts {
            self.process_post(post)?;
        }
        if self.config.run.process_comments {
            self.process_comments(post)?;
        }
        self.report.posts_processed += 1;
        self.report.post_ids.push(post.id);
        Ok(())
    }

    fn process_post(&mut self, post: &Post) -> Result<()> {
        info!(post_id = post.id, title = %post.title.rendered, "converting post");
        let normalized = self.normalizer.normalize(&post.content.rendered, post.id)?;
        let images_dir = self.paths.post_images_dir(&post.slug);

        let header = if post.featured_media != 0 {
            let media = self.blog.get_media(post.featured_media)?;
            let header = header_image(&media.source_url, &post.slug, &self.site)?;
            let mut summary = DownloadSummary::default();
            if self
                .exceptions
                .applies(post.id, ExceptionRule::SkipImageDownloads)
            {
                summary.skipped += 1;
            } else {
                let outcome = download(
                    &mut *self.fetcher,
                    &header.source_url,
                    &images_dir,
                    &header.file_name,
                )
                .with_context(|| format!("post {}: failed to download header image", post.id))?;
                summary.record(outcome);
            }
            self.report.record_downloads(summary);
            Some(header.site_path)
        } else {
            None
        };

        let resolved = resolve_images(&normalized.markdown, &post.slug, &self.site);
        info!(
            post_id = post.id,
            references = resolved.references.len(),
            planned = resolved.plan.len(),
            "resolved images"
        );
        self.report.images_referenced += resolved.references.len();
        let summary = download_planned(
            &mut *self.fetcher,
            &resolved.plan,
            &images_dir,
            post.id,
            self.exceptions,
        )?;
        self.report.record_downloads(summary);

        let front_matter = build_front_matter(
            self.converter,
            post,
            &self.categories,
            &self.tags,
            &normalized.extracted_tags,
            header.as_deref(),
            &self.settings,
        )?;
        let path = self.paths.posts_dir.join(post_file_name(post));
        fs::write(&path, render_document(&front_matter, &resolved.markdown))
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.report.files_written += 1;
        Ok(())
    }

    fn process_comments(&mut self, post: &Post) -> Result<()> {
        let comments = self.blog.list_comments(post.id)?;
        info!(post_id = post.id, comments = comments.len(), "retrieved comments");
        if comments.is_empty() {
            return Ok(());
        }
        let Some(synchronizer) = self.synchronizer.as_deref_mut() else {
            return Ok(());
        };
        let outcome = synchronizer
            .sync_post(post, &comments)
            .with_context(|| format!("post {}: comment synchronization failed", post.id))?;
        self.report.record_sync(&outcome);
        Ok(())
    }
}
