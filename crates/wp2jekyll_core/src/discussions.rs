//! Mirrors post comments into GitHub Discussions.
//!
//! Every discussion created here carries `<!-- sha1: <hash> -->` in its body,
//! where the hash is taken over the discussion title (`YYYY/MM/DD/slug/`).
//! A post whose hash already appears in any existing discussion is skipped,
//! so re-running never creates a second discussion for the same post.
//! Comment replay is not idempotent: a run that fails halfway through a
//! post's comments will post the earlier ones again when repeated.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::{error, info, warn};

use crate::config::MigrationConfig;
use crate::convert::MarkdownConverter;
use crate::github::{DiscussionApi, DiscussionRecord, NewDiscussion};
use crate::wordpress::{Comment, Post};

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(\w+)").expect("valid mention regex"));

/// `YYYY/MM/DD/slug/`, used both as discussion title and hash input.
pub fn discussion_title(date: NaiveDateTime, slug: &str) -> String {
    format!("{}/{slug}/", date.format("%Y/%m/%d"))
}

/// Lowercase hex SHA-1 of the discussion title.
pub fn discussion_hash(title: &str) -> String {
    let digest = Sha1::digest(title.as_bytes());
    let mut output = String::with_capacity(40);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

pub fn hash_marker(hash: &str) -> String {
    format!("<!-- sha1: {hash} -->")
}

/// Replace `@name` with `At name` so old mentions never ping GitHub users.
pub fn strip_mentions(text: &str) -> String {
    MENTION.replace_all(text, "At $1").into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    Owner,
    Bot,
}

impl Identity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Bot => "bot",
        }
    }
}

/// The blog owner's own comments are posted with the owner token, all others by the bot.
pub fn select_identity(author_name: &str, owner_display_name: &str) -> Identity {
    if author_name == owner_display_name {
        Identity::Owner
    } else {
        Identity::Bot
    }
}

/// Every discussion in the target category, fetched once per run.
#[derive(Debug, Clone, Default)]
pub struct DiscussionCache {
    discussions: Vec<DiscussionRecord>,
}

impl DiscussionCache {
    pub fn from_records(records: Vec<DiscussionRecord>) -> Self {
        let mut seen = HashSet::new();
        let discussions = records
            .into_iter()
            .filter(|record| seen.insert(record.id.clone()))
            .collect();
        Self { discussions }
    }

    pub fn load<A: DiscussionApi>(api: &mut A, category_id: &str) -> Result<Self> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = api
                .list_discussions(category_id, cursor.as_deref())
                .context("error fetching discussions")?;
            let fetched = page.discussions.len();
            records.extend(page.discussions);
            if !page.has_next_page || fetched == 0 {
                break;
            }
            cursor = page.end_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(Self::from_records(records))
    }

    pub fn find_by_hash(&self, hash: &str) -> Option<&DiscussionRecord> {
        self.discussions
            .iter()
            .find(|discussion| discussion.body.contains(hash))
    }

    pub fn len(&self) -> usize {
        self.discussions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discussions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub site_url: String,
    pub owner_display_name: String,
    pub category: String,
    pub discussion_delay: Duration,
    pub comment_delay: Duration,
}

impl SyncSettings {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            site_url: config.site_url(),
            owner_display_name: config.author().to_string(),
            category: config.github.category.clone(),
            discussion_delay: Duration::from_millis(config.github.discussion_delay_ms),
            comment_delay: Duration::from_millis(config.github.comment_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    AlreadyPresent { number: u64 },
    Created { number: u64, comments_posted: usize },
}

/// Per-post comment mirroring, as seen by the migration loop.
pub trait PostSynchronizer {
    fn sync_post(&mut self, post: &Post, comments: &[Comment]) -> Result<SyncOutcome>;
}

pub struct DiscussionSync<'a, O, B, C>
where
    O: DiscussionApi,
    B: DiscussionApi,
    C: MarkdownConverter,
{
    owner: O,
    bot: B,
    converter: &'a C,
    cache: DiscussionCache,
    repository_id: String,
    category_id: String,
    settings: SyncSettings,
}

impl<'a, O, B, C> DiscussionSync<'a, O, B, C>
where
    O: DiscussionApi,
    B: DiscussionApi,
    C: MarkdownConverter,
{
    /// Look up the repository and category, then cache every existing discussion.
    pub fn connect(mut owner: O, bot: B, converter: &'a C, settings: SyncSettings) -> Result<Self> {
        let repository_id = owner.repository_id().context("error fetching repository id")?;
        let categories = owner
            .discussion_categories()
            .context("error fetching discussion categories")?;
        let Some(category) = categories
            .into_iter()
            .find(|category| category.name == settings.category)
        else {
            bail!("discussion category `{}` not found", settings.category);
        };
        let cache = DiscussionCache::load(&mut owner, &category.id)?;
        info!(discussions = cache.len(), "fetched discussions");
        Ok(Self::with_cache(
            owner,
            bot,
            converter,
            cache,
            repository_id,
            category.id,
            settings,
        ))
    }

    pub fn with_cache(
        owner: O,
        bot: B,
        converter: &'a C,
        cache: DiscussionCache,
        repository_id: String,
        category_id: String,
        settings: SyncSettings,
    ) -> Self {
        Self {
            owner,
            bot,
            converter,
            cache,
            repository_id,
            category_id,
            settings,
        }
    }

    pub fn cache(&self) -> &DiscussionCache {
        &self.cache
    }

    /// GraphQL calls made so far by both identities.
    pub fn request_count(&self) -> usize {
        self.owner.request_count() + self.bot.request_count()
    }

    /// Rate-limit status of both identities; failures only warn.
    pub fn log_rate_limits(&mut self) {
        for identity in [Identity::Owner, Identity::Bot] {
            let result = match identity {
                Identity::Owner => self.owner.rate_limit(),
                Identity::Bot => self.bot.rate_limit(),
            };
            match result {
                Ok(rate_limit) => info!(
                    identity = identity.as_str(),
                    remaining = rate_limit.remaining,
                    limit = rate_limit.limit,
                    reset_at = %rate_limit.reset_at.format("%H:%M:%S"),
                    "GitHub rate limit"
                ),
                Err(error) => warn!(identity = identity.as_str(), error = %error, "error fetching rate limit"),
            }
        }
    }

    fn create_discussion(&mut self, post: &Post, title: &str, hash: &str) -> Result<DiscussionRecord> {
        let excerpt = self
            .converter
            .convert(&post.excerpt.rendered)
            .with_context(|| format!("post {}: failed to convert excerpt", post.id))?;
        let body = format!(
            "# {title}\n\n{}\n\n{}{title}\n\n{}",
            excerpt.trim(),
            self.settings.site_url,
            hash_marker(hash)
        );
        let discussion = NewDiscussion {
            repository_id: self.repository_id.clone(),
            category_id: self.category_id.clone(),
            title: title.to_string(),
            body,
        };
        match self.owner.create_discussion(&discussion) {
            Ok(record) => {
                info!(post_id = post.id, number = record.number, "created discussion for post {title}");
                pause(self.settings.discussion_delay);
                Ok(record)
            }
            Err(source) => {
                error!(post_id = post.id, "error creating discussion for post {}", post.title.rendered);
                Err(source)
            }
        }
    }

    fn post_comment(&mut self, discussion: &DiscussionRecord, comment: &Comment) -> Result<()> {
        let identity = select_identity(&comment.author_name, &self.settings.owner_display_name);
        let content = self
            .converter
            .convert(&strip_mentions(&comment.content.rendered))
            .with_context(|| format!("failed to convert comment {}", comment.id))?;
        let body = comment_body(comment, &content);
        let api: &mut dyn DiscussionApi = match identity {
            Identity::Owner => &mut self.owner,
            Identity::Bot => &mut self.bot,
        };
        let created = api
            .add_discussion_comment(&discussion.id, &body)
            .with_context(|| {
                format!(
                    "failed to create comment by {} for {}",
                    comment.author_name, discussion.title
                )
            })?;
        info!(identity = identity.as_str(), url = %created.url, "posted comment by {}", comment.author_name);
        Ok(())
    }
}

impl<O, B, C> PostSynchronizer for DiscussionSync<'_, O, B, C>
where
    O: DiscussionApi,
    B: DiscussionApi,
    C: MarkdownConverter,
{
    fn sync_post(&mut self, post: &Post, comments: &[Comment]) -> Result<SyncOutcome> {
        self.log_rate_limits();

        let title = discussion_title(post.date, &post.slug);
        let hash = discussion_hash(&title);
        if let Some(existing) = self.cache.find_by_hash(&hash) {
            info!(post_id = post.id, number = existing.number, "discussion already present");
            return Ok(SyncOutcome::AlreadyPresent {
                number: existing.number,
            });
        }

        let discussion = self.create_discussion(post, &title, &hash)?;

        let mut ordered = comments.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|comment| comment.date);
        for comment in &ordered {
            pause(self.settings.comment_delay);
            self.post_comment(&discussion, comment)?;
        }

        Ok(SyncOutcome::Created {
            number: discussion.number,
            comments_posted: ordered.len(),
        })
    }
}

fn comment_body(comment: &Comment, converted: &str) -> String {
    format!(
        "<em>{} commented at {}</em>\n\n---\n\n{}",
        comment.author_name,
        comment.date.format("%B %d %Y, %I:%M"),
        converted.trim()
    )
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::github::{CreatedComment, DiscussionCategory, DiscussionPage, RateLimit};
    use crate::wordpress::Rendered;

    const OWNER: &str = "Dennis van der Stelt";

    #[derive(Default)]
    struct MockDiscussionApi {
        pages: VecDeque<DiscussionPage>,
        cursors: Vec<Option<String>>,
        created: Vec<NewDiscussion>,
        comments: Vec<(String, String)>,
        fail_create: bool,
        fail_comment: bool,
        fail_rate_limit: bool,
        requests: usize,
    }

    impl DiscussionApi for MockDiscussionApi {
        fn repository_id(&mut self) -> Result<String> {
            self.requests += 1;
            Ok("R_1".to_string())
        }

        fn discussion_categories(&mut self) -> Result<Vec<DiscussionCategory>> {
            self.requests += 1;
            Ok(vec![
                DiscussionCategory {
                    id: "C_ann".to_string(),
                    name: "Announcements".to_string(),
                },
                DiscussionCategory {
                    id: "C_gen".to_string(),
                    name: "General".to_string(),
                },
            ])
        }

        fn list_discussions(
            &mut self,
            _category_id: &str,
            cursor: Option<&str>,
        ) -> Result<DiscussionPage> {
            self.requests += 1;
            self.cursors.push(cursor.map(str::to_string));
            Ok(self.pages.pop_front().unwrap_or_default())
        }

        fn create_discussion(&mut self, discussion: &NewDiscussion) -> Result<DiscussionRecord> {
            self.requests += 1;
            if self.fail_create {
                bail!("abuse detected");
            }
            self.created.push(discussion.clone());
            Ok(DiscussionRecord {
                id: format!("D_{}", self.created.len()),
                number: 100 + self.created.len() as u64,
                title: discussion.title.clone(),
                body: discussion.body.clone(),
            })
        }

        fn add_discussion_comment(
            &mut self,
            discussion_id: &str,
            body: &str,
        ) -> Result<CreatedComment> {
            self.requests += 1;
            if self.fail_comment {
                bail!("comment rejected");
            }
            self.comments
                .push((discussion_id.to_string(), body.to_string()));
            Ok(CreatedComment {
                id: format!("DC_{}", self.comments.len()),
                url: "https://github.com/x".to_string(),
            })
        }

        fn rate_limit(&mut self) -> Result<RateLimit> {
            self.requests += 1;
            if self.fail_rate_limit {
                bail!("rate limit unavailable");
            }
            Ok(RateLimit {
                limit: 5000,
                remaining: 4999,
                reset_at: Utc
                    .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                    .single()
                    .expect("time"),
            })
        }

        fn request_count(&self) -> usize {
            self.requests
        }
    }

    struct Passthrough;

    impl MarkdownConverter for Passthrough {
        fn convert(&self, html: &str) -> Result<String> {
            Ok(html.to_string())
        }
    }

    fn at(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, 30, 0))
            .expect("date")
    }

    fn post() -> Post {
        Post {
            id: 579017,
            slug: "priority-queues".to_string(),
            date: at(2012, 3, 4, 10),
            title: Rendered {
                rendered: "Priority queues".to_string(),
            },
            excerpt: Rendered {
                rendered: "Short excerpt".to_string(),
            },
            content: Rendered::default(),
            categories: Vec::new(),
            tags: Vec::new(),
            featured_media: 0,
        }
    }

    fn comment(id: u64, author: &str, date: NaiveDateTime, text: &str) -> Comment {
        Comment {
            id,
            author_name: author.to_string(),
            date,
            content: Rendered {
                rendered: text.to_string(),
            },
        }
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            site_url: "https://bloggingabout.net/".to_string(),
            owner_display_name: OWNER.to_string(),
            category: "General".to_string(),
            discussion_delay: Duration::ZERO,
            comment_delay: Duration::ZERO,
        }
    }

    fn sync(
        cache: DiscussionCache,
        owner: MockDiscussionApi,
        bot: MockDiscussionApi,
    ) -> DiscussionSync<'static, MockDiscussionApi, MockDiscussionApi, Passthrough> {
        DiscussionSync::with_cache(
            owner,
            bot,
            &Passthrough,
            cache,
            "R_1".to_string(),
            "C_gen".to_string(),
            settings(),
        )
    }

    fn record(id: &str, body: &str) -> DiscussionRecord {
        DiscussionRecord {
            id: id.to_string(),
            number: 7,
            title: "t".to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn title_and_hash_are_stable() {
        let title = discussion_title(at(2012, 3, 4, 10), "priority-queues");
        assert_eq!(title, "2012/03/04/priority-queues/");
        assert_eq!(discussion_hash("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(discussion_hash(&title), discussion_hash("2012/03/04/priority-queues/"));
        assert_eq!(discussion_hash(&title).len(), 40);
    }

    #[test]
    fn identity_follows_exact_author_name() {
        assert_eq!(select_identity(OWNER, OWNER), Identity::Owner);
        assert_eq!(select_identity("dennis van der stelt", OWNER), Identity::Bot);
        assert_eq!(select_identity("Reader", OWNER), Identity::Bot);
    }

    #[test]
    fn mentions_no_longer_ping() {
        assert_eq!(strip_mentions("Thanks @dennis and @bob_2!"), "Thanks At dennis and At bob_2!");
    }

    #[test]
    fn cache_load_follows_cursors_and_dedupes() {
        let mut api = MockDiscussionApi::default();
        api.pages.push_back(DiscussionPage {
            discussions: vec![record("D_1", "a"), record("D_2", "b")],
            end_cursor: Some("c1".to_string()),
            has_next_page: true,
        });
        api.pages.push_back(DiscussionPage {
            discussions: vec![record("D_2", "b"), record("D_3", "c")],
            end_cursor: Some("c2".to_string()),
            has_next_page: false,
        });
        let cache = DiscussionCache::load(&mut api, "C_gen").expect("load");
        assert_eq!(cache.len(), 3);
        assert_eq!(api.cursors, vec![None, Some("c1".to_string())]);
    }

    #[test]
    fn connect_caches_existing_discussions_and_counts_requests() {
        let mut owner = MockDiscussionApi::default();
        owner.pages.push_back(DiscussionPage {
            discussions: vec![record("D_1", "a"), record("D_2", "b")],
            end_cursor: None,
            has_next_page: false,
        });
        let mut sync = DiscussionSync::connect(
            owner,
            MockDiscussionApi::default(),
            &Passthrough,
            settings(),
        )
        .expect("connect");
        assert_eq!(sync.cache().len(), 2);
        assert_eq!(sync.category_id, "C_gen");
        assert_eq!(sync.request_count(), 3);

        sync.log_rate_limits();
        assert_eq!(sync.request_count(), 5);
    }

    #[test]
    fn connect_requires_the_configured_category() {
        let mut settings = settings();
        settings.category = "Ideas".to_string();
        let error = DiscussionSync::connect(
            MockDiscussionApi::default(),
            MockDiscussionApi::default(),
            &Passthrough,
            settings,
        )
        .err()
        .expect("must fail");
        assert!(error.to_string().contains("Ideas"));
    }

    #[test]
    fn existing_discussion_is_never_recreated() {
        let title = discussion_title(post().date, &post().slug);
        let body = format!("# {title}\n\n{}", hash_marker(&discussion_hash(&title)));
        let cache = DiscussionCache::from_records(vec![record("D_9", &body)]);
        let mut sync = sync(cache, MockDiscussionApi::default(), MockDiscussionApi::default());

        let comments = vec![comment(1, "Reader", at(2012, 3, 5, 9), "hi")];
        for _ in 0..2 {
            let outcome = sync.sync_post(&post(), &comments).expect("sync");
            assert_eq!(outcome, SyncOutcome::AlreadyPresent { number: 7 });
        }
        assert!(sync.owner.created.is_empty());
        assert!(sync.owner.comments.is_empty());
        assert!(sync.bot.comments.is_empty());
    }

    #[test]
    fn created_discussion_body_carries_recoverable_hash() {
        let mut sync = sync(
            DiscussionCache::default(),
            MockDiscussionApi::default(),
            MockDiscussionApi::default(),
        );
        let outcome = sync.sync_post(&post(), &[]).expect("sync");
        assert_eq!(
            outcome,
            SyncOutcome::Created {
                number: 101,
                comments_posted: 0
            }
        );

        let created = &sync.owner.created[0];
        assert_eq!(created.title, "2012/03/04/priority-queues/");
        assert_eq!(created.repository_id, "R_1");
        assert_eq!(created.category_id, "C_gen");
        assert_eq!(
            created.body,
            format!(
                "# 2012/03/04/priority-queues/\n\nShort excerpt\n\nhttps://bloggingabout.net/2012/03/04/priority-queues/\n\n<!-- sha1: {} -->",
                discussion_hash("2012/03/04/priority-queues/")
            )
        );

        let later_run = DiscussionCache::from_records(vec![record("D_1", &created.body)]);
        let hash = discussion_hash(&discussion_title(post().date, &post().slug));
        assert!(later_run.find_by_hash(&hash).is_some());
    }

    #[test]
    fn comments_are_replayed_in_date_order_with_identities() {
        let mut sync = sync(
            DiscussionCache::default(),
            MockDiscussionApi::default(),
            MockDiscussionApi {
                fail_rate_limit: true,
                ..MockDiscussionApi::default()
            },
        );
        let comments = vec![
            comment(2, OWNER, at(2012, 3, 6, 14), "Thanks @reader"),
            comment(1, "Reader", at(2012, 3, 5, 9), "Great post"),
        ];
        let outcome = sync.sync_post(&post(), &comments).expect("sync");
        assert_eq!(
            outcome,
            SyncOutcome::Created {
                number: 101,
                comments_posted: 2
            }
        );

        assert_eq!(sync.bot.comments.len(), 1);
        assert_eq!(
            sync.bot.comments[0],
            (
                "D_1".to_string(),
                "<em>Reader commented at March 05 2012, 09:30</em>\n\n---\n\nGreat post".to_string()
            )
        );
        assert_eq!(sync.owner.comments.len(), 1);
        assert_eq!(
            sync.owner.comments[0].1,
            "<em>Dennis van der Stelt commented at March 06 2012, 02:30</em>\n\n---\n\nThanks At reader"
        );
    }

    #[test]
    fn failures_propagate() {
        let mut failing_create = sync(
            DiscussionCache::default(),
            MockDiscussionApi {
                fail_create: true,
                ..MockDiscussionApi::default()
            },
            MockDiscussionApi::default(),
        );
        let error = failing_create.sync_post(&post(), &[]).expect_err("must fail");
        assert!(error.to_string().contains("abuse detected"));

        let mut failing_comment = sync(
            DiscussionCache::default(),
            MockDiscussionApi::default(),
            MockDiscussionApi {
                fail_comment: true,
                ..MockDiscussionApi::default()
            },
        );
        let comments = vec![comment(1, "Reader", at(2012, 3, 5, 9), "x")];
        let error = failing_comment
            .sync_post(&post(), &comments)
            .expect_err("must fail");
        assert!(error.to_string().contains("failed to create comment by Reader"));
        assert_eq!(failing_comment.owner.created.len(), 1);
    }
}
