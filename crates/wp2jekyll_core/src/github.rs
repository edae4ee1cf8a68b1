use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::MigrationConfig;

pub const DISCUSSION_PAGE_SIZE: u32 = 100;

const REPOSITORY_ID_QUERY: &str = r#"
query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) { id }
}"#;

const DISCUSSION_CATEGORIES_QUERY: &str = r#"
query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    discussionCategories(first: 10) { nodes { id name } }
  }
}"#;

const DISCUSSIONS_QUERY: &str = r#"
query($owner: String!, $name: String!, $categoryId: ID!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    discussions(first: $first, after: $after, categoryId: $categoryId, orderBy: {field: CREATED_AT, direction: ASC}) {
      pageInfo { hasNextPage endCursor }
      nodes { id number title body }
    }
  }
}"#;

const CREATE_DISCUSSION_MUTATION: &str = r#"
mutation($input: CreateDiscussionInput!) {
  createDiscussion(input: $input) { discussion { id number title body } }
}"#;

const ADD_COMMENT_MUTATION: &str = r#"
mutation($input: AddDiscussionCommentInput!) {
  addDiscussionComment(input: $input) { comment { id url } }
}"#;

const RATE_LIMIT_QUERY: &str = "query { rateLimit { limit remaining resetAt } }";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DiscussionRecord {
    pub id: String,
    pub number: u64,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DiscussionCategory {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscussionPage {
    pub discussions: Vec<DiscussionRecord>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDiscussion {
    pub repository_id: String,
    pub category_id: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CreatedComment {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

pub trait DiscussionApi {
    fn repository_id(&mut self) -> Result<String>;
    fn discussion_categories(&mut self) -> Result<Vec<DiscussionCategory>>;
    fn list_discussions(
        &mut self,
        category_id: &str,
        cursor: Option<&str>,
    ) -> Result<DiscussionPage>;
    fn create_discussion(&mut self, discussion: &NewDiscussion) -> Result<DiscussionRecord>;
    fn add_discussion_comment(&mut self, discussion_id: &str, body: &str)
    -> Result<CreatedComment>;
    fn rate_limit(&mut self) -> Result<RateLimit>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    pub api_url: String,
    pub owner: String,
    pub repository: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl GitHubClientConfig {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            api_url: config.github_api_url(),
            owner: config.github.owner.clone(),
            repository: config.github.repository.clone(),
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
        }
    }
}

/// GraphQL client bound to one repository and one access token.
pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
    token: String,
    request_count: usize,
}

impl GitHubClient {
    pub fn new(config: GitHubClientConfig, token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build GitHub HTTP client")?;
        Ok(Self {
            client,
            config,
            token,
            request_count: 0,
        })
    }

    fn repository_variables(&self) -> serde_json::Map<String, Value> {
        let mut variables = serde_json::Map::new();
        variables.insert("owner".to_string(), json!(self.config.owner));
        variables.insert("name".to_string(), json!(self.config.repository));
        variables
    }

    fn graphql<T: DeserializeOwned>(&mut self, query: &str, variables: Value) -> Result<T> {
        self.request_count += 1;
        debug!(api_url = %self.config.api_url, "GitHub GraphQL request");
        let response = self
            .client
            .post(&self.config.api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .header("Authorization", format!("bearer {}", self.token))
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .context("failed to call GitHub GraphQL API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("GitHub GraphQL request failed with HTTP {status}: {body}");
        }
        let payload: Value = response
            .json()
            .context("failed to decode GitHub GraphQL response")?;
        decode_response(payload)
    }
}

impl DiscussionApi for GitHubClient {
    fn repository_id(&mut self) -> Result<String> {
        let variables = Value::Object(self.repository_variables());
        let data: RepositoryData<RepositoryIdNode> = self
            .graphql(REPOSITORY_ID_QUERY, variables)
            .context("failed to fetch repository id")?;
        Ok(repository(data, &self.config)?.id)
    }

    fn discussion_categories(&mut self) -> Result<Vec<DiscussionCategory>> {
        let variables = Value::Object(self.repository_variables());
        let data: RepositoryData<CategoriesNode> = self
            .graphql(DISCUSSION_CATEGORIES_QUERY, variables)
            .context("failed to fetch discussion categories")?;
        Ok(repository(data, &self.config)?.discussion_categories.nodes)
    }

    fn list_discussions(
        &mut self,
        category_id: &str,
        cursor: Option<&str>,
    ) -> Result<DiscussionPage> {
        let mut variables = self.repository_variables();
        variables.insert("categoryId".to_string(), json!(category_id));
        variables.insert("first".to_string(), json!(DISCUSSION_PAGE_SIZE));
        variables.insert("after".to_string(), json!(cursor));
        let data: RepositoryData<DiscussionsNode> = self
            .graphql(DISCUSSIONS_QUERY, Value::Object(variables))
            .context("failed to list discussions")?;
        let connection = repository(data, &self.config)?.discussions;
        Ok(DiscussionPage {
            discussions: connection.nodes,
            end_cursor: connection.page_info.end_cursor,
            has_next_page: connection.page_info.has_next_page,
        })
    }

    fn create_discussion(&mut self, discussion: &NewDiscussion) -> Result<DiscussionRecord> {
        let variables = json!({
            "input": {
                "repositoryId": discussion.repository_id,
                "categoryId": discussion.category_id,
                "title": discussion.title,
                "body": discussion.body,
            }
        });
        let data: CreateDiscussionData = self
            .graphql(CREATE_DISCUSSION_MUTATION, variables)
            .with_context(|| format!("failed to create discussion {}", discussion.title))?;
        data.create_discussion
            .and_then(|payload| payload.discussion)
            .with_context(|| format!("failed to create discussion for {}", discussion.title))
    }

    fn add_discussion_comment(
        &mut self,
        discussion_id: &str,
        body: &str,
    ) -> Result<CreatedComment> {
        let variables = json!({
            "input": {
                "discussionId": discussion_id,
                "body": body,
                "replyToId": Value::Null,
            }
        });
        let data: AddCommentData = self
            .graphql(ADD_COMMENT_MUTATION, variables)
            .with_context(|| format!("failed to add comment to discussion {discussion_id}"))?;
        data.add_discussion_comment
            .and_then(|payload| payload.comment)
            .with_context(|| format!("no comment returned for discussion {discussion_id}"))
    }

    fn rate_limit(&mut self) -> Result<RateLimit> {
        let data: RateLimitData = self
            .graphql(RATE_LIMIT_QUERY, json!({}))
            .context("failed to query rate limit")?;
        data.rate_limit.context("rate limit missing from response")
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Split a GraphQL envelope into its data, turning `errors` into a failure.
fn decode_response<T: DeserializeOwned>(payload: Value) -> Result<T> {
    let envelope: GraphqlEnvelope = serde_json::from_value(payload)
        .context("failed to decode GitHub GraphQL envelope")?;
    if !envelope.errors.is_empty() {
        let messages = envelope
            .errors
            .iter()
            .map(|error| error.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        bail!("GitHub GraphQL error: {messages}");
    }
    let data = envelope
        .data
        .filter(|data| !data.is_null())
        .context("GitHub GraphQL response carried no data")?;
    serde_json::from_value(data).context("failed to decode GitHub GraphQL data")
}

fn repository<T>(data: RepositoryData<T>, config: &GitHubClientConfig) -> Result<T> {
    data.repository.with_context(|| {
        format!(
            "repository {}/{} not found",
            config.owner, config.repository
        )
    })
}

#[derive(Debug, Deserialize)]
struct GraphqlEnvelope {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryData<T> {
    repository: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RepositoryIdNode {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoriesNode {
    discussion_categories: Nodes<DiscussionCategory>,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct DiscussionsNode {
    discussions: DiscussionConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscussionConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<DiscussionRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDiscussionData {
    create_discussion: Option<CreateDiscussionPayload>,
}

#[derive(Debug, Deserialize)]
struct CreateDiscussionPayload {
    discussion: Option<DiscussionRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCommentData {
    add_discussion_comment: Option<AddCommentPayload>,
}

#[derive(Debug, Deserialize)]
struct AddCommentPayload {
    comment: Option<CreatedComment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitData {
    rate_limit: Option<RateLimit>,
}
