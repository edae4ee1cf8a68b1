//! Posts that need special handling.
//!
//! A handful of historical posts cannot go through the general pipeline
//! unchanged. Each one is listed here by id together with the rule that
//! applies, so the normalizer and media resolver never carry id checks of
//! their own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ExceptionEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExceptionRule {
    /// Remove `<ol>`/`<li>` markup before conversion; the post's lists are malformed.
    StripOrderedLists,
    /// Never download images; the remote host hangs indefinitely.
    SkipImageDownloads,
}

impl ExceptionRule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StripOrderedLists => "strip-ordered-lists",
            Self::SkipImageDownloads => "skip-image-downloads",
        }
    }
}

const BUILT_IN: &[(u64, ExceptionRule, &str)] = &[
    (
        477173,
        ExceptionRule::StripOrderedLists,
        "ordered lists wrap the entire post body",
    ),
    (
        474953,
        ExceptionRule::SkipImageDownloads,
        "image host never answers",
    ),
];

#[derive(Debug, Clone, Default)]
pub struct ExceptionTable {
    rules: BTreeMap<u64, Vec<ExceptionRule>>,
}

impl ExceptionTable {
    pub fn built_in() -> Self {
        let mut table = Self::default();
        for (post_id, rule, _reason) in BUILT_IN {
            table.insert(*post_id, *rule);
        }
        table
    }

    pub fn with_entries(entries: &[ExceptionEntry]) -> Self {
        let mut table = Self::built_in();
        for entry in entries {
            table.insert(entry.post_id, entry.rule);
        }
        table
    }

    pub fn insert(&mut self, post_id: u64, rule: ExceptionRule) {
        let rules = self.rules.entry(post_id).or_default();
        if !rules.contains(&rule) {
            rules.push(rule);
        }
    }

    pub fn applies(&self, post_id: u64, rule: ExceptionRule) -> bool {
        self.rules
            .get(&post_id)
            .is_some_and(|rules| rules.contains(&rule))
    }

    /// Why `rule` applies to `post_id`; configured entries carry no reason.
    pub fn reason(&self, post_id: u64, rule: ExceptionRule) -> &'static str {
        BUILT_IN
            .iter()
            .find(|(id, built_in, _)| *id == post_id && *built_in == rule)
            .map(|(_, _, reason)| *reason)
            .unwrap_or("configured exception")
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
