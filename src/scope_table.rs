// ABOUTME: Static endpoint -> (permission, level) lookup table
// ABOUTME: Order-sensitive, first-match-wins
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Endpoint → scope table
//!
//! A small, compiled-once, ordered list of regexes. Evaluated top-to-bottom;
//! the first matching (pattern, method) pair wins. Deliberately a linear
//! scan rather than a trie: the table is well under 50 entries, and a
//! scan keeps the ordering — and thus the resolution of overlapping
//! patterns such as the `pulls/N/requested_reviewers` PUT ambiguity —
//! visibly in one place instead of folded into trie construction.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ScopeLevel;

/// A method matcher: either a fixed HTTP method or "any".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodMatch {
    Any,
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl MethodMatch {
    fn matches(self, method: &http::Method) -> bool {
        match self {
            Self::Any => true,
            Self::Get => method == http::Method::GET,
            Self::Post => method == http::Method::POST,
            Self::Put => method == http::Method::PUT,
            Self::Patch => method == http::Method::PATCH,
            Self::Delete => method == http::Method::DELETE,
        }
    }
}

struct Rule {
    pattern: Regex,
    method: MethodMatch,
    permission: &'static str,
    level: ScopeLevel,
}

fn rule(pattern: &str, method: MethodMatch, permission: &'static str, level: ScopeLevel) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("scope table pattern must compile"),
        method,
        permission,
        level,
    }
}

/// Compiled once at first use; order here is the table's meaning.
static TABLE: Lazy<Vec<Rule>> = Lazy::new(|| {
    use MethodMatch::{Any, Delete, Get, Patch, Post, Put};
    use ScopeLevel::{Read, Write};
    vec![
        rule(r"^/repos/[^/]+/[^/]+/contents(/.*)?$", Get, "contents", Read),
        rule(r"^/repos/[^/]+/[^/]+/contents(/.*)?$", Put, "contents", Write),
        rule(r"^/repos/[^/]+/[^/]+/contents(/.*)?$", Delete, "contents", Write),
        rule(
            r"^/repos/[^/]+/[^/]+/git/(refs|trees|blobs|commits|tags)(/.*)?$",
            Get,
            "contents",
            Read,
        ),
        rule(
            r"^/repos/[^/]+/[^/]+/git/(refs|trees|blobs|commits|tags)(/.*)?$",
            Post,
            "contents",
            Write,
        ),
        rule(
            r"^/repos/[^/]+/[^/]+/git/(refs|trees|blobs|commits|tags)(/.*)?$",
            Patch,
            "contents",
            Write,
        ),
        rule(r"^/repos/[^/]+/[^/]+/branches(/.*)?$", Get, "contents", Read),
        rule(r"^/repos/[^/]+/[^/]+/commits(/.*)?$", Get, "contents", Read),
        rule(r"^/repos/[^/]+/[^/]+/compare/.+$", Get, "contents", Read),
        rule(r"^/repos/[^/]+/[^/]+/pulls(/\d+)?$", Get, "pulls", Read),
        rule(r"^/repos/[^/]+/[^/]+/pulls$", Post, "pulls", Write),
        rule(r"^/repos/[^/]+/[^/]+/pulls/\d+$", Patch, "pulls", Write),
        rule(r"^/repos/[^/]+/[^/]+/pulls/\d+/merge$", Put, "pulls", Write),
        rule(
            r"^/repos/[^/]+/[^/]+/pulls/\d+/(files|commits|reviews|comments|requested_reviewers)(/.*)?$",
            Get,
            "pulls",
            Read,
        ),
        rule(
            r"^/repos/[^/]+/[^/]+/pulls/\d+/(files|commits|reviews|comments|requested_reviewers)(/.*)?$",
            Post,
            "pulls",
            Write,
        ),
        rule(
            r"^/repos/[^/]+/[^/]+/pulls/\d+/(files|commits|reviews|comments|requested_reviewers)(/.*)?$",
            Put,
            "pulls",
            Write,
        ),
        rule(
            r"^/repos/[^/]+/[^/]+/pulls/\d+/(files|commits|reviews|comments|requested_reviewers)(/.*)?$",
            Delete,
            "pulls",
            Write,
        ),
        rule(r"^/repos/[^/]+/[^/]+/issues(/\d+)?$", Get, "issues", Read),
        rule(r"^/repos/[^/]+/[^/]+/issues$", Post, "issues", Write),
        rule(r"^/repos/[^/]+/[^/]+/issues/\d+$", Patch, "issues", Write),
        rule(
            r"^/repos/[^/]+/[^/]+/issues/\d+/(comments|labels|assignees)(/.*)?$",
            Get,
            "issues",
            Read,
        ),
        rule(
            r"^/repos/[^/]+/[^/]+/issues/\d+/(comments|labels|assignees)(/.*)?$",
            Post,
            "issues",
            Write,
        ),
        rule(
            r"^/repos/[^/]+/[^/]+/issues/\d+/(comments|labels|assignees)(/.*)?$",
            Put,
            "issues",
            Write,
        ),
        rule(
            r"^/repos/[^/]+/[^/]+/issues/\d+/(comments|labels|assignees)(/.*)?$",
            Delete,
            "issues",
            Write,
        ),
        rule(r"^/repos/[^/]+/[^/]+/statuses/.+$", Get, "statuses", Read),
        rule(r"^/repos/[^/]+/[^/]+/statuses/.+$", Post, "statuses", Write),
        rule(r"^/repos/[^/]+/[^/]+/check-runs(/.*)?$", Get, "checks", Read),
        rule(r"^/repos/[^/]+/[^/]+/check-runs(/.*)?$", Post, "checks", Write),
        rule(r"^/repos/[^/]+/[^/]+/check-suites(/.*)?$", Get, "checks", Read),
        rule(r"^/repos/[^/]+/[^/]+/check-suites(/.*)?$", Post, "checks", Write),
        rule(r"^/repos/[^/]+/[^/]+/actions(/.*)?$", Get, "actions", Read),
        rule(
            r"^/repos/[^/]+/[^/]+/actions/(workflows|runs)/[^/]+/dispatches$",
            Post,
            "actions",
            Write,
        ),
        rule(r"^/repos/[^/]+/[^/]+/releases(/.*)?$", Get, "contents", Read),
        rule(r"^/repos/[^/]+/[^/]+/releases(/.*)?$", Post, "contents", Write),
        rule(r"^/repos/[^/]+/[^/]+$", Get, "metadata", Read),
        rule(r"^/user$", Any, "metadata", Read),
    ]
});

/// Look up `(permission, level)` for `method path`. Returns `None` if no
/// rule matches; the proxy forwards such requests without a scope check.
#[must_use]
pub fn lookup(method: &http::Method, path: &str) -> Option<(&'static str, ScopeLevel)> {
    TABLE
        .iter()
        .find(|r| r.method.matches(method) && r.pattern.is_match(path))
        .map(|r| (r.permission, r.level))
}

/// Extract `owner/name` from a path beginning `/repos/{owner}/{name}/...`.
/// Any other path shape yields an empty string.
#[must_use]
pub fn extract_repository(path: &str) -> String {
    let mut segments = path.trim_start_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some("repos"), Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => {
            format!("{owner}/{name}")
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn contents_read_vs_write_by_method() {
        let path = "/repos/acme/widget/contents/src/main.rs";
        assert_eq!(lookup(&Method::GET, path), Some(("contents", ScopeLevel::Read)));
        assert_eq!(lookup(&Method::PUT, path), Some(("contents", ScopeLevel::Write)));
    }

    #[test]
    fn pulls_requested_reviewers_ordering_is_deterministic() {
        let path = "/repos/acme/widget/pulls/4/requested_reviewers";
        assert_eq!(lookup(&Method::GET, path), Some(("pulls", ScopeLevel::Read)));
        assert_eq!(lookup(&Method::POST, path), Some(("pulls", ScopeLevel::Write)));
    }

    #[test]
    fn merge_is_write_before_generic_pulls_pattern_matches() {
        let path = "/repos/acme/widget/pulls/7/merge";
        assert_eq!(lookup(&Method::PUT, path), Some(("pulls", ScopeLevel::Write)));
    }

    #[test]
    fn unknown_endpoint_yields_none() {
        assert_eq!(lookup(&Method::GET, "/repos/acme/widget/hooks"), None);
    }

    #[test]
    fn bare_repo_get_falls_back_to_metadata() {
        assert_eq!(
            lookup(&Method::GET, "/repos/acme/widget"),
            Some(("metadata", ScopeLevel::Read))
        );
    }

    #[test]
    fn unlisted_repo_subresource_yields_none() {
        assert_eq!(lookup(&Method::GET, "/repos/acme/widget/languages"), None);
    }

    #[test]
    fn user_endpoint_matches_any_method() {
        assert_eq!(lookup(&Method::GET, "/user"), Some(("metadata", ScopeLevel::Read)));
        assert_eq!(lookup(&Method::PATCH, "/user"), Some(("metadata", ScopeLevel::Read)));
    }

    #[test]
    fn extract_repository_from_repos_path() {
        assert_eq!(extract_repository("/repos/acme/widget/contents/x"), "acme/widget");
    }

    #[test]
    fn extract_repository_from_non_repos_path_is_empty() {
        assert_eq!(extract_repository("/user"), "");
        assert_eq!(extract_repository("/"), "");
    }
}
