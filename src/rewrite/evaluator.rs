//! Per-request rule evaluation.
//!
//! # Responsibilities
//! - Walk the rule set in declaration order, once
//! - Apply host filters, pattern tests and inversion
//! - Rewrite the URL in place or stop at the first terminal action
//! - Extract the query mapping from the final URL
//!
//! # Design Decisions
//! - Pure function over a `RequestContext`; no I/O and no shared state
//! - Terminal actions return immediately, there is no unwinding for control flow
//! - The query mapping is part of the result instead of a side channel

use std::fmt;

use axum::http::{HeaderValue, StatusCode};

use crate::rewrite::query::RequestQuery;
use crate::rewrite::rule::{Action, Rule};
use crate::rewrite::rules::RuleSet;

/// Transport scheme the request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    /// `encrypted` reflects the listener; `X-Forwarded-Proto: https` from a
    /// fronting proxy counts as encrypted too.
    pub fn detect(encrypted: bool, forwarded_proto: Option<&str>) -> Self {
        let forwarded_https = forwarded_proto
            .map(|p| p.trim().eq_ignore_ascii_case("https"))
            .unwrap_or(false);
        if encrypted || forwarded_https {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the evaluator needs to know about one in-flight request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    url: String,
    host: String,
    scheme: Scheme,
}

impl RequestContext {
    /// `url` is the path plus query; a missing Host is passed as `""`.
    pub fn new(url: impl Into<String>, host: impl Into<String>, scheme: Scheme) -> Self {
        Self {
            url: url.into(),
            host: host.into(),
            scheme,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }
}

/// How the request leaves the rule engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<'r> {
    /// Hand the (possibly rewritten) request to the next stage.
    Continue,
    /// Respond 410 with an empty body.
    Gone,
    /// Respond 403 with an empty body.
    Forbidden,
    /// Respond with `status` and a `Location` header.
    Redirect { status: StatusCode, location: String },
    /// Forward upstream using this rule's substitution.
    Proxy(&'r Rule),
}

impl Outcome<'_> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Continue)
    }
}

/// Result of walking the rule set for one request.
#[derive(Debug, Clone)]
pub struct Evaluation<'r> {
    pub outcome: Outcome<'r>,
    /// Final URL after every rewrite that fired.
    pub url: String,
    /// Content type of the last firing rule that carried `T=`.
    pub content_type: Option<HeaderValue>,
    /// Present whenever `url` contains a `?`.
    pub query: Option<RequestQuery>,
}

impl<'r> Evaluation<'r> {
    fn finish(outcome: Outcome<'r>, url: String, content_type: Option<HeaderValue>) -> Self {
        let query = RequestQuery::from_url(&url);
        Self {
            outcome,
            url,
            content_type,
            query,
        }
    }

    /// True when the pipeline continuation should run.
    pub fn should_continue(&self) -> bool {
        !self.outcome.is_terminal()
    }
}

/// Evaluate `rules` against one request.
///
/// The first rule whose host filter passes and whose match condition fires
/// decides a terminal action. Rewrites without `L` keep going against the
/// updated URL; a rewrite with `L` stops the walk but still continues the
/// pipeline.
pub fn evaluate<'r>(rules: &'r RuleSet, ctx: &RequestContext) -> Evaluation<'r> {
    let mut url = ctx.url().to_string();
    let mut content_type = None;

    for (index, rule) in rules.iter().enumerate() {
        if !rule.accepts_host(ctx.host()) {
            tracing::trace!(
                rule = index,
                host = ctx.host(),
                host_pattern = rule.host_pattern().map(|re| re.as_str()),
                "Host filter rejected request"
            );
            continue;
        }

        let matched = rule.is_match(&url);

        if rule.is_inverted() {
            if matched {
                continue;
            }
            tracing::debug!(
                rule = index,
                directive = rule.directive(),
                from = %url,
                to = rule.replacement(),
                "Inverted rule fired"
            );
            url = rule.replacement().to_string();
            if rule.is_last() {
                break;
            }
            continue;
        }

        if !matched {
            continue;
        }

        tracing::debug!(
            rule = index,
            directive = rule.directive(),
            action = %rule.action(),
            pattern = rule.pattern().as_str(),
            url = %url,
            "Rule fired"
        );

        if let Some(ct) = rule.content_type() {
            content_type = Some(ct.clone());
        }

        match rule.action() {
            Action::Gone => return Evaluation::finish(Outcome::Gone, url, content_type),
            Action::Forbidden => return Evaluation::finish(Outcome::Forbidden, url, content_type),
            Action::Proxy => return Evaluation::finish(Outcome::Proxy(rule), url, content_type),
            Action::Redirect(status) => {
                let location = format!("{}://{}{}", ctx.scheme(), ctx.host(), rule.substitute(&url));
                let outcome = Outcome::Redirect { status, location };
                return Evaluation::finish(outcome, url, content_type);
            }
            Action::Rewrite => {
                url = rule.substitute(&url).into_owned();
                if rule.is_last() {
                    break;
                }
            }
        }
    }

    Evaluation::finish(Outcome::Continue, url, content_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(lines: &[&str]) -> RuleSet {
        RuleSet::compile(lines).unwrap()
    }

    fn ctx(url: &str) -> RequestContext {
        RequestContext::new(url, "example.com", Scheme::Http)
    }

    #[test]
    fn test_scheme_detection() {
        assert_eq!(Scheme::detect(false, None), Scheme::Http);
        assert_eq!(Scheme::detect(true, None), Scheme::Https);
        assert_eq!(Scheme::detect(false, Some("https")), Scheme::Https);
        assert_eq!(Scheme::detect(false, Some("http")), Scheme::Http);
    }

    #[test]
    fn test_no_rules_continues_unchanged() {
        let set = rules(&[]);
        let eval = evaluate(&set, &ctx("/index"));
        assert_eq!(eval.outcome, Outcome::Continue);
        assert_eq!(eval.url, "/index");
        assert!(eval.query.is_none());
        assert!(eval.should_continue());
    }

    #[test]
    fn test_redirect_uses_scheme_and_host() {
        let set = rules(&["^/a$ /b [R=302]"]);

        let eval = evaluate(&set, &ctx("/a"));
        assert_eq!(
            eval.outcome,
            Outcome::Redirect {
                status: StatusCode::FOUND,
                location: "http://example.com/b".into()
            }
        );
        assert!(!eval.should_continue());

        let secure = RequestContext::new("/a", "example.com", Scheme::Https);
        let eval = evaluate(&set, &secure);
        assert_eq!(
            eval.outcome,
            Outcome::Redirect {
                status: StatusCode::FOUND,
                location: "https://example.com/b".into()
            }
        );
    }

    #[test]
    fn test_redirect_defaults_to_301() {
        let set = rules(&["^/old$ /new [R]"]);
        match evaluate(&set, &ctx("/old")).outcome {
            Outcome::Redirect { status, .. } => assert_eq!(status, StatusCode::MOVED_PERMANENTLY),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_inverted_fires_on_non_match() {
        let set = rules(&["!^/public/.* /index.html [L]", "^/index.html$ /never [F]"]);

        let eval = evaluate(&set, &ctx("/secret"));
        assert_eq!(eval.outcome, Outcome::Continue);
        assert_eq!(eval.url, "/index.html");
    }

    #[test]
    fn test_inverted_match_lets_later_rules_run() {
        let set = rules(&["!^/public/.* /index.html [L]", "^/public/(.*)$ /assets/$1"]);

        let eval = evaluate(&set, &ctx("/public/x"));
        assert_eq!(eval.outcome, Outcome::Continue);
        assert_eq!(eval.url, "/assets/x");
    }

    #[test]
    fn test_inverted_replacement_is_literal() {
        let set = rules(&["!^/keep(.*)$ /fallback$1"]);
        let eval = evaluate(&set, &ctx("/other"));
        assert_eq!(eval.url, "/fallback$1");
    }

    #[test]
    fn test_inverted_without_last_continues() {
        let set = rules(&["!^/app /app/home", "^/app/(.*)$ /srv/$1 [L]"]);
        let eval = evaluate(&set, &ctx("/elsewhere"));
        assert_eq!(eval.url, "/srv/home");
    }

    #[test]
    fn test_rewrite_chaining() {
        let set = rules(&["^/old/(.*)$ /new/$1", "^/new/(.*)$ /final/$1 [L]"]);
        let eval = evaluate(&set, &ctx("/old/x"));
        assert_eq!(eval.outcome, Outcome::Continue);
        assert_eq!(eval.url, "/final/x");
    }

    #[test]
    fn test_last_stops_rewrite_chain() {
        let set = rules(&["^/a$ /b [L]", "^/b$ /c"]);
        let eval = evaluate(&set, &ctx("/a"));
        assert_eq!(eval.url, "/b");
        assert!(eval.should_continue());
    }

    #[test]
    fn test_terminal_action_stops_evaluation() {
        let set = rules(&["^/a$ /b [F]", "^/a$ /c [G]"]);
        let eval = evaluate(&set, &ctx("/a"));
        assert_eq!(eval.outcome, Outcome::Forbidden);
        assert_eq!(eval.url, "/a");
    }

    #[test]
    fn test_non_last_rewrite_then_terminal() {
        let set = rules(&["^/a$ /b", "^/b$ /gone [G]"]);
        let eval = evaluate(&set, &ctx("/a"));
        assert_eq!(eval.outcome, Outcome::Gone);
        assert_eq!(eval.url, "/b");
    }

    #[test]
    fn test_content_type_travels_with_gone() {
        let set = rules(&["^/a$ /b [T=text/html,G]"]);
        let eval = evaluate(&set, &ctx("/a"));
        assert_eq!(eval.outcome, Outcome::Gone);
        assert_eq!(eval.content_type.unwrap(), "text/html");
    }

    #[test]
    fn test_content_type_only_when_rule_fires() {
        let set = rules(&["^/nope$ /b [T=text/html]", "^/a$ /c"]);
        let eval = evaluate(&set, &ctx("/a"));
        assert!(eval.content_type.is_none());
    }

    #[test]
    fn test_host_filter_skips_rule_entirely() {
        let set = rules(&["^/a$ /b [T=text/html,G,H=^admin\\.example\\.com$]", "^/a$ /fallback"]);

        let eval = evaluate(&set, &ctx("/a"));
        assert_eq!(eval.outcome, Outcome::Continue);
        assert_eq!(eval.url, "/fallback");
        assert!(eval.content_type.is_none());

        let admin = RequestContext::new("/a", "admin.example.com", Scheme::Http);
        assert_eq!(evaluate(&set, &admin).outcome, Outcome::Gone);
    }

    #[test]
    fn test_host_filter_applies_to_inverted_rules() {
        let set = rules(&["!^/ok$ /blocked [H=^internal$]"]);
        assert_eq!(evaluate(&set, &ctx("/x")).url, "/x");

        let internal = RequestContext::new("/x", "internal", Scheme::Http);
        assert_eq!(evaluate(&set, &internal).url, "/blocked");
    }

    #[test]
    fn test_proxy_outcome_carries_rule() {
        let set = rules(&["^/api/(.*)$ http://backend:9000/$1 [P]", "^/api/(.*)$ /never"]);
        let eval = evaluate(&set, &ctx("/api/users?id=3"));
        match eval.outcome {
            Outcome::Proxy(rule) => {
                assert_eq!(rule.substitute(&eval.url), "http://backend:9000/users?id=3");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(eval.url, "/api/users?id=3");
    }

    #[test]
    fn test_query_extracted_from_final_url() {
        let set = rules(&["^/search/(.*)$ /find?q=$1&page=2"]);
        let eval = evaluate(&set, &ctx("/search/rust"));
        let query = eval.query.unwrap();
        assert_eq!(query.get("q"), Some("rust"));
        assert_eq!(query.get("page"), Some("2"));

        let empty = rules(&[]);
        let eval = evaluate(&empty, &ctx("/path?x=1&y=2"));
        let query = eval.query.unwrap();
        assert_eq!(query.get("x"), Some("1"));
        assert_eq!(query.get("y"), Some("2"));
    }

    #[test]
    fn test_no_case_rule() {
        let set = rules(&["^/docs$ /manual [NC,L]"]);
        assert_eq!(evaluate(&set, &ctx("/DOCS")).url, "/manual");
    }
}
