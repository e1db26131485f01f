//! Directive grammar and compiled rules.
//!
//! # Grammar
//! ```text
//! [!]<pattern> <replacement> [[<flags>]]
//! ```
//!
//! # Flags
//! - `NC` case-insensitive pattern (only honoured when the line has a third field)
//! - `L` stop the rule chain after this rule fires
//! - `P` forward to the upstream named by the substitution
//! - `R` / `R=<code>` redirect, 301 by default
//! - `F` respond 403, `G` respond 410
//! - `T=<mime>` set the response Content-Type
//! - `H=<regex>` only consider the rule when the Host matches; consumes the
//!   rest of the flags block

use std::borrow::Cow;
use std::fmt;

use axum::http::{HeaderValue, StatusCode};
use regex::{Regex, RegexBuilder};
use thiserror::Error;

const DEFAULT_REDIRECT: StatusCode = StatusCode::MOVED_PERMANENTLY;
const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Error raised while compiling a directive.
///
/// Every variant carries the 1-based line number and the directive text so a
/// bad configuration can be pinpointed at startup.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("line {line}: directive `{directive}` has no replacement")]
    MissingReplacement { line: usize, directive: String },

    #[error("line {line}: invalid pattern `{pattern}` in `{directive}`: {source}")]
    InvalidPattern {
        line: usize,
        directive: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("line {line}: invalid host pattern `{pattern}` in `{directive}`: {source}")]
    InvalidHostPattern {
        line: usize,
        directive: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("line {line}: unknown flag `{flag}` in `{directive}`")]
    UnknownFlag {
        line: usize,
        directive: String,
        flag: String,
    },

    #[error("line {line}: invalid redirect status `{code}` in `{directive}`")]
    InvalidRedirect {
        line: usize,
        directive: String,
        code: String,
    },

    #[error("line {line}: invalid content type `{value}` in `{directive}`")]
    InvalidContentType {
        line: usize,
        directive: String,
        value: String,
    },
}

impl RuleError {
    /// 1-based position of the failing directive in the compiled input.
    pub fn line(&self) -> usize {
        match self {
            RuleError::MissingReplacement { line, .. }
            | RuleError::InvalidPattern { line, .. }
            | RuleError::InvalidHostPattern { line, .. }
            | RuleError::UnknownFlag { line, .. }
            | RuleError::InvalidRedirect { line, .. }
            | RuleError::InvalidContentType { line, .. } => *line,
        }
    }
}

/// The primary action of a rule, resolved once at compile time.
///
/// When a directive carries several action flags the strongest wins:
/// gone, forbidden, proxy, redirect, then the implicit rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Substitute the pattern in the request URL and keep going.
    Rewrite,
    /// Forward to the upstream URL produced by the substitution.
    Proxy,
    /// Answer with a `Location` built from the substitution.
    Redirect(StatusCode),
    /// 403 with an empty body.
    Forbidden,
    /// 410 with an empty body.
    Gone,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Rewrite => write!(f, "rewrite"),
            Action::Proxy => write!(f, "proxy"),
            Action::Redirect(code) => write!(f, "redirect {}", code.as_u16()),
            Action::Forbidden => write!(f, "forbidden"),
            Action::Gone => write!(f, "gone"),
        }
    }
}

/// A compiled, immutable rewrite rule.
#[derive(Debug, Clone)]
pub struct Rule {
    directive: String,
    pattern: Regex,
    /// Replacement exactly as written; used verbatim by inverted rules.
    replacement: String,
    /// Replacement translated to `regex` expansion syntax.
    template: String,
    inverted: bool,
    last: bool,
    action: Action,
    content_type: Option<HeaderValue>,
    host: Option<Regex>,
}

impl Rule {
    /// Compile a single directive. `line` is 1-based and only used in errors.
    pub fn parse(directive: &str, line: usize) -> Result<Self, RuleError> {
        let directive = directive.trim();
        let missing = || RuleError::MissingReplacement {
            line,
            directive: directive.to_string(),
        };

        let (raw_pattern, rest) = next_field(directive).ok_or_else(missing)?;
        let (replacement, rest) = next_field(rest).ok_or_else(missing)?;
        let trailing = rest.trim();
        let has_third_field = !trailing.is_empty();

        let block = if has_third_field {
            let block = bracketed(trailing).ok_or_else(|| RuleError::UnknownFlag {
                line,
                directive: directive.to_string(),
                flag: trailing.to_string(),
            })?;
            Some(block)
        } else {
            // `pattern [flags]` still yields flags, with the block doubling as the replacement.
            bracketed(replacement)
        };

        let flags = match block {
            Some(block) => Flags::parse(block, line, directive)?,
            None => Flags::default(),
        };

        let (inverted, pattern_src) = match raw_pattern.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw_pattern),
        };

        // NC only applies when the line has a third field.
        let case_insensitive = flags.no_case && has_third_field;
        let pattern = RegexBuilder::new(pattern_src)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|source| RuleError::InvalidPattern {
                line,
                directive: directive.to_string(),
                pattern: pattern_src.to_string(),
                source,
            })?;

        let host = flags
            .host
            .as_deref()
            .map(|src| {
                Regex::new(src).map_err(|source| RuleError::InvalidHostPattern {
                    line,
                    directive: directive.to_string(),
                    pattern: src.to_string(),
                    source,
                })
            })
            .transpose()?;

        let action = if flags.gone {
            Action::Gone
        } else if flags.forbidden {
            Action::Forbidden
        } else if flags.proxy {
            Action::Proxy
        } else if let Some(code) = flags.redirect {
            Action::Redirect(code)
        } else {
            Action::Rewrite
        };

        Ok(Self {
            directive: directive.to_string(),
            pattern,
            replacement: replacement.to_string(),
            template: expansion_template(replacement),
            inverted,
            last: flags.last,
            action,
            content_type: flags.content_type,
            host,
        })
    }

    /// The directive this rule was compiled from.
    pub fn directive(&self) -> &str {
        &self.directive
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn is_last(&self) -> bool {
        self.last
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    pub fn host_pattern(&self) -> Option<&Regex> {
        self.host.as_ref()
    }

    /// Returns false only when a host filter exists and rejects `host`.
    pub fn accepts_host(&self, host: &str) -> bool {
        self.host.as_ref().map_or(true, |re| re.is_match(host))
    }

    pub fn is_match(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    /// Replace the first match of the pattern in `url` with the replacement.
    pub fn substitute<'a>(&self, url: &'a str) -> Cow<'a, str> {
        self.pattern.replace(url, self.template.as_str())
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.directive == other.directive
    }
}

impl Eq for Rule {}

/// Split off the next whitespace-delimited field.
fn next_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    Some(s.split_at(s.find(char::is_whitespace).unwrap_or(s.len())))
}

/// Returns the inside of a `[...]` field.
fn bracketed(field: &str) -> Option<&str> {
    field.strip_prefix('[')?.strip_suffix(']')
}

#[derive(Debug, Default)]
struct Flags {
    no_case: bool,
    last: bool,
    proxy: bool,
    redirect: Option<StatusCode>,
    forbidden: bool,
    gone: bool,
    content_type: Option<HeaderValue>,
    host: Option<String>,
}

impl Flags {
    fn parse(block: &str, line: usize, directive: &str) -> Result<Self, RuleError> {
        let mut flags = Flags::default();
        let mut rest = block;

        while !rest.is_empty() {
            let (token, tail) = match rest.split_once(',') {
                Some((token, tail)) => (token.trim(), tail),
                None => (rest.trim(), ""),
            };

            if token.starts_with("H=") {
                // Host regexes may contain commas; take everything that is left.
                flags.host = Some(rest.trim_start()[2..].trim().to_string());
                break;
            }

            match token {
                "" => {}
                "NC" => flags.no_case = true,
                "L" => flags.last = true,
                "P" => flags.proxy = true,
                "F" => flags.forbidden = true,
                "G" => flags.gone = true,
                "R" => flags.redirect = Some(DEFAULT_REDIRECT),
                _ if token.starts_with("R=") => {
                    let code = &token[2..];
                    let status = code
                        .parse::<u16>()
                        .ok()
                        .and_then(|c| StatusCode::from_u16(c).ok())
                        .ok_or_else(|| RuleError::InvalidRedirect {
                            line,
                            directive: directive.to_string(),
                            code: code.to_string(),
                        })?;
                    flags.redirect = Some(status);
                }
                _ if token == "T" || token.starts_with("T=") => {
                    let value = token.get(2..).unwrap_or("").trim();
                    let value = if value.is_empty() { DEFAULT_CONTENT_TYPE } else { value };
                    let header = HeaderValue::from_str(value).map_err(|_| {
                        RuleError::InvalidContentType {
                            line,
                            directive: directive.to_string(),
                            value: value.to_string(),
                        }
                    })?;
                    flags.content_type = Some(header);
                }
                other => {
                    return Err(RuleError::UnknownFlag {
                        line,
                        directive: directive.to_string(),
                        flag: other.to_string(),
                    })
                }
            }

            rest = tail;
        }

        Ok(flags)
    }
}

/// Translate `$1`, `$&` and `$$` references into `regex` expansion syntax.
///
/// `$<digits>` ends at the first non-digit so `$1x` is group 1 then `x`.
/// Any other `$` is kept as a literal dollar sign.
fn expansion_template(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len() + 8);
    let mut chars = replacement.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(d) if d.is_ascii_digit() => {
                out.push_str("${");
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    out.push(d);
                    chars.next();
                }
                out.push('}');
            }
            Some('&') => {
                chars.next();
                out.push_str("${0}");
            }
            Some('$') => {
                chars.next();
                out.push_str("$$");
            }
            _ => out.push_str("$$"),
        }
    }

    out
}
