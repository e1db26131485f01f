//! Rewrite rule subsystem.
//!
//! # Data Flow
//! ```text
//! Rule Compilation (at startup):
//!     directive lines ("[!]pattern replacement [flags]")
//!     → rule.rs (split fields, parse flags, compile regexes)
//!     → rules.rs (ordered, immutable RuleSet)
//!     → shared via Arc with every request
//!
//! Per request:
//!     RequestContext (url, host, scheme)
//!     → evaluator.rs (first-match-wins walk over the RuleSet)
//!     → Evaluation (outcome, final url, content type, query)
//! ```
//!
//! # Design Decisions
//! - Every pattern is compiled once; nothing is recompiled per request
//! - Action flags collapse into a single `Action` at compile time
//! - Evaluation is synchronous and never touches the network; proxying is
//!   left to the caller through `Outcome::Proxy`

pub mod evaluator;
pub mod query;
pub mod rule;
pub mod rules;

pub use evaluator::{evaluate, Evaluation, Outcome, RequestContext, Scheme};
pub use query::RequestQuery;
pub use rule::{Action, Rule, RuleError};
pub use rules::RuleSet;
