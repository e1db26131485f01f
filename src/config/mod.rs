//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!
//! rules (inline + rules_file)
//!     → loader.rs (skip comments, remember origins)
//!     → rewrite::RuleSet::compile
//!     → RuleSet, built once for the process lifetime
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload of rules
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A bad directive stops startup, reported with its file and line

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_rules, ConfigError};
pub use schema::{
    GatewayConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, StaticFilesConfig,
    TimeoutConfig, TlsConfig,
};
pub use validation::ValidationError;
