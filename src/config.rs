//! Configuration for collections, filter compilation and search defaults.
//!
//! Loaded from TOML (feature `config`):
//!
//! ```toml
//! [collection]
//! table_prefix = "c$v1$"
//! distance = "cosine"  # or "l2", "inner_product"
//!
//! [collection.columns]
//! id = "_id"
//! metadata = "metadata"
//!
//! [filter]
//! max_depth = 32
//! field_style = "plain"  # or "json_extract"
//!
//! [search]
//! default_get_limit = 1000
//! default_knn_k = 10
//! peek_limit = 10
//! embedding_timeout_secs = 30
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! Every section and field is optional.

#[cfg(feature = "config")]
use std::path::Path;
use std::{sync::LazyLock, time::Duration};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    compile::{DescriptorCompiler, FieldStyle, SqlCompiler},
    filter::{FilterParser, MAX_FILTER_DEPTH},
    search::{
        ColumnNames, DEFAULT_GET_LIMIT, DEFAULT_KNN_K, DistanceMetric, TABLE_NAME_PREFIX,
    },
};

/// Column and table names are written into SQL text, so they must be plain identifiers.
static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").unwrap());

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// Table naming, column names and distance metric.
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Filter parsing and compilation.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Defaults for query, get and hybrid search.
    #[serde(default)]
    pub search: SearchDefaults,

    /// Log output, used by `observability::init_tracing`.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[cfg(feature = "config")]
impl SearchConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: SearchConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }
}

impl SearchConfig {
    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collection.validate()?;
        self.filter.validate()?;
        self.search.validate()?;
        Ok(())
    }

    /// Name of the table backing `collection`.
    pub fn table_name(&self, collection: &str) -> String {
        format!("{}{}", self.collection.table_prefix, collection)
    }

    pub fn filter_parser(&self) -> FilterParser {
        FilterParser::new(self.filter.max_depth)
    }

    pub fn sql_compiler(&self) -> SqlCompiler {
        SqlCompiler::new(
            self.collection.columns.metadata.clone(),
            self.collection.columns.document.clone(),
        )
    }

    pub fn descriptor_compiler(&self) -> DescriptorCompiler {
        DescriptorCompiler::new(
            self.filter.field_style,
            self.collection.columns.metadata.clone(),
            self.collection.columns.document.clone(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionConfig {
    /// Prefix prepended to collection names to form table names.
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,

    #[serde(default)]
    pub columns: ColumnNames,

    /// Distance metric used when a collection doesn't specify one.
    #[serde(default)]
    pub distance: DistanceMetric,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            table_prefix: default_table_prefix(),
            columns: ColumnNames::default(),
            distance: DistanceMetric::default(),
        }
    }
}

impl CollectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !IDENTIFIER_REGEX.is_match(&self.table_prefix) {
            return Err(ConfigError::Validation(format!(
                "collection.table_prefix '{}' is not a valid identifier",
                self.table_prefix
            )));
        }
        let columns = [
            ("id", &self.columns.id),
            ("document", &self.columns.document),
            ("metadata", &self.columns.metadata),
            ("embedding", &self.columns.embedding),
        ];
        for (name, value) in columns {
            if !IDENTIFIER_REGEX.is_match(value) {
                return Err(ConfigError::Validation(format!(
                    "collection.columns.{} '{}' is not a valid identifier",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

fn default_table_prefix() -> String {
    TABLE_NAME_PREFIX.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Maximum nesting depth of `$and` / `$or` / `$not`.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Field naming in hybrid-search descriptors.
    #[serde(default)]
    pub field_style: FieldStyle,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            field_style: FieldStyle::default(),
        }
    }
}

impl FilterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Validation(
                "filter.max_depth must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_depth() -> usize {
    MAX_FILTER_DEPTH
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchDefaults {
    /// Row limit for `get` when the caller passes 0.
    #[serde(default = "default_get_limit")]
    pub default_get_limit: usize,

    /// Result count for `query` and knn `k` when the caller passes 0.
    #[serde(default = "default_knn_k")]
    pub default_knn_k: usize,

    /// Row limit for `peek` when the caller passes 0.
    #[serde(default = "default_peek_limit")]
    pub peek_limit: usize,

    /// Upper bound on a single embedding call. Unbounded if omitted.
    #[serde(default)]
    pub embedding_timeout_secs: Option<u64>,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            default_get_limit: default_get_limit(),
            default_knn_k: default_knn_k(),
            peek_limit: default_peek_limit(),
            embedding_timeout_secs: None,
        }
    }
}

impl SearchDefaults {
    pub fn embedding_timeout(&self) -> Option<Duration> {
        self.embedding_timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("search.default_get_limit", self.default_get_limit),
            ("search.default_knn_k", self.default_knn_k),
            ("search.peek_limit", self.peek_limit),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        if self.embedding_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "search.embedding_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_get_limit() -> usize {
    DEFAULT_GET_LIMIT
}

fn default_knn_k() -> usize {
    DEFAULT_KNN_K
}

fn default_peek_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include file/line information.
    #[serde(default)]
    pub file_line: bool,

    /// Extra filter directives (e.g., "seekdb_search=debug").
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            timestamps: true,
            file_line: false,
            filter: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
    /// JSON format (for log aggregation).
    Json,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[cfg(feature = "config")]
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Variables after a `#` on the same line are left alone.
#[cfg(feature = "config")]
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    static ENV_VAR_REGEX: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

    let mut result = String::with_capacity(input.len());
    for (i, line) in input.lines().enumerate() {
        if i > 0 {
            result.push('\n');
        }
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR_REGEX.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };
            if comment_pos.is_some_and(|pos| whole.start() >= pos) {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);
            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);
            last_end = whole.end();
        }
        result.push_str(&line[last_end..]);
    }
    if input.ends_with('\n') {
        result.push('\n');
    }

    Ok(result)
}
