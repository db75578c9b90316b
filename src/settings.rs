use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::delay::RateLimiter;
use crate::extract::{ExtractMode, NodeSelector, SelectorError};
use crate::table::WriteMode;

/// INI section holding every key.
pub const SECTION: &str = "scraper";
pub const ENV_PREFIX: &str = "YP";

const DEFAULT_MIN_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 2000;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("min_delay ({min}) is greater than max_delay ({max})")]
    DelayRange { min: u64, max: u64 },
    #[error("invalid selector: {0}")]
    Selector(#[from] SelectorError),
    #[error("out_col_name has {got} name(s) but mode `{mode}` writes {expected} column(s)")]
    ColumnCount {
        mode: ExtractMode,
        expected: usize,
        got: usize,
    },
}

/// Keys as they appear in the file. Everything is optional here; `Settings` validates.
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    path: Option<String>,
    out_path: Option<String>,
    column: Option<i64>,
    header: Option<bool>,
    delay_request: Option<bool>,
    min_delay: Option<u64>,
    max_delay: Option<u64>,
    request_timeout: Option<u64>,
    mode: Option<String>,
    search_tag: Option<String>,
    search_attr: Option<String>,
    search_attr_value: Option<String>,
    out_col_name: Option<String>,
    out_delimiter: Option<String>,
    out_mode: Option<String>,
    concurrency: Option<i64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelaySettings {
    pub enabled: bool,
    pub min_ms: u64,
    pub max_ms: u64,
}

/// Validated, immutable run configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub input: PathBuf,
    pub output: PathBuf,
    /// 0-based URL column.
    pub column: usize,
    pub has_header: bool,
    pub delay: DelaySettings,
    pub request_timeout: Duration,
    pub mode: ExtractMode,
    pub selector: NodeSelector,
    /// Header cells for the appended columns, one per extractor field.
    pub out_columns: Vec<String>,
    pub out_delimiter: char,
    pub out_mode: WriteMode,
    pub concurrency: usize,
    pub user_agent: String,
}

impl Settings {
    /// Read `path` (INI), then apply `YP_SCRAPER__<KEY>` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini).required(true))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        Self::from_config(&cfg)
    }

    fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let raw: RawSettings = cfg.get(SECTION)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let input = raw
            .path
            .filter(|p| !p.trim().is_empty())
            .ok_or(ConfigError::Missing("path"))?;
        let output = raw
            .out_path
            .filter(|p| !p.trim().is_empty())
            .ok_or(ConfigError::Missing("out_path"))?;

        let column = raw.column.ok_or(ConfigError::Missing("column"))?;
        if column < 1 {
            return Err(ConfigError::Invalid {
                key: "column",
                reason: format!("columns are 1-based, got {}", column),
            });
        }

        let min_ms = raw.min_delay.unwrap_or(DEFAULT_MIN_DELAY_MS);
        let max_ms = raw.max_delay.unwrap_or(DEFAULT_MAX_DELAY_MS);
        if min_ms > max_ms {
            return Err(ConfigError::DelayRange {
                min: min_ms,
                max: max_ms,
            });
        }

        let timeout_ms = raw.request_timeout.unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout",
                reason: "must be greater than zero".into(),
            });
        }

        let mode = match raw.mode.as_deref() {
            Some(m) => m
                .parse::<ExtractMode>()
                .map_err(|reason| ConfigError::Invalid { key: "mode", reason })?,
            None => ExtractMode::Email,
        };

        let (default_tag, default_attr, default_value) = mode.default_selector();
        let selector = match raw.search_tag.as_deref().map(str::trim) {
            Some(tag) if !tag.is_empty() => NodeSelector::new(
                tag,
                raw.search_attr.as_deref().unwrap_or(""),
                raw.search_attr_value.as_deref().unwrap_or(""),
            )?,
            _ => NodeSelector::new(default_tag, default_attr, default_value)?,
        };

        let fields = mode.extractor().fields();
        let out_columns = match raw.out_col_name.as_deref() {
            Some(names) if !names.trim().is_empty() => split_names(names),
            _ => fields.iter().map(|f| f.to_string()).collect(),
        };
        if out_columns.len() != fields.len() {
            return Err(ConfigError::ColumnCount {
                mode,
                expected: fields.len(),
                got: out_columns.len(),
            });
        }

        let out_delimiter = match raw.out_delimiter.as_deref() {
            Some(d) => parse_delimiter(d).map_err(|reason| ConfigError::Invalid {
                key: "out_delimiter",
                reason,
            })?,
            None => mode.default_delimiter(),
        };

        let out_mode = match raw.out_mode.as_deref() {
            Some(m) => m
                .parse::<WriteMode>()
                .map_err(|reason| ConfigError::Invalid { key: "out_mode", reason })?,
            None => WriteMode::Overwrite,
        };

        let concurrency = raw.concurrency.unwrap_or(1);
        if concurrency < 1 {
            return Err(ConfigError::Invalid {
                key: "concurrency",
                reason: format!("must be at least 1, got {}", concurrency),
            });
        }

        Ok(Settings {
            input: PathBuf::from(input.trim()),
            output: PathBuf::from(output.trim()),
            column: (column - 1) as usize,
            has_header: raw.header.unwrap_or(false),
            delay: DelaySettings {
                enabled: raw.delay_request.unwrap_or(true),
                min_ms,
                max_ms,
            },
            request_timeout: Duration::from_millis(timeout_ms),
            mode,
            selector,
            out_columns,
            out_delimiter,
            out_mode,
            concurrency: concurrency as usize,
            user_agent: raw
                .user_agent
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
        })
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.delay.enabled, self.delay.min_ms, self.delay.max_ms)
    }

    /// Header cells for the new columns, or `None` when the input has no header row.
    pub fn header_names(&self) -> Option<&[String]> {
        self.has_header.then_some(self.out_columns.as_slice())
    }
}

fn split_names(names: &str) -> Vec<String> {
    names.split(',').map(|n| n.trim().to_string()).collect()
}

/// Single character, or one of `comma`, `semicolon`, `tab`, `pipe`.
fn parse_delimiter(raw: &str) -> Result<char, String> {
    let named = match raw.trim().to_ascii_lowercase().as_str() {
        "comma" => Some(','),
        "semicolon" => Some(';'),
        "tab" | "\\t" => Some('\t'),
        "pipe" => Some('|'),
        _ => None,
    };
    if let Some(c) = named {
        return Ok(c);
    }
    // Don't trim a literal tab.
    let value = if raw.trim().is_empty() { raw } else { raw.trim() };
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c != '"' && c != '\n' && c != '\r' => Ok(c),
        _ => Err(format!("expected a single character, got {:?}", raw)),
    }
}
