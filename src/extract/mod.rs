pub mod email;
pub mod listing;
pub mod website;

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").unwrap());
static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.:-]*$").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("search_tag must be a plain tag name, got {0:?}")]
    BadTag(String),
    #[error("search_attr must be a plain attribute name, got {0:?}")]
    BadAttr(String),
    #[error("search_attr_value given without search_attr")]
    ValueWithoutAttr,
    #[error("selector {css:?} rejected: {reason}")]
    Parse { css: String, reason: String },
}

/// `(tag, attribute, attribute value)` lookup compiled into a CSS selector.
///
/// `class` matches any one class token, other attributes match the whole value.
/// An empty value matches on attribute presence, an empty attribute on the tag alone.
#[derive(Debug, Clone)]
pub struct NodeSelector {
    css: String,
    compiled: Selector,
}

impl NodeSelector {
    pub fn new(tag: &str, attr: &str, value: &str) -> Result<Self, SelectorError> {
        let tag = tag.trim();
        let attr = attr.trim();
        if !TAG_RE.is_match(tag) {
            return Err(SelectorError::BadTag(tag.to_string()));
        }
        let css = if attr.is_empty() {
            if !value.is_empty() {
                return Err(SelectorError::ValueWithoutAttr);
            }
            tag.to_string()
        } else {
            if !ATTR_RE.is_match(attr) {
                return Err(SelectorError::BadAttr(attr.to_string()));
            }
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            match (attr.eq_ignore_ascii_case("class"), value.is_empty()) {
                (_, true) => format!("{}[{}]", tag, attr),
                (true, false) => format!("{}[{}~=\"{}\"]", tag, attr, escaped),
                (false, false) => format!("{}[{}=\"{}\"]", tag, attr, escaped),
            }
        };
        let compiled = Selector::parse(&css).map_err(|e| SelectorError::Parse {
            css: css.clone(),
            reason: format!("{:?}", e),
        })?;
        Ok(NodeSelector { css, compiled })
    }

    pub fn css(&self) -> &str {
        &self.css
    }

    /// First-match policy: later matches are ignored.
    pub fn first<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        document.select(&self.compiled).next()
    }
}

impl fmt::Display for NodeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.css)
    }
}

/// Value pulled out of one page: a single cell or a fixed-arity tuple of cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedValue {
    Scalar(String),
    Fields(Vec<String>),
}

impl ExtractedValue {
    /// Empty sentinel for a strategy with `arity` output cells.
    pub fn empty(arity: usize) -> Self {
        if arity == 1 {
            ExtractedValue::Scalar(String::new())
        } else {
            ExtractedValue::Fields(vec![String::new(); arity])
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            ExtractedValue::Scalar(_) => 1,
            ExtractedValue::Fields(f) => f.len(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            ExtractedValue::Scalar(s) => s.is_empty(),
            ExtractedValue::Fields(f) => f.iter().all(|s| s.is_empty()),
        }
    }

    pub fn cells(&self) -> Vec<String> {
        match self {
            ExtractedValue::Scalar(s) => vec![s.clone()],
            ExtractedValue::Fields(f) => f.clone(),
        }
    }
}

impl fmt::Display for ExtractedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractedValue::Scalar(s) => f.write_str(s),
            ExtractedValue::Fields(fields) => write!(f, "[{}]", fields.join(", ")),
        }
    }
}

/// Turns the first matched node of a page into output cells.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Output field names, in cell order. Their count is the strategy's arity.
    fn fields(&self) -> &'static [&'static str];

    fn extract(&self, node: ElementRef<'_>) -> ExtractedValue;

    fn empty(&self) -> ExtractedValue {
        ExtractedValue::empty(self.fields().len())
    }
}

/// Which extractor a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    Email,
    Website,
    Listing,
}

impl ExtractMode {
    pub fn extractor(self) -> Box<dyn Extractor> {
        match self {
            ExtractMode::Email => Box::new(email::EmailLink),
            ExtractMode::Website => Box::new(website::WebsiteSlot::default()),
            ExtractMode::Listing => Box::new(listing::ListingFields),
        }
    }

    /// Default `(tag, attr, value)` for the page layout each mode targets.
    pub fn default_selector(self) -> (&'static str, &'static str, &'static str) {
        match self {
            ExtractMode::Email => ("a", "class", "email-business"),
            ExtractMode::Website => ("div", "class", "business-card-footer"),
            ExtractMode::Listing => ("section", "id", "business-info"),
        }
    }

    /// Listing output contains commas inside cells, so it switches to `;`.
    pub fn default_delimiter(self) -> char {
        match self {
            ExtractMode::Listing => ';',
            ExtractMode::Email | ExtractMode::Website => ',',
        }
    }
}

impl FromStr for ExtractMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(ExtractMode::Email),
            "website" => Ok(ExtractMode::Website),
            "listing" => Ok(ExtractMode::Listing),
            other => Err(format!(
                "unknown mode {:?} (expected email, website or listing)",
                other
            )),
        }
    }
}

impl fmt::Display for ExtractMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractMode::Email => "email",
            ExtractMode::Website => "website",
            ExtractMode::Listing => "listing",
        };
        f.write_str(s)
    }
}

/// Parse a response body and run the extractor on the first matching node.
pub fn extract_page(body: &[u8], selector: &NodeSelector, extractor: &dyn Extractor) -> ExtractedValue {
    debug!("parsing html response ...");
    let html = String::from_utf8_lossy(body);
    let document = Html::parse_document(&html);

    let Some(node) = selector.first(&document) else {
        debug!("{} not found ({})", extractor.name(), selector.css());
        return extractor.empty();
    };

    let value = extractor.extract(node);
    if value.is_blank() {
        debug!("{} not found in matched node", extractor.name());
    } else {
        debug!("{} found: {}", extractor.name(), value);
    }
    value
}

/// First `<a>` at or below `el`.
pub(crate) fn first_link(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
    if el.value().name() == "a" {
        return Some(el);
    }
    el.select(&ANCHOR).next()
}

/// Visible text of a node with runs of whitespace collapsed.
pub(crate) fn normalized_text(el: ElementRef<'_>) -> String {
    let joined = el
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    WHITESPACE_RE.replace_all(&joined, " ").to_string()
}

#[cfg(test)]
pub(crate) fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
}

// ── Tests ──
