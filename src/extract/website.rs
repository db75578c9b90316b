use scraper::ElementRef;

use super::{first_link, ExtractedValue, Extractor};

/// Index-based lookup: the link inside the `slot`-th element child of the match.
///
/// The business-card footer lists its actions in a fixed order (email, website, ...),
/// so the website is read by position, not by label. A different layout yields "".
pub struct WebsiteSlot {
    slot: usize,
}

impl Default for WebsiteSlot {
    fn default() -> Self {
        WebsiteSlot { slot: 1 }
    }
}

impl Extractor for WebsiteSlot {
    fn name(&self) -> &'static str {
        "website"
    }

    fn fields(&self) -> &'static [&'static str] {
        &["Website"]
    }

    fn extract(&self, node: ElementRef<'_>) -> ExtractedValue {
        let href = node
            .children()
            .filter_map(ElementRef::wrap)
            .nth(self.slot)
            .and_then(first_link)
            .and_then(|a| a.value().attr("href"))
            .map(|h| h.trim().to_string())
            .unwrap_or_default();
        ExtractedValue::Scalar(href)
    }
}
