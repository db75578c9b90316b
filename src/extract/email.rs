use scraper::ElementRef;

use super::{ExtractedValue, Extractor};

/// Reads the `href` of the matched link, dropping a `mailto:` prefix.
pub struct EmailLink;

impl Extractor for EmailLink {
    fn name(&self) -> &'static str {
        "email"
    }

    fn fields(&self) -> &'static [&'static str] {
        &["Email"]
    }

    fn extract(&self, node: ElementRef<'_>) -> ExtractedValue {
        let email = node
            .value()
            .attr("href")
            .map(strip_mailto)
            .unwrap_or_default();
        ExtractedValue::Scalar(email)
    }
}

/// `mailto:x@a.test` → `x@a.test`. Anything else passes through untouched.
pub fn strip_mailto(href: &str) -> String {
    if !href.contains("mailto:") {
        return href.to_string();
    }
    match href.split_once(':') {
        Some((_, rest)) => rest.to_string(),
        None => href.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{extract_page, fixture, NodeSelector};

    fn run(html: &str) -> ExtractedValue {
        let sel = NodeSelector::new("a", "class", "email-business").unwrap();
        extract_page(html.as_bytes(), &sel, &EmailLink)
    }

    #[test]
    fn mailto_prefix_removed() {
        assert_eq!(strip_mailto("mailto:info@acme.test"), "info@acme.test");
        assert_eq!(strip_mailto("MAILTO-ish"), "MAILTO-ish");
        assert_eq!(strip_mailto("info@acme.test"), "info@acme.test");
        assert_eq!(strip_mailto("mailto:a@b.test?subject=hi"), "a@b.test?subject=hi");
    }

    #[test]
    fn business_page_fixture() {
        let v = run(&fixture("email_business"));
        assert_eq!(v, ExtractedValue::Scalar("contact@acme-plumbing.test".into()));
    }

    #[test]
    fn raw_href_kept_without_mailto() {
        let v = run(r#"<a class="email-business" href="/contact-us">Email</a>"#);
        assert_eq!(v, ExtractedValue::Scalar("/contact-us".into()));
    }

    #[test]
    fn missing_href_is_empty() {
        let v = run(r#"<a class="email-business">Email</a>"#);
        assert_eq!(v, ExtractedValue::Scalar(String::new()));
    }
}
