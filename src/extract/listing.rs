use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

use super::{first_link, normalized_text, ExtractedValue, Extractor};

static LABEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("dt").unwrap());
static VALUE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("dd").unwrap());

const FIELDS: &[&str] = &["Website", "Address"];

/// Label-based lookup over `dt`/`dd` pairs.
///
/// Labels and values are paired by position. A label containing a field name fills
/// that field; the first such label wins. Output order is always `FIELDS`.
pub struct ListingFields;

impl Extractor for ListingFields {
    fn name(&self) -> &'static str {
        "listing"
    }

    fn fields(&self) -> &'static [&'static str] {
        FIELDS
    }

    fn extract(&self, node: ElementRef<'_>) -> ExtractedValue {
        let labels: Vec<ElementRef> = node.select(&LABEL).collect();
        let values: Vec<ElementRef> = node.select(&VALUE).collect();

        let mut found: Vec<Option<String>> = vec![None; FIELDS.len()];
        for (label, value) in labels.iter().zip(values.iter()) {
            let label_text = label.text().collect::<String>();
            for (i, field) in FIELDS.iter().enumerate() {
                if found[i].is_some() || !label_text.contains(field) {
                    continue;
                }
                found[i] = Some(read_field(field, *value));
            }
        }

        ExtractedValue::Fields(found.into_iter().map(Option::unwrap_or_default).collect())
    }
}

fn read_field(field: &str, value: ElementRef<'_>) -> String {
    match field {
        "Website" => first_link(value)
            .and_then(|a| a.value().attr("href"))
            .map(|h| h.trim().to_string())
            .unwrap_or_default(),
        _ => normalized_text(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{extract_page, fixture, NodeSelector};

    fn run(html: &str) -> ExtractedValue {
        let sel = NodeSelector::new("section", "id", "business-info").unwrap();
        extract_page(html.as_bytes(), &sel, &ListingFields)
    }

    fn fields(a: &str, b: &str) -> ExtractedValue {
        ExtractedValue::Fields(vec![a.to_string(), b.to_string()])
    }

    #[test]
    fn listing_fixture() {
        let v = run(&fixture("listing"));
        assert_eq!(
            v,
            fields("https://www.acme-plumbing.test/", "123 Main St, Springfield, IL 62701")
        );
    }

    #[test]
    fn order_is_fixed_regardless_of_page_order() {
        let html = r#"<section id="business-info"><dl>
            <dt>Address:</dt><dd>1 Elm Rd</dd>
            <dt>Website:</dt><dd><a href="http://elm.test">elm</a></dd>
        </dl></section>"#;
        assert_eq!(run(html), fields("http://elm.test", "1 Elm Rd"));
    }

    #[test]
    fn missing_field_stays_empty() {
        let html = r#"<section id="business-info"><dl>
            <dt>Phone:</dt><dd>555-0100</dd>
            <dt>General Address</dt><dd>9 Oak Ave</dd>
        </dl></section>"#;
        assert_eq!(run(html), fields("", "9 Oak Ave"));
    }

    #[test]
    fn first_label_wins() {
        let html = r#"<section id="business-info"><dl>
            <dt>Website</dt><dd><a href="http://one.test">1</a></dd>
            <dt>Other Website</dt><dd><a href="http://two.test">2</a></dd>
        </dl></section>"#;
        assert_eq!(run(html), fields("http://one.test", ""));
    }

    #[test]
    fn unpaired_labels_are_ignored() {
        let html = r#"<section id="business-info"><dl>
            <dt>Hours</dt><dd>9-5</dd>
            <dt>Address</dt>
        </dl></section>"#;
        assert_eq!(run(html), fields("", ""));
    }
}
