//! Selector-driven field extraction.
//!
//! Projects a fetched page into named fields. Each field is an independent
//! [`ExtractedValue`]; a broken selector only poisons its own field.

pub mod selector;

pub use selector::{ExtractMode, SelectorSpec, SelectorSyntaxError};

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::external_deps::provider::PageHandle;

/// Result of evaluating one selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedValue {
    Text(Vec<String>),
    Html(Vec<String>),
    Attribute(Vec<Option<String>>),
    AttrMap(Vec<BTreeMap<String, Option<String>>>),
    Error(String),
}

impl ExtractedValue {
    /// Number of matches, zero for errors.
    pub fn len(&self) -> usize {
        match self {
            ExtractedValue::Text(values) | ExtractedValue::Html(values) => values.len(),
            ExtractedValue::Attribute(values) => values.len(),
            ExtractedValue::AttrMap(values) => values.len(),
            ExtractedValue::Error(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExtractedValue::Error(_))
    }
}

/// Values serialise as bare lists; errors as `{"error": "..."}`.
impl Serialize for ExtractedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExtractedValue::Text(values) | ExtractedValue::Html(values) => {
                values.serialize(serializer)
            }
            ExtractedValue::Attribute(values) => values.serialize(serializer),
            ExtractedValue::AttrMap(values) => values.serialize(serializer),
            ExtractedValue::Error(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", message)?;
                map.end()
            }
        }
    }
}

/// Evaluates every `name -> selector` pair against `page`.
pub fn extract<P, K, V>(page: &P, specs: impl IntoIterator<Item = (K, V)>) -> BTreeMap<String, ExtractedValue>
where
    P: PageHandle + ?Sized,
    K: Into<String>,
    V: AsRef<str>,
{
    specs
        .into_iter()
        .map(|(name, raw)| (name.into(), evaluate(page, raw.as_ref())))
        .collect()
}

/// Evaluates one raw selector.
pub fn evaluate<P: PageHandle + ?Sized>(page: &P, raw: &str) -> ExtractedValue {
    let spec = match raw.parse::<SelectorSpec>() {
        Ok(spec) => spec,
        Err(err) => return ExtractedValue::Error(err.to_string()),
    };
    let elements = match page.query(spec.css()) {
        Ok(elements) => elements,
        Err(err) => return ExtractedValue::Error(err.to_string()),
    };

    match spec.mode() {
        ExtractMode::Text => {
            ExtractedValue::Text(elements.iter().map(|el| el.text().trim().to_string()).collect())
        }
        ExtractMode::Html => ExtractedValue::Html(elements.iter().map(|el| el.html()).collect()),
        ExtractMode::Attribute(attr) => {
            ExtractedValue::Attribute(elements.iter().map(|el| el.attribute(attr)).collect())
        }
        ExtractMode::Attributes(attrs) => ExtractedValue::AttrMap(
            elements
                .iter()
                .map(|el| {
                    attrs
                        .iter()
                        .map(|attr| (attr.clone(), el.attribute(attr)))
                        .collect()
                })
                .collect(),
        ),
    }
}

/// Text of the first `<title>`, trimmed.
pub fn page_title<P: PageHandle + ?Sized>(page: &P) -> Option<String> {
    page.query("title")
        .ok()?
        .first()
        .map(|el| el.text().trim().to_string())
        .filter(|title| !title.is_empty())
}

/// Body text with runs of whitespace collapsed.
pub fn page_text<P: PageHandle + ?Sized>(page: &P) -> String {
    page.query("body")
        .ok()
        .and_then(|elements| elements.first().map(|el| el.text()))
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_deps::provider::HtmlPage;
    use url::Url;

    const FIXTURE: &str = r#"<html><head><title> Catalog </title></head><body>
        <h1>Products</h1>
        <a href="/one" class="p">One</a>
        <a class="p">Two</a>
        <a href="/three" class="p" title="third">Three</a>
        <div id="desc"><p>Hello <em>world</em></p></div>
    </body></html>"#;

    fn page() -> HtmlPage {
        HtmlPage::from_html(Url::parse("https://shop.example.com/").unwrap(), 200, FIXTURE)
    }

    #[test]
    fn attribute_values_follow_document_order() {
        let value = evaluate(&page(), "a@href");
        assert_eq!(
            value,
            ExtractedValue::Attribute(vec![Some("/one".into()), None, Some("/three".into())])
        );
    }

    #[test]
    fn unmatched_selector_is_empty_not_error() {
        let value = evaluate(&page(), ".nonexistent");
        assert_eq!(value, ExtractedValue::Text(vec![]));
        assert!(value.is_empty());
        assert!(!value.is_error());
    }

    #[test]
    fn evaluates_each_mode() {
        let fields = extract(
            &page(),
            [
                ("heading", "h1"),
                ("desc", "#desc::html"),
                ("links", "a@href@title"),
                ("broken", "a@@"),
                ("invalid", "div[[["),
            ],
        );
        assert_eq!(fields["heading"], ExtractedValue::Text(vec!["Products".into()]));
        assert_eq!(
            fields["desc"],
            ExtractedValue::Html(vec!["<p>Hello <em>world</em></p>".into()])
        );
        match &fields["links"] {
            ExtractedValue::AttrMap(rows) => {
                assert_eq!(rows.len(), 3);
                assert_eq!(rows[2]["title"].as_deref(), Some("third"));
                assert_eq!(rows[1]["href"], None);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(fields["broken"].is_error());
        assert!(fields["invalid"].is_error());
    }

    #[test]
    fn serialises_values_as_lists() {
        let json = serde_json::to_value(evaluate(&page(), "a@href")).unwrap();
        assert_eq!(json, serde_json::json!(["/one", null, "/three"]));
        let json = serde_json::to_value(ExtractedValue::Error("bad".into())).unwrap();
        assert_eq!(json, serde_json::json!({"error": "bad"}));
    }

    #[test]
    fn title_and_text_helpers() {
        let page = page();
        assert_eq!(page_title(&page).as_deref(), Some("Catalog"));
        let text = page_text(&page);
        assert!(text.starts_with("Products One Two Three"));
        assert!(text.ends_with("Hello world"));
    }
}
