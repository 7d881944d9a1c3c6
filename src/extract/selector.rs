//! Selector suffix grammar.
//!
//! ```text
//! spec  := css [ "::html" | ( "@" attr )+ ]
//! ```
//!
//! `@` characters inside `[...]` or quotes belong to the CSS part, so
//! `a[href*="@"]@href` is the selector `a[href*="@"]` with attribute `href`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const HTML_SUFFIX: &str = "::html";

/// What to read from each matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractMode {
    Text,
    Html,
    Attribute(String),
    Attributes(Vec<String>),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorSyntaxError {
    #[error("selector is empty")]
    EmptyCss,
    #[error("empty attribute name in '{0}'")]
    EmptyAttribute(String),
}

/// A parsed `css[::html|@attr...]` selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorSpec {
    css: String,
    mode: ExtractMode,
}

impl SelectorSpec {
    pub fn css(&self) -> &str {
        &self.css
    }

    pub fn mode(&self) -> &ExtractMode {
        &self.mode
    }
}

impl FromStr for SelectorSpec {
    type Err = SelectorSyntaxError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();

        if let Some(css) = raw.strip_suffix(HTML_SUFFIX) {
            let css = css.trim();
            if css.is_empty() {
                return Err(SelectorSyntaxError::EmptyCss);
            }
            return Ok(SelectorSpec {
                css: css.to_string(),
                mode: ExtractMode::Html,
            });
        }

        let mut parts = split_top_level(raw, '@').into_iter();
        let css = parts.next().unwrap_or_default().trim();
        if css.is_empty() {
            return Err(SelectorSyntaxError::EmptyCss);
        }

        let mut attrs = Vec::new();
        for attr in parts {
            let attr = attr.trim();
            if attr.is_empty() {
                return Err(SelectorSyntaxError::EmptyAttribute(raw.to_string()));
            }
            attrs.push(attr.to_string());
        }

        let mode = match attrs.len() {
            0 => ExtractMode::Text,
            1 => ExtractMode::Attribute(attrs.remove(0)),
            _ => ExtractMode::Attributes(attrs),
        };
        Ok(SelectorSpec {
            css: css.to_string(),
            mode,
        })
    }
}

impl fmt::Display for SelectorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.css)?;
        match &self.mode {
            ExtractMode::Text => Ok(()),
            ExtractMode::Html => f.write_str(HTML_SUFFIX),
            ExtractMode::Attribute(attr) => write!(f, "@{attr}"),
            ExtractMode::Attributes(attrs) => attrs.iter().try_for_each(|attr| write!(f, "@{attr}")),
        }
    }
}

/// Splits on `sep` outside brackets, parentheses and quotes.
fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, ch) in input.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                '[' | '(' => depth += 1,
                ']' | ')' => depth = depth.saturating_sub(1),
                c if c == sep && depth == 0 => {
                    parts.push(&input[start..idx]);
                    start = idx + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    parts.push(&input[start..]);
    parts
}
