// Selector builder: raw selections in, location-independent selectors out.
//
// Flat pages produce a `TextQuote` whose prefix/suffix are bounded,
// whitespace-collapsed context strings. Paginated surfaces produce a
// `PdfArea` whose rects are page-local (client rect minus page origin).
// Construction is pure: the same input always yields the same selector.

use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::geometry::Rect;
use crate::types::{Selector, ValidationError};

/// Default number of context characters kept on each side of a quote.
pub const DEFAULT_CONTEXT_CHARS: usize = 32;

/// A text range captured on a flat page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    #[serde(default)]
    pub text_before: String,
    pub exact: String,
    #[serde(default)]
    pub text_after: String,
}

/// Rectangle in viewport coordinates, as reported by the render surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ClientRect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }

    fn to_page_local(self, page_box: &ClientRect) -> Rect {
        Rect::from_corners(
            self.left - page_box.left,
            self.top - page_box.top,
            self.left - page_box.left + self.width,
            self.top - page_box.top + self.height,
        )
    }
}

/// A selection made on one page of a paginated surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSelection {
    pub page: u32,
    /// Bounding box of the page element in viewport coordinates.
    pub page_box: ClientRect,
    pub client_rects: Vec<ClientRect>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct SelectorBuilder {
    context_chars: usize,
}

impl Default for SelectorBuilder {
    fn default() -> Self {
        Self { context_chars: DEFAULT_CONTEXT_CHARS }
    }
}

impl SelectorBuilder {
    pub fn new(context_chars: usize) -> Self {
        Self { context_chars }
    }

    pub fn context_chars(&self) -> usize {
        self.context_chars
    }

    /// Build a `TextQuote` selector for a flat-page range.
    pub fn quote(&self, range: &TextRange) -> Result<Selector, ValidationError> {
        let exact = collapse_whitespace(&range.exact, true);
        if exact.is_empty() {
            return Err(ValidationError::EmptyText);
        }

        let before = collapse_whitespace(&range.text_before, false);
        let after = collapse_whitespace(&range.text_after, false);
        let prefix = last_chars(&before, self.context_chars);
        let suffix = first_chars(&after, self.context_chars);

        Ok(Selector::TextQuote { exact, prefix, suffix })
    }

    /// Build a `PdfArea` selector for a selection on a rendered page.
    pub fn area(&self, selection: &PageSelection) -> Result<Selector, ValidationError> {
        let text = collapse_whitespace(&selection.text, true);
        if text.is_empty() {
            return Err(ValidationError::EmptyText);
        }

        let page_box = selection.page_box;
        if !(page_box.width > 0.0 && page_box.height > 0.0) {
            return Err(ValidationError::InvalidPageBox {
                width: page_box.width,
                height: page_box.height,
            });
        }

        let rects: Vec<Rect> = selection
            .client_rects
            .iter()
            .map(|rect| rect.to_page_local(&page_box))
            .filter(|rect| !rect.is_empty())
            .collect();
        let primary_rect = Rect::bounding(&rects).ok_or(ValidationError::NoRects)?;

        Ok(Selector::PdfArea {
            page: selection.page,
            text,
            primary_rect,
            rects,
            page_width: page_box.width,
            page_height: page_box.height,
        })
    }
}

/// Signature of a selection, used to drop repeated selection events fired
/// for an unchanged range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectionSignature(String);

impl SelectionSignature {
    pub fn of(selector: &Selector) -> Self {
        match selector {
            Selector::TextQuote { exact, prefix, suffix } => {
                Self(format!("quote|{exact}|{prefix}|{suffix}"))
            }
            Selector::PdfArea { page, text, primary_rect, .. } => Self(format!(
                "area|{text}|{page}|{:.2}:{:.2}:{:.2}:{:.2}",
                primary_rect.x1, primary_rect.y1, primary_rect.x2, primary_rect.y2
            )),
        }
    }
}

impl fmt::Display for SelectionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// NFC-normalize and collapse whitespace runs to a single space. With
/// `trim`, leading and trailing whitespace is dropped entirely.
pub fn collapse_whitespace(input: &str, trim: bool) -> String {
    let normalized: String = input.nfc().collect();
    let mut out = String::with_capacity(normalized.len());
    let mut in_space = false;
    for ch in normalized.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    if trim {
        out.trim().to_string()
    } else {
        out
    }
}

fn last_chars(input: &str, count: usize) -> String {
    let total = input.chars().count();
    input.chars().skip(total.saturating_sub(count)).collect()
}

fn first_chars(input: &str, count: usize) -> String {
    input.chars().take(count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(before: &str, exact: &str, after: &str) -> TextRange {
        TextRange { text_before: before.into(), exact: exact.into(), text_after: after.into() }
    }

    #[test]
    fn quote_collapses_whitespace_and_bounds_context() {
        let builder = SelectorBuilder::new(10);
        let selector = builder
            .quote(&range(
                "In the\n\n  results section we find that  ",
                "  Effect size\tis modest ",
                "  across all   cohorts studied.",
            ))
            .unwrap();

        match selector {
            Selector::TextQuote { exact, prefix, suffix } => {
                assert_eq!(exact, "Effect size is modest");
                assert_eq!(prefix, "find that ");
                assert_eq!(suffix, " across al");
            }
            other => panic!("expected quote selector, got {other:?}"),
        }
    }

    #[test]
    fn quote_rejects_whitespace_only_selection() {
        let builder = SelectorBuilder::default();
        assert_eq!(builder.quote(&range("a", " \n\t ", "b")), Err(ValidationError::EmptyText));
    }

    #[test]
    fn context_bounding_counts_chars_not_bytes() {
        let builder = SelectorBuilder::new(3);
        let selector = builder.quote(&range("naïve café", "x", "élan")).unwrap();
        match selector {
            Selector::TextQuote { prefix, suffix, .. } => {
                assert_eq!(prefix, "afé");
                assert_eq!(suffix, "éla");
            }
            other => panic!("expected quote selector, got {other:?}"),
        }
    }

    #[test]
    fn area_converts_client_rects_to_page_local() {
        let builder = SelectorBuilder::default();
        let selection = PageSelection {
            page: 3,
            page_box: ClientRect::new(50.0, 1000.0, 612.0, 792.0),
            client_rects: vec![
                ClientRect::new(150.0, 1200.0, 200.0, 20.0),
                ClientRect::new(150.0, 1222.0, 120.0, 20.0),
                ClientRect::new(160.0, 1230.0, 0.0, 0.0),
            ],
            text: "Effect size\nis modest".into(),
        };

        match builder.area(&selection).unwrap() {
            Selector::PdfArea { page, text, primary_rect, rects, page_width, page_height } => {
                assert_eq!(page, 3);
                assert_eq!(text, "Effect size is modest");
                assert_eq!(rects.len(), 2);
                assert_eq!(
                    (rects[0].x1, rects[0].y1, rects[0].x2, rects[0].y2),
                    (100.0, 200.0, 300.0, 220.0)
                );
                assert_eq!((primary_rect.x1, primary_rect.y1), (100.0, 200.0));
                assert_eq!((primary_rect.x2, primary_rect.y2), (300.0, 242.0));
                assert_eq!((page_width, page_height), (612.0, 792.0));
            }
            other => panic!("expected area selector, got {other:?}"),
        }
    }

    #[test]
    fn area_without_visible_rects_is_rejected() {
        let builder = SelectorBuilder::default();
        let selection = PageSelection {
            page: 1,
            page_box: ClientRect::new(0.0, 0.0, 600.0, 800.0),
            client_rects: vec![ClientRect::new(10.0, 10.0, 0.0, 12.0)],
            text: "caption".into(),
        };
        assert_eq!(builder.area(&selection), Err(ValidationError::NoRects));
    }

    #[test]
    fn rebuilding_yields_identical_signature_and_fingerprint() {
        let builder = SelectorBuilder::default();
        let input = range("The trial found ", "Effect size is modest", " overall.");
        let first = builder.quote(&input).unwrap();
        let second = builder.quote(&input).unwrap();
        assert_eq!(SelectionSignature::of(&first), SelectionSignature::of(&second));
        assert_eq!(first.fingerprint(), second.fingerprint());
    }
}
