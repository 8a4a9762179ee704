// Fingerprint: identifier-free dedup key for a selector.
//
// Area selectors hash to `p{page}:x1:y1:x2:y2` over the primary rect
// normalized by the capture-time page size (4 decimals), so the key does
// not move with zoom. When the page size is unknown the pixel rect is used
// instead, rounded to 2 decimals (`p{page}:px:x1:y1:x2:y2`).
//
// Quote selectors hash the fixed tuple `(exact, prefix, suffix)` with
// SHA-256; each field is length-prefixed so field boundaries cannot shift.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::geometry::{NormalizedRect, PageSize, Rect};
use crate::types::Selector;

/// Two area fingerprints on the same page match when every normalized
/// coordinate differs by less than this.
pub const MATCH_TOLERANCE: f64 = 0.01;
/// Slack for the 4-decimal rounding applied on both sides.
const ROUNDING_SLACK: f64 = 1e-4;
const QUOTE_DIGEST_HEX_CHARS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn for_selector(selector: &Selector) -> Self {
        match selector {
            Selector::TextQuote { exact, prefix, suffix } => Self::for_quote(exact, prefix, suffix),
            Selector::PdfArea { page, primary_rect, page_width, page_height, .. } => {
                let page_size = PageSize::new(*page_width, *page_height);
                if page_size.is_valid() {
                    Self::for_area(*page, &primary_rect.normalize(page_size))
                } else {
                    Self::for_pixel_area(*page, primary_rect)
                }
            }
        }
    }

    pub fn for_area(page: u32, rect: &NormalizedRect) -> Self {
        Self(format!(
            "p{page}:{:.4}:{:.4}:{:.4}:{:.4}",
            round_to(rect.x1, 4),
            round_to(rect.y1, 4),
            round_to(rect.x2, 4),
            round_to(rect.y2, 4)
        ))
    }

    pub fn for_pixel_area(page: u32, rect: &Rect) -> Self {
        Self(format!(
            "p{page}:px:{:.2}:{:.2}:{:.2}:{:.2}",
            round_to(rect.x1, 2),
            round_to(rect.y1, 2),
            round_to(rect.x2, 2),
            round_to(rect.y2, 2)
        ))
    }

    pub fn for_quote(exact: &str, prefix: &str, suffix: &str) -> Self {
        let mut hasher = Sha256::new();
        for field in [exact, prefix, suffix] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        let digest = hex_encode(&hasher.finalize());
        Self(format!("q:{}", &digest[..QUOTE_DIGEST_HEX_CHARS]))
    }

    /// Reconstruct from a stored key without validation.
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Page and normalized rect for a normalized area fingerprint.
    pub fn area(&self) -> Option<(u32, NormalizedRect)> {
        let rest = self.0.strip_prefix('p')?;
        let mut parts = rest.split(':');
        let page = parts.next()?.parse().ok()?;
        let coords: Vec<f64> =
            parts.map(|part| part.parse::<f64>()).collect::<Result<_, _>>().ok()?;
        match coords.as_slice() {
            [x1, y1, x2, y2] => Some((page, NormalizedRect::new(*x1, *y1, *x2, *y2))),
            _ => None,
        }
    }

    /// Same candidate highlight? Exact key equality, or for normalized area
    /// keys on the same page, every coordinate within `MATCH_TOLERANCE`.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        if self == other {
            return true;
        }
        match (self.area(), other.area()) {
            (Some((page_a, a)), Some((page_b, b))) if page_a == page_b => {
                let limit = MATCH_TOLERANCE + ROUNDING_SLACK;
                (a.x1 - b.x1).abs() < limit
                    && (a.y1 - b.y1).abs() < limit
                    && (a.x2 - b.x2).abs() < limit
                    && (a.y2 - b.y2).abs() < limit
            }
            _ => false,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    // `+ 0.0` folds negative zero so keys never render as "-0.0000".
    (value * factor).round() / factor + 0.0
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(page: u32, x1: f64, y1: f64, x2: f64, y2: f64) -> Selector {
        Selector::PdfArea {
            page,
            text: "Effect size is modest".into(),
            primary_rect: Rect::from_corners(x1, y1, x2, y2),
            rects: vec![Rect::from_corners(x1, y1, x2, y2)],
            page_width: 1000.0,
            page_height: 1000.0,
        }
    }

    #[test]
    fn area_fingerprint_uses_normalized_primary_rect() {
        let fp = Fingerprint::for_selector(&area(3, 100.0, 200.0, 300.0, 220.0));
        assert_eq!(fp.as_str(), "p3:0.1000:0.2000:0.3000:0.2200");
    }

    #[test]
    fn area_fingerprint_is_zoom_independent() {
        let at_one = area(1, 100.0, 200.0, 300.0, 220.0);
        let at_two = Selector::PdfArea {
            page: 1,
            text: "Effect size is modest".into(),
            primary_rect: Rect::from_corners(200.0, 400.0, 600.0, 440.0),
            rects: vec![],
            page_width: 2000.0,
            page_height: 2000.0,
        };
        assert_eq!(at_one.fingerprint(), at_two.fingerprint());
    }

    #[test]
    fn pixel_fallback_when_page_size_unknown() {
        let selector = Selector::PdfArea {
            page: 2,
            text: "x".into(),
            primary_rect: Rect::from_corners(10.004, 20.0, 30.0, 40.126),
            rects: vec![],
            page_width: 0.0,
            page_height: 0.0,
        };
        assert_eq!(selector.fingerprint().as_str(), "p2:px:10.00:20.00:30.00:40.13");
        assert!(selector.fingerprint().area().is_none());
    }

    #[test]
    fn slightly_shifted_capture_still_matches() {
        let a = Fingerprint::for_selector(&area(4, 100.0, 200.0, 300.0, 220.0));
        let b = Fingerprint::for_selector(&area(4, 104.0, 196.0, 309.0, 229.0));
        assert_ne!(a, b);
        assert!(a.matches(&b));
    }

    #[test]
    fn different_page_or_distant_rect_does_not_match() {
        let a = Fingerprint::for_selector(&area(4, 100.0, 200.0, 300.0, 220.0));
        let other_page = Fingerprint::for_selector(&area(5, 100.0, 200.0, 300.0, 220.0));
        let next_line = Fingerprint::for_selector(&area(4, 100.0, 230.0, 300.0, 250.0));
        assert!(!a.matches(&other_page));
        assert!(!a.matches(&next_line));
    }

    #[test]
    fn quote_fingerprint_depends_on_every_field() {
        let base = Fingerprint::for_quote("modest", "Effect size is ", ".");
        assert_eq!(base, Fingerprint::for_quote("modest", "Effect size is ", "."));
        assert_ne!(base, Fingerprint::for_quote("modest", "Effect size is", " ."));
        assert_ne!(base, Fingerprint::for_quote("modest", "", "Effect size is ."));
        assert!(base.as_str().starts_with("q:"));
        assert_eq!(base.as_str().len(), 2 + QUOTE_DIGEST_HEX_CHARS);
    }

    #[test]
    fn quote_fingerprints_never_tolerance_match() {
        let a = Fingerprint::for_quote("a", "", "");
        let b = Fingerprint::for_quote("b", "", "");
        assert!(!a.matches(&b));
    }
}
