// Overlay marks and the identifier hierarchy used to match them.

use annotator_common::geometry::{NormalizedRect, Rect};
use annotator_common::ids::{HighlightId, LocalId};
use annotator_common::protocol::messages::PdfMarkCreated;
use annotator_common::selector::Fingerprint;
use annotator_common::types::Sentiment;

/// Origin tolerance when matching by local id with geometry.
pub const ORIGIN_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    Positive,
    Negative,
    Neutral,
    /// Not yet confirmed by the service.
    Provisional,
}

impl MarkColor {
    pub fn css(self) -> &'static str {
        match self {
            Self::Positive => "rgba(34, 197, 94, 0.35)",
            Self::Negative => "rgba(239, 68, 68, 0.35)",
            Self::Neutral => "rgba(250, 204, 21, 0.35)",
            Self::Provisional => "rgba(148, 163, 184, 0.35)",
        }
    }
}

/// A highlight mark in page-normalized space.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayMark {
    pub page: u32,
    pub rect: NormalizedRect,
    pub sentiment: Sentiment,
    pub fingerprint: Fingerprint,
    pub local_id: Option<LocalId>,
    pub highlight_id: Option<HighlightId>,
    /// Position in the reviewer's saved order, when ranked.
    pub rank: Option<usize>,
}

impl OverlayMark {
    pub fn color(&self) -> MarkColor {
        if self.highlight_id.is_none() {
            return MarkColor::Provisional;
        }
        match self.sentiment {
            Sentiment::Thumbsup => MarkColor::Positive,
            Sentiment::Thumbsdown => MarkColor::Negative,
            Sentiment::Neutral => MarkColor::Neutral,
        }
    }

    pub fn query(&self) -> MarkQuery<'_> {
        MarkQuery {
            highlight_id: self.highlight_id.as_ref(),
            local_id: self.local_id.as_ref(),
            rect: Some(&self.rect),
            fingerprint: Some(&self.fingerprint),
        }
    }

    /// Take newer geometry and sentiment, keeping identifiers the update lacks.
    pub(crate) fn merge(&mut self, newer: OverlayMark) {
        self.page = newer.page;
        self.rect = newer.rect;
        self.sentiment = newer.sentiment;
        self.fingerprint = newer.fingerprint;
        if newer.local_id.is_some() {
            self.local_id = newer.local_id;
        }
        if newer.highlight_id.is_some() {
            self.highlight_id = newer.highlight_id;
        }
        if newer.rank.is_some() {
            self.rank = newer.rank;
        }
    }
}

impl From<&PdfMarkCreated> for OverlayMark {
    fn from(created: &PdfMarkCreated) -> Self {
        Self {
            page: created.page,
            rect: created.rect,
            sentiment: created.sentiment,
            fingerprint: created.fingerprint.clone(),
            local_id: created.local_id.clone(),
            highlight_id: created.highlight_id.clone(),
            rank: None,
        }
    }
}

/// What is known about a mark being looked up. Any field may be absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkQuery<'a> {
    pub highlight_id: Option<&'a HighlightId>,
    pub local_id: Option<&'a LocalId>,
    pub rect: Option<&'a NormalizedRect>,
    pub fingerprint: Option<&'a Fingerprint>,
}

impl<'a> MarkQuery<'a> {
    pub fn by_ids(local_id: Option<&'a LocalId>, highlight_id: Option<&'a HighlightId>) -> Self {
        Self { highlight_id, local_id, ..Self::default() }
    }

    /// Index of the best match: highlight id, then local id, then fingerprint.
    pub fn position(&self, marks: &[OverlayMark]) -> Option<usize> {
        if let Some(wanted) = self.highlight_id {
            let found = marks.iter().position(|mark| mark.highlight_id.as_ref() == Some(wanted));
            if found.is_some() {
                return found;
            }
        }
        if let Some(wanted) = self.local_id {
            let found = marks.iter().position(|mark| {
                mark.local_id.as_ref() == Some(wanted)
                    && self
                        .rect
                        .map_or(true, |rect| mark.rect.origin_within(rect, ORIGIN_EPSILON))
            });
            if found.is_some() {
                return found;
            }
        }
        let wanted = self.fingerprint?;
        marks
            .iter()
            .position(|mark| !self.conflicts_with(mark) && mark.fingerprint.matches(wanted))
    }

    /// A mark carrying a different identifier is a different highlight, however
    /// close its geometry.
    fn conflicts_with(&self, mark: &OverlayMark) -> bool {
        let highlight = matches!(
            (self.highlight_id, mark.highlight_id.as_ref()),
            (Some(wanted), Some(held)) if wanted != held
        );
        let local = matches!(
            (self.local_id, mark.local_id.as_ref()),
            (Some(wanted), Some(held)) if wanted != held
        );
        highlight || local
    }
}

/// A mark denormalized for the current viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct PaintedRect {
    pub rect: Rect,
    pub color: MarkColor,
    pub local_id: Option<LocalId>,
    pub highlight_id: Option<HighlightId>,
    pub rank: Option<usize>,
}
