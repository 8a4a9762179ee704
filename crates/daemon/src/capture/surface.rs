// Render surface the capture agent paints marks onto.

use annotator_common::ids::{HighlightId, LocalId};
use annotator_common::selector::Fingerprint;
use annotator_common::types::{Selector, Sentiment};

/// A committed mark as the capture agent tracks it.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMark {
    pub local_id: LocalId,
    pub highlight_id: Option<HighlightId>,
    pub sentiment: Sentiment,
    pub selector: Selector,
    pub fingerprint: Fingerprint,
}

impl CaptureMark {
    pub fn matches(&self, local_id: Option<&LocalId>, highlight_id: Option<&HighlightId>) -> bool {
        if let (Some(wanted), Some(own)) = (highlight_id, self.highlight_id.as_ref()) {
            if wanted == own {
                return true;
            }
        }
        local_id.is_some_and(|wanted| wanted == &self.local_id)
    }
}

/// DOM (or PDF text layer) operations. Implementations must tolerate
/// calls for marks they no longer hold.
pub trait MarkSurface {
    fn apply_mark(&mut self, mark: &CaptureMark);
    fn unwrap_mark(&mut self, local_id: &LocalId);
    fn set_highlight_id(&mut self, local_id: &LocalId, highlight_id: &HighlightId);
    fn show_provisional(&mut self, selector: &Selector);
    fn clear_provisional(&mut self);
}

/// One painted element, as a DOM inspector would see it.
#[derive(Debug, Clone, PartialEq)]
pub struct PaintedMark {
    pub local_id: LocalId,
    pub highlight_id: Option<HighlightId>,
    pub sentiment: Sentiment,
    pub text: String,
}

/// Surface without a DOM: records what would have been painted.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    painted: Vec<PaintedMark>,
    provisional: Option<Selector>,
}

impl HeadlessSurface {
    pub fn painted(&self) -> &[PaintedMark] {
        &self.painted
    }

    pub fn provisional(&self) -> Option<&Selector> {
        self.provisional.as_ref()
    }

    /// Painted elements carrying `highlight_id`.
    pub fn count_with_highlight_id(&self, highlight_id: &HighlightId) -> usize {
        self.painted.iter().filter(|mark| mark.highlight_id.as_ref() == Some(highlight_id)).count()
    }
}

impl MarkSurface for HeadlessSurface {
    fn apply_mark(&mut self, mark: &CaptureMark) {
        self.painted.retain(|painted| painted.local_id != mark.local_id);
        self.painted.push(PaintedMark {
            local_id: mark.local_id.clone(),
            highlight_id: mark.highlight_id.clone(),
            sentiment: mark.sentiment,
            text: mark.selector.text().to_string(),
        });
    }

    fn unwrap_mark(&mut self, local_id: &LocalId) {
        self.painted.retain(|painted| &painted.local_id != local_id);
    }

    fn set_highlight_id(&mut self, local_id: &LocalId, highlight_id: &HighlightId) {
        if let Some(painted) = self.painted.iter_mut().find(|painted| &painted.local_id == local_id)
        {
            painted.highlight_id = Some(highlight_id.clone());
        }
    }

    fn show_provisional(&mut self, selector: &Selector) {
        self.provisional = Some(selector.clone());
    }

    fn clear_provisional(&mut self) {
        self.provisional = None;
    }
}
