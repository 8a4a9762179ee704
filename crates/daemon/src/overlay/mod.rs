// Overlay engine: per-viewer highlight marks for one paginated document.
//
// Marks are stored in page-normalized space and painted by multiplying by
// the page viewport at the current scale, so zooming never drifts them.
// Marks for a page whose viewport is not known yet are queued and flushed
// when it arrives.

pub mod mark;

use std::collections::BTreeMap;

use annotator_common::geometry::PageSize;
use annotator_common::ids::{HighlightId, LocalId};
use annotator_common::protocol::messages::{HighlightRef, PdfMarkCancelled};
use annotator_common::protocol::Message;
use annotator_common::types::document_key;
use tracing::{debug, warn};

pub use mark::{MarkColor, MarkQuery, OverlayMark, PaintedRect, ORIGIN_EPSILON};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Appended,
    Updated,
    /// Page viewport unknown; held until it is set.
    Queued,
}

#[derive(Debug, Default)]
struct PageLayer {
    /// Page size at scale 1.0.
    viewport: Option<PageSize>,
    marks: Vec<OverlayMark>,
    pending: Vec<OverlayMark>,
}

#[derive(Debug)]
pub struct OverlayEngine {
    document_url: String,
    scale: f64,
    pages: BTreeMap<u32, PageLayer>,
}

impl OverlayEngine {
    pub fn new(document_url: &str) -> Self {
        Self { document_url: document_key(document_url), scale: 1.0, pages: BTreeMap::new() }
    }

    pub fn document_url(&self) -> &str {
        &self.document_url
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f64) {
        if !scale.is_finite() || scale <= 0.0 {
            warn!(scale, "ignoring invalid overlay scale");
            return;
        }
        self.scale = scale;
    }

    /// Record the unscaled size of `page` and flush its queued marks.
    /// Returns how many were flushed.
    pub fn set_page_viewport(&mut self, page: u32, size: PageSize) -> usize {
        if !size.is_valid() {
            warn!(page, width = size.width, height = size.height, "ignoring invalid page viewport");
            return 0;
        }
        let layer = self.pages.entry(page).or_default();
        layer.viewport = Some(size);
        let pending = std::mem::take(&mut layer.pending);
        let flushed = pending.len();
        for mark in pending {
            Self::insert(layer, mark);
        }
        if flushed > 0 {
            debug!(page, flushed, "flushed queued overlay marks");
        }
        flushed
    }

    pub fn marks(&self, page: u32) -> &[OverlayMark] {
        self.pages.get(&page).map(|layer| layer.marks.as_slice()).unwrap_or(&[])
    }

    pub fn pending(&self, page: u32) -> usize {
        self.pages.get(&page).map_or(0, |layer| layer.pending.len())
    }

    pub fn mark_count(&self) -> usize {
        self.pages.values().map(|layer| layer.marks.len() + layer.pending.len()).sum()
    }

    // ── Mutation ───────────────────────────────────────────────────

    /// Insert or update by identifier hierarchy; last write wins.
    pub fn upsert(&mut self, mark: OverlayMark) -> UpsertOutcome {
        let layer = self.pages.entry(mark.page).or_default();
        if layer.viewport.is_none() {
            let found = mark.query().position(&layer.pending);
            match found {
                Some(index) => layer.pending[index].merge(mark),
                None => layer.pending.push(mark),
            }
            return UpsertOutcome::Queued;
        }
        Self::insert(layer, mark)
    }

    fn insert(layer: &mut PageLayer, mark: OverlayMark) -> UpsertOutcome {
        let found = mark.query().position(&layer.marks);
        match found {
            Some(index) => {
                layer.marks[index].merge(mark);
                UpsertOutcome::Updated
            }
            None => {
                layer.marks.push(mark);
                UpsertOutcome::Appended
            }
        }
    }

    pub fn locate(&self, query: &MarkQuery<'_>) -> Option<&OverlayMark> {
        self.pages.values().find_map(|layer| {
            query
                .position(&layer.marks)
                .map(|index| &layer.marks[index])
                .or_else(|| query.position(&layer.pending).map(|index| &layer.pending[index]))
        })
    }

    fn locate_mut(&mut self, query: &MarkQuery<'_>) -> Option<&mut OverlayMark> {
        self.pages.values_mut().find_map(|layer| {
            if let Some(index) = query.position(&layer.marks) {
                return layer.marks.get_mut(index);
            }
            let index = query.position(&layer.pending)?;
            layer.pending.get_mut(index)
        })
    }

    pub fn remove(&mut self, query: &MarkQuery<'_>) -> Option<OverlayMark> {
        self.pages.values_mut().find_map(|layer| {
            if let Some(index) = query.position(&layer.marks) {
                return Some(layer.marks.remove(index));
            }
            let index = query.position(&layer.pending)?;
            Some(layer.pending.remove(index))
        })
    }

    fn attach_highlight_id(&mut self, local_id: &LocalId, highlight_id: &HighlightId) -> bool {
        match self.locate_mut(&MarkQuery::by_ids(Some(local_id), None)) {
            Some(mark) => {
                mark.highlight_id = Some(highlight_id.clone());
                true
            }
            None => false,
        }
    }

    fn cancel(&mut self, cancelled: &PdfMarkCancelled) -> bool {
        let Some(layer) = self.pages.get_mut(&cancelled.page) else {
            return false;
        };
        // Confirmed marks are never cancelled.
        let matches = |mark: &OverlayMark| {
            mark.highlight_id.is_none()
                && match &cancelled.local_id {
                    Some(local_id) => mark.local_id.as_ref() == Some(local_id),
                    None => {
                        mark.local_id.is_none()
                            && mark.fingerprint.matches(&cancelled.fingerprint)
                    }
                }
        };
        let before = layer.marks.len() + layer.pending.len();
        layer.marks.retain(|mark| !matches(mark));
        layer.pending.retain(|mark| !matches(mark));
        layer.marks.len() + layer.pending.len() != before
    }

    fn rerank(&mut self, order: &[HighlightId]) {
        for layer in self.pages.values_mut() {
            for mark in layer.marks.iter_mut().chain(layer.pending.iter_mut()) {
                mark.rank = mark
                    .highlight_id
                    .as_ref()
                    .and_then(|id| order.iter().position(|ordered| ordered == id));
            }
        }
    }

    // ── Rendering ──────────────────────────────────────────────────

    /// Pixel rects for `page` at the current scale; empty until its
    /// viewport is known.
    pub fn render_page(&self, page: u32) -> Vec<PaintedRect> {
        let Some(layer) = self.pages.get(&page) else {
            return Vec::new();
        };
        let Some(viewport) = layer.viewport else {
            return Vec::new();
        };
        let size = viewport.scaled(self.scale);
        layer
            .marks
            .iter()
            .map(|mark| PaintedRect {
                rect: mark.rect.denormalize(size),
                color: mark.color(),
                local_id: mark.local_id.clone(),
                highlight_id: mark.highlight_id.clone(),
                rank: mark.rank,
            })
            .collect()
    }

    /// Identifiers of the topmost mark under pixel `(x, y)` at the current scale.
    pub fn hit_test(&self, page: u32, x: f64, y: f64) -> Option<HighlightRef> {
        let layer = self.pages.get(&page)?;
        let size = layer.viewport?.scaled(self.scale);
        let (nx, ny) = (x / size.width, y / size.height);
        layer.marks.iter().rev().find(|mark| mark.rect.contains(nx, ny)).map(|mark| HighlightRef {
            local_id: mark.local_id.clone(),
            highlight_id: mark.highlight_id.clone(),
            document_url: self.document_url.clone(),
        })
    }

    /// A click on a mark asks the control panel to remove it.
    pub fn click(&self, page: u32, x: f64, y: f64) -> Option<Message> {
        self.hit_test(page, x, y).map(Message::HighlightRemoveRequested)
    }

    // ── Messages ───────────────────────────────────────────────────

    /// Apply a broadcast. Returns whether any mark changed.
    pub fn apply(&mut self, message: &Message) -> bool {
        match message.document_url() {
            Some(url) if document_key(url) == self.document_url => {}
            _ => return false,
        }
        match message {
            Message::PdfMarkCreated(created) => {
                self.upsert(OverlayMark::from(created));
                true
            }
            Message::PdfMarkCancelled(cancelled) => self.cancel(cancelled),
            Message::HighlightConfirmed(confirmed) => {
                self.attach_highlight_id(&confirmed.local_id, &confirmed.highlight_id)
            }
            Message::HighlightSaveFailed(failed) => {
                self.remove(&MarkQuery::by_ids(Some(&failed.local_id), None)).is_some()
            }
            Message::HighlightRemoved(removed) => {
                if removed.is_empty() {
                    return false;
                }
                let query =
                    MarkQuery::by_ids(removed.local_id.as_ref(), removed.highlight_id.as_ref());
                self.remove(&query).is_some()
            }
            Message::DocumentReviewSaved(saved) => {
                self.rerank(&saved.review.highlight_order);
                true
            }
            _ => false,
        }
    }
}
