// Reviewer-defined highlight order for paginated documents.

use std::collections::{HashMap, HashSet};

use annotator_common::ids::HighlightId;
use annotator_common::types::Highlight;

/// Drop repeated ids, keeping first occurrences.
pub fn dedupe_order(order: &[HighlightId]) -> Vec<HighlightId> {
    let mut seen = HashSet::new();
    order.iter().filter(|id| seen.insert(*id)).cloned().collect()
}

/// Explicitly ordered highlights first, in that order; everything else
/// after, in insertion (`created_at`) order.
pub fn order_highlights(highlights: &mut [Highlight], order: &[HighlightId]) {
    let rank: HashMap<&HighlightId, usize> =
        order.iter().enumerate().map(|(index, id)| (id, index)).collect();
    let mut keyed: Vec<(usize, Highlight)> = highlights
        .iter()
        .map(|highlight| {
            let position = highlight
                .highlight_id
                .as_ref()
                .and_then(|id| rank.get(id).copied())
                .unwrap_or(usize::MAX);
            (position, highlight.clone())
        })
        .collect();
    // Unranked highlights tie on position; creation time orders them, and
    // the stable sort keeps equal timestamps as they were.
    keyed.sort_by_key(|(position, highlight)| (*position, highlight.created_at));
    for (slot, (_, highlight)) in highlights.iter_mut().zip(keyed) {
        *slot = highlight;
    }
}

#[cfg(test)]
mod tests {
    use annotator_common::ids::LocalId;
    use annotator_common::types::{HighlightState, Selector, Sentiment};
    use chrono::{Duration, Utc};

    use super::*;

    fn highlight(id: &str) -> Highlight {
        let selector =
            Selector::TextQuote { exact: id.into(), prefix: String::new(), suffix: String::new() };
        Highlight {
            local_id: LocalId::new(format!("local-{id}")),
            highlight_id: Some(HighlightId::new(id)),
            sentiment: Sentiment::Neutral,
            text: id.into(),
            fingerprint: selector.fingerprint(),
            selector,
            context: None,
            judgment: None,
            ai_suggestions: Vec::new(),
            state: HighlightState::Confirmed,
            created_at: Utc::now(),
        }
    }

    fn ids(highlights: &[Highlight]) -> Vec<&str> {
        highlights.iter().filter_map(|h| h.highlight_id.as_ref().map(HighlightId::as_str)).collect()
    }

    #[test]
    fn explicit_order_first_then_rest_in_insertion_order() {
        let mut highlights = vec![highlight("h1"), highlight("h2"), highlight("h3")];
        order_highlights(&mut highlights, &[HighlightId::new("h2"), HighlightId::new("h1")]);
        assert_eq!(ids(&highlights), vec!["h2", "h1", "h3"]);
    }

    #[test]
    fn unranked_highlights_return_to_insertion_order_after_reordering() {
        let base = Utc::now();
        let mut highlights: Vec<Highlight> = ["h1", "h2", "h3"]
            .into_iter()
            .enumerate()
            .map(|(index, id)| Highlight {
                created_at: base + Duration::seconds(index as i64),
                ..highlight(id)
            })
            .collect();
        order_highlights(&mut highlights, &[HighlightId::new("h3")]);
        assert_eq!(ids(&highlights), vec!["h3", "h1", "h2"]);
        order_highlights(&mut highlights, &[HighlightId::new("h2")]);
        assert_eq!(ids(&highlights), vec!["h2", "h1", "h3"]);
    }

    #[test]
    fn unknown_ids_in_order_are_ignored() {
        let mut highlights = vec![highlight("h1"), highlight("h2")];
        order_highlights(&mut highlights, &[HighlightId::new("gone"), HighlightId::new("h2")]);
        assert_eq!(ids(&highlights), vec!["h2", "h1"]);
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let order = ["h2", "h1", "h2", "h3", "h1"].map(HighlightId::new);
        let deduped = dedupe_order(&order);
        let deduped: Vec<&str> = deduped.iter().map(HighlightId::as_str).collect();
        assert_eq!(deduped, vec!["h2", "h1", "h3"]);
    }
}
