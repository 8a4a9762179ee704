use annotator_common::geometry::{NormalizedRect, PageSize, Rect};
use annotator_common::selector::Fingerprint;
use annotator_common::types::Selector;
use proptest::prelude::*;

fn area_selector(page: u32, rect: Rect, size: PageSize) -> Selector {
    Selector::PdfArea {
        page,
        text: "selected text".into(),
        primary_rect: rect,
        rects: vec![rect],
        page_width: size.width,
        page_height: size.height,
    }
}

/// A rect inside a page of `size`, built from unit fractions.
fn rect_on(size: PageSize, fractions: (f64, f64, f64, f64)) -> Rect {
    let (a, b, c, d) = fractions;
    Rect::from_corners(
        a.min(c) * size.width,
        b.min(d) * size.height,
        a.max(c) * size.width,
        b.max(d) * size.height,
    )
}

fn unit() -> impl Strategy<Value = f64> {
    0.0f64..=1.0
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn area_fingerprint_does_not_move_with_zoom(
        page in 1u32..500,
        width in 200.0f64..2000.0,
        height in 200.0f64..2000.0,
        fractions in (unit(), unit(), unit(), unit()),
        zoom_a in 0.25f64..4.0,
        zoom_b in 0.25f64..4.0,
    ) {
        let base = PageSize::new(width, height);
        let rect = rect_on(base, fractions);
        let at = |zoom: f64| {
            let size = base.scaled(zoom);
            let scaled = Rect::from_corners(
                rect.x1 * zoom,
                rect.y1 * zoom,
                rect.x2 * zoom,
                rect.y2 * zoom,
            );
            Fingerprint::for_selector(&area_selector(page, scaled, size))
        };
        let (a, b) = (at(zoom_a), at(zoom_b));
        prop_assert!(a.matches(&b), "{a} should match {b}");
        prop_assert!(b.matches(&a));
    }

    #[test]
    fn fingerprint_is_stable_for_the_same_selector(
        page in 1u32..500,
        fractions in (unit(), unit(), unit(), unit()),
    ) {
        let size = PageSize::new(612.0, 792.0);
        let selector = area_selector(page, rect_on(size, fractions), size);
        prop_assert_eq!(selector.fingerprint(), selector.clone().fingerprint());
        prop_assert!(selector.fingerprint().area().is_some());
    }

    #[test]
    fn fingerprints_on_different_pages_never_match(
        page in 1u32..500,
        fractions in (unit(), unit(), unit(), unit()),
    ) {
        let size = PageSize::new(612.0, 792.0);
        let rect = rect_on(size, fractions);
        let here = Fingerprint::for_selector(&area_selector(page, rect, size));
        let next = Fingerprint::for_selector(&area_selector(page + 1, rect, size));
        prop_assert!(!here.matches(&next));
    }

    #[test]
    fn normalized_rect_survives_any_viewport(
        fractions in (unit(), unit(), unit(), unit()),
        width in 100.0f64..4000.0,
        height in 100.0f64..4000.0,
    ) {
        let (a, b, c, d) = fractions;
        let rect = NormalizedRect::new(a.min(c), b.min(d), a.max(c), b.max(d));
        let size = PageSize::new(width, height);
        let back = NormalizedRect::from_pixels(&rect.denormalize(size), size);
        prop_assert!((back.x1 - rect.x1).abs() < 1e-9);
        prop_assert!((back.y1 - rect.y1).abs() < 1e-9);
        prop_assert!((back.x2 - rect.x2).abs() < 1e-9);
        prop_assert!((back.y2 - rect.y2).abs() < 1e-9);
    }

    #[test]
    fn quote_fields_cannot_shift_boundaries(
        head in "[a-z]{1,12}",
        tail in "[a-z]{1,12}",
    ) {
        let joined = format!("{head}{tail}");
        let merged = Fingerprint::for_quote(&joined, "", "");
        let split = Fingerprint::for_quote(&head, &tail, "");
        prop_assert_ne!(merged, split);
    }
}
