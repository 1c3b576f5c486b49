//! End-to-end pipeline test over the in-memory stages: raw source payload
//! through the EV processor, aggregation and the change-detection gate,
//! plus the role-segmented serving views. No database or Redis required.

use chrono::{TimeZone, Utc};
use oddsedge_core::aggregate::{aggregate, offer_changed, StoredOffer};
use oddsedge_core::cache::OpportunityView;
use oddsedge_core::ev::EvProcessor;
use oddsedge_core::types::{
    BetParams, Book, MarketKind, OutcomeSide, RawEvent, RawMarket, RawQuote, Sport,
};
use uuid::Uuid;

fn quote(book: &str, odds: &str) -> RawQuote {
    RawQuote {
        book: book.to_string(),
        odds: odds.to_string(),
    }
}

fn sample_event() -> RawEvent {
    RawEvent {
        event_id: "nfl-001".to_string(),
        sport: Sport::NFL,
        league: Some("NFL".to_string()),
        event_name: "Jets @ Bills".to_string(),
        home_team: "Bills".to_string(),
        away_team: "Jets".to_string(),
        commence_time: Utc.with_ymd_and_hms(2025, 10, 12, 17, 0, 0).unwrap(),
        markets: vec![
            RawMarket {
                kind: MarketKind::Moneyline,
                description: "Moneyline".to_string(),
                params: BetParams::default(),
                side: OutcomeSide::Home,
                quotes: vec![
                    quote("pinnacle", "-115"),
                    quote("draftkings", "-110"),
                    quote("fanduel", "+100"),
                    quote("bovada", "+150"), // unsupported, dropped
                ],
                fair_odds: None,
            },
            RawMarket {
                kind: MarketKind::Spread,
                description: "Point Spread".to_string(),
                params: BetParams {
                    line: Some(-3.5),
                    player: None,
                },
                side: OutcomeSide::Away,
                quotes: vec![quote("betmgm", "EVEN"), quote("caesars", "-105")],
                fair_odds: None,
            },
        ],
    }
}

#[test]
fn full_cycle_produces_gated_candidates() {
    let processor = EvProcessor::default();
    let events = vec![sample_event()];

    let (opportunities, analytics) = processor.process(&events);
    assert_eq!(opportunities.len(), 2);
    assert_eq!(analytics.opportunity_count, 2);
    assert_eq!(analytics.dropped_books, 1);
    assert_eq!(analytics.parse_failures, 0);

    let cycle = Uuid::new_v4();
    let outcome = aggregate(opportunities, cycle);
    assert_eq!(outcome.candidates.len(), 2);
    assert_eq!(outcome.dropped_quotes, 1);

    // Candidates come out sorted by bet_id so chunked writes are stable
    let ids: Vec<&str> = outcome
        .candidates
        .iter()
        .map(|c| c.bet_id.as_str())
        .collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    for candidate in &outcome.candidates {
        assert_eq!(candidate.bet_id.len(), 32);
        assert_eq!(candidate.sha_key.len(), 32);
        assert_eq!(candidate.refresh_cycle_id, cycle);
        // Everything writes against an empty table
        assert!(offer_changed(None, candidate));
    }

    let moneyline = outcome
        .candidates
        .iter()
        .find(|c| c.opportunity.market == MarketKind::Moneyline)
        .unwrap();
    assert_eq!(moneyline.coverage(), 3);
    assert_eq!(moneyline.best_book, Some(Book::FanDuel));
    assert!(moneyline.market_average.is_some());
}

#[test]
fn identical_cycles_are_idempotent() {
    let processor = EvProcessor::default();

    let first = aggregate(processor.process(&[sample_event()]).0, Uuid::new_v4());
    let second = aggregate(processor.process(&[sample_event()]).0, Uuid::new_v4());

    for (prev, next) in first.candidates.iter().zip(second.candidates.iter()) {
        assert_eq!(prev.bet_id, next.bet_id);
        let stored = StoredOffer {
            bet_id: prev.bet_id.clone(),
            book_odds: prev.book_odds.clone(),
            best_book: prev.best_book,
            best_expected_value: prev.best_expected_value,
            coverage: prev.coverage(),
        };
        assert!(
            !offer_changed(Some(&stored), next),
            "unchanged market must not produce a new offer row"
        );
    }
}

#[test]
fn price_move_passes_the_gate() {
    let processor = EvProcessor::default();
    let first = aggregate(processor.process(&[sample_event()]).0, Uuid::new_v4());

    let mut moved_event = sample_event();
    moved_event.markets[0].quotes[2] = quote("fanduel", "+110");
    let moved = aggregate(processor.process(&[moved_event]).0, Uuid::new_v4());

    let prev = first
        .candidates
        .iter()
        .find(|c| c.opportunity.market == MarketKind::Moneyline)
        .unwrap();
    let next = moved
        .candidates
        .iter()
        .find(|c| c.opportunity.market == MarketKind::Moneyline)
        .unwrap();
    assert_eq!(prev.bet_id, next.bet_id);

    let stored = StoredOffer {
        bet_id: prev.bet_id.clone(),
        book_odds: prev.book_odds.clone(),
        best_book: prev.best_book,
        best_expected_value: prev.best_expected_value,
        coverage: prev.coverage(),
    };
    assert!(offer_changed(Some(&stored), next));
}

#[test]
fn bet_identity_survives_event_name_noise() {
    let processor = EvProcessor::default();
    let first = aggregate(processor.process(&[sample_event()]).0, Uuid::new_v4());

    let mut noisy = sample_event();
    noisy.event_name = "  JETS   @  bills ".to_string();
    let second = aggregate(processor.process(&[noisy]).0, Uuid::new_v4());

    let first_ids: Vec<&str> = first.candidates.iter().map(|c| c.bet_id.as_str()).collect();
    let second_ids: Vec<&str> = second
        .candidates
        .iter()
        .map(|c| c.bet_id.as_str())
        .collect();
    assert_eq!(first_ids, second_ids);
}

#[test]
fn restricted_view_masks_pricing_internals() {
    let processor = EvProcessor::default();
    let (opportunities, _) = processor.process(&[sample_event()]);

    let full: Vec<OpportunityView> = opportunities.iter().map(OpportunityView::full).collect();
    assert!(full.iter().all(|v| v.fair_odds.is_some() && v.book_odds.is_some()));

    let restricted: Vec<OpportunityView> = opportunities
        .iter()
        .filter(|o| o.market == MarketKind::Moneyline)
        .map(OpportunityView::restricted)
        .collect();
    assert_eq!(restricted.len(), 1);
    assert!(restricted.iter().all(|v| {
        v.fair_odds.is_none()
            && v.implied_probability.is_none()
            && v.confidence.is_none()
            && v.book_odds.is_none()
    }));
    // The serving fields stay visible in both tiers
    assert!(restricted.iter().all(|v| v.best_odds > 1.0));
}
