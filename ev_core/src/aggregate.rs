//! Multi-book aggregation: one offer candidate per bet per refresh cycle.
//!
//! Groups the processed opportunities by `bet_id`, folds every supported
//! book's quote into a single book→odds map, and applies the
//! change-detection gate against the most recently stored offer so that
//! no-op refresh cycles don't grow the offer table.

use crate::identity::{bet_identity, BetIdentity};
use crate::types::{Book, BookOdds, Opportunity};
use rustc_hash::FxHashMap;
use tracing::debug;
use uuid::Uuid;

/// Minimum best-EV movement that counts as a meaningful market move.
pub const EV_CHANGE_THRESHOLD: f64 = 0.01;

const ODDS_EPSILON: f64 = 1e-9;

/// One aggregated offer ready for the persistence gate.
#[derive(Clone, Debug)]
pub struct OfferCandidate {
    pub bet_id: String,
    pub sha_key: String,
    /// Representative opportunity carrying the static bet fields
    pub opportunity: Opportunity,
    pub book_odds: BookOdds,
    pub best_book: Option<Book>,
    pub best_expected_value: f64,
    pub fair_decimal: f64,
    pub implied_probability: f64,
    pub confidence: f64,
    pub volume_indicator: f64,
    /// Simple average across books, only when >= 2 valid quotes
    pub market_average: Option<f64>,
    pub refresh_cycle_id: Uuid,
}

impl OfferCandidate {
    pub fn coverage(&self) -> u32 {
        self.book_odds.len() as u32
    }
}

/// The slice of a stored offer the change gate compares against.
#[derive(Clone, Debug, Default)]
pub struct StoredOffer {
    pub bet_id: String,
    pub book_odds: BookOdds,
    pub best_book: Option<Book>,
    pub best_expected_value: f64,
    pub coverage: u32,
}

/// Aggregation result for one cycle.
#[derive(Debug)]
pub struct AggregateOutcome {
    pub candidates: Vec<OfferCandidate>,
    /// Raw quotes dropped because their book is outside the supported set
    pub dropped_quotes: u32,
    pub refresh_cycle_id: Uuid,
}

/// Aggregate a cycle's opportunities into one candidate per `bet_id`.
///
/// When the same bet shows up more than once in a cycle (overlapping
/// markets from different source pages), quotes are merged; for a book
/// quoted twice the better (higher) price wins.
pub fn aggregate(opportunities: Vec<Opportunity>, refresh_cycle_id: Uuid) -> AggregateOutcome {
    let mut groups: FxHashMap<String, (BetIdentity, Vec<Opportunity>)> = FxHashMap::default();
    let mut dropped_quotes = 0u32;

    for opp in opportunities {
        dropped_quotes += opp.dropped_books;
        let identity = bet_identity(&opp);
        groups
            .entry(identity.bet_id.clone())
            .or_insert_with(|| (identity, Vec::new()))
            .1
            .push(opp);
    }

    let mut candidates: Vec<OfferCandidate> = groups
        .into_values()
        .map(|(identity, members)| build_candidate(identity, members, refresh_cycle_id))
        .collect();
    // Deterministic output order for stable chunking downstream
    candidates.sort_by(|a, b| a.bet_id.cmp(&b.bet_id));

    debug!(
        candidates = candidates.len(),
        dropped_quotes, %refresh_cycle_id, "aggregated refresh cycle"
    );

    AggregateOutcome {
        candidates,
        dropped_quotes,
        refresh_cycle_id,
    }
}

fn build_candidate(
    identity: BetIdentity,
    members: Vec<Opportunity>,
    refresh_cycle_id: Uuid,
) -> OfferCandidate {
    let mut book_odds = BookOdds::new();
    for opp in &members {
        for quote in &opp.quotes {
            let entry = book_odds.entry(quote.book).or_insert(quote.decimal);
            if quote.decimal > *entry {
                *entry = quote.decimal;
            }
        }
    }

    let best = book_odds
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(book, decimal)| (*book, *decimal));

    // Members of a group share the same wager; the first source to quote
    // it supplies the static fields and the fair price.
    let representative = members
        .first()
        .cloned()
        .expect("aggregate group is never empty");
    let fair_decimal = representative.fair_decimal;
    let fair_prob = representative.implied_probability;

    let best_expected_value = match best {
        Some((_, decimal)) => fair_prob * decimal - 1.0,
        None => representative.expected_value,
    };

    let market_average = if book_odds.len() >= 2 {
        Some(book_odds.values().sum::<f64>() / book_odds.len() as f64)
    } else {
        None
    };

    let volume_indicator = book_odds.len() as f64;
    let confidence = members
        .iter()
        .map(|m| m.confidence)
        .fold(f64::NEG_INFINITY, f64::max)
        .max(0.0);

    OfferCandidate {
        bet_id: identity.bet_id,
        sha_key: identity.sha_key,
        opportunity: representative,
        best_book: best.map(|(book, _)| book),
        best_expected_value,
        fair_decimal,
        implied_probability: fair_prob,
        confidence,
        volume_indicator,
        market_average,
        book_odds,
        refresh_cycle_id,
    }
}

/// Change-detection gate: should this candidate be written given the most
/// recently stored offer for the same bet? No prior offer always writes.
pub fn offer_changed(prev: Option<&StoredOffer>, candidate: &OfferCandidate) -> bool {
    let Some(prev) = prev else {
        return true;
    };

    if prev.coverage != candidate.coverage() {
        return true;
    }
    if prev.best_book != candidate.best_book {
        return true;
    }
    if (prev.best_expected_value - candidate.best_expected_value).abs() >= EV_CHANGE_THRESHOLD {
        return true;
    }
    for book in Book::SUPPORTED {
        match (prev.book_odds.get(&book), candidate.book_odds.get(&book)) {
            (Some(a), Some(b)) if (a - b).abs() > ODDS_EPSILON => return true,
            (Some(_), None) | (None, Some(_)) => return true,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BetParams, BookQuote, EvTier, MarketKind, OutcomeSide, Sport,
    };
    use chrono::{TimeZone, Utc};

    fn opportunity(side: OutcomeSide, quotes: Vec<(Book, f64)>) -> Opportunity {
        let quotes: Vec<BookQuote> = quotes
            .into_iter()
            .map(|(book, decimal)| BookQuote { book, decimal })
            .collect();
        let best_decimal = quotes
            .iter()
            .map(|q| q.decimal)
            .fold(f64::NEG_INFINITY, f64::max);
        Opportunity {
            sport: Sport::NFL,
            league: None,
            event_name: "Jets @ Bills".to_string(),
            home_team: "Bills".to_string(),
            away_team: "Jets".to_string(),
            market: MarketKind::Moneyline,
            market_description: "Moneyline".to_string(),
            params: BetParams::default(),
            side,
            commence_time: Utc.with_ymd_and_hms(2025, 10, 12, 17, 0, 0).unwrap(),
            quotes,
            dropped_books: 0,
            fair_decimal: 2.0,
            implied_probability: 0.5,
            best_book: None,
            best_decimal,
            expected_value: 0.5 * best_decimal - 1.0,
            tier: EvTier::classify(0.5 * best_decimal - 1.0),
            parse_failed: false,
            confidence: 0.3,
            volume_indicator: 1.0,
        }
    }

    fn stored_from(candidate: &OfferCandidate) -> StoredOffer {
        StoredOffer {
            bet_id: candidate.bet_id.clone(),
            book_odds: candidate.book_odds.clone(),
            best_book: candidate.best_book,
            best_expected_value: candidate.best_expected_value,
            coverage: candidate.coverage(),
        }
    }

    #[test]
    fn test_one_candidate_per_bet() {
        let opps = vec![
            opportunity(OutcomeSide::Home, vec![(Book::Pinnacle, 1.95)]),
            opportunity(OutcomeSide::Home, vec![(Book::FanDuel, 2.05)]),
            opportunity(OutcomeSide::Away, vec![(Book::Pinnacle, 1.87)]),
        ];
        let outcome = aggregate(opps, Uuid::new_v4());

        assert_eq!(outcome.candidates.len(), 2);
        let home = outcome
            .candidates
            .iter()
            .find(|c| c.opportunity.side == OutcomeSide::Home)
            .unwrap();
        assert_eq!(home.coverage(), 2);
        assert_eq!(home.best_book, Some(Book::FanDuel));
        assert_eq!(home.market_average, Some((1.95 + 2.05) / 2.0));
    }

    #[test]
    fn test_single_quote_has_no_market_average() {
        let outcome = aggregate(
            vec![opportunity(OutcomeSide::Home, vec![(Book::Pinnacle, 1.95)])],
            Uuid::new_v4(),
        );
        assert_eq!(outcome.candidates[0].market_average, None);
    }

    #[test]
    fn test_duplicate_book_keeps_better_price() {
        let opps = vec![
            opportunity(OutcomeSide::Home, vec![(Book::Pinnacle, 1.91)]),
            opportunity(OutcomeSide::Home, vec![(Book::Pinnacle, 1.95)]),
        ];
        let outcome = aggregate(opps, Uuid::new_v4());
        assert_eq!(
            outcome.candidates[0].book_odds.get(&Book::Pinnacle),
            Some(&1.95)
        );
    }

    #[test]
    fn test_fair_odds_from_first_member() {
        let mut first = opportunity(OutcomeSide::Home, vec![(Book::Pinnacle, 1.95)]);
        first.fair_decimal = 1.9;
        first.implied_probability = 1.0 / 1.9;
        let mut second = opportunity(OutcomeSide::Home, vec![(Book::FanDuel, 2.2)]);
        second.fair_decimal = 2.1;
        second.implied_probability = 1.0 / 2.1;

        let outcome = aggregate(vec![first, second], Uuid::new_v4());
        let candidate = &outcome.candidates[0];
        assert_eq!(candidate.fair_decimal, 1.9);
        // Best EV re-prices the best book at the first member's fair prob
        assert!((candidate.best_expected_value - (2.2 / 1.9 - 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_gate_writes_when_no_prior_offer() {
        let outcome = aggregate(
            vec![opportunity(OutcomeSide::Home, vec![(Book::Pinnacle, 1.95)])],
            Uuid::new_v4(),
        );
        assert!(offer_changed(None, &outcome.candidates[0]));
    }

    #[test]
    fn test_gate_suppresses_identical_cycle() {
        let make = || {
            aggregate(
                vec![opportunity(
                    OutcomeSide::Home,
                    vec![(Book::Pinnacle, 1.95), (Book::FanDuel, 2.02)],
                )],
                Uuid::new_v4(),
            )
        };
        let first = make();
        let second = make();
        let stored = stored_from(&first.candidates[0]);
        assert!(!offer_changed(Some(&stored), &second.candidates[0]));
    }

    #[test]
    fn test_gate_detects_price_move() {
        let first = aggregate(
            vec![opportunity(OutcomeSide::Home, vec![(Book::Pinnacle, 1.95)])],
            Uuid::new_v4(),
        );
        let moved = aggregate(
            vec![opportunity(OutcomeSide::Home, vec![(Book::Pinnacle, 2.10)])],
            Uuid::new_v4(),
        );
        let stored = stored_from(&first.candidates[0]);
        assert!(offer_changed(Some(&stored), &moved.candidates[0]));
    }

    #[test]
    fn test_gate_detects_coverage_change() {
        let first = aggregate(
            vec![opportunity(OutcomeSide::Home, vec![(Book::Pinnacle, 1.95)])],
            Uuid::new_v4(),
        );
        let widened = aggregate(
            vec![opportunity(
                OutcomeSide::Home,
                vec![(Book::Pinnacle, 1.95), (Book::Caesars, 1.95)],
            )],
            Uuid::new_v4(),
        );
        let stored = stored_from(&first.candidates[0]);
        assert!(offer_changed(Some(&stored), &widened.candidates[0]));
    }

    #[test]
    fn test_gate_ignores_sub_threshold_ev_drift() {
        let outcome = aggregate(
            vec![opportunity(OutcomeSide::Home, vec![(Book::Pinnacle, 1.95)])],
            Uuid::new_v4(),
        );
        let candidate = &outcome.candidates[0];
        let mut stored = stored_from(candidate);
        stored.best_expected_value = candidate.best_expected_value + 0.009;
        assert!(!offer_changed(Some(&stored), candidate));

        stored.best_expected_value = candidate.best_expected_value + 0.011;
        assert!(offer_changed(Some(&stored), candidate));
    }
}
