//! EV processor: raw event/market/book data in, typed opportunities out.
//!
//! Transforms each market outcome into an `Opportunity` with decimal odds,
//! a fair-odds estimate, implied probability and an EV tier. A malformed
//! odds string never aborts the batch: the quote falls back to even odds
//! (decimal 2.0) and the record is tagged as a parse failure.

pub mod fair;

pub use fair::{ConsensusModel, FairOddsModel, PassthroughModel};

use crate::odds::AmericanOdds;
use crate::types::{Book, BookQuote, EvTier, Opportunity, RawEvent, RawMarket};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Aggregate statistics over one processed batch. Computed once over the
/// full result set, not incrementally.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct EvAnalytics {
    pub opportunity_count: usize,
    pub average_ev: f64,
    pub ev_variance: f64,
    pub tier_histogram: FxHashMap<String, usize>,
    pub parse_failures: usize,
    pub dropped_books: u32,
}

pub struct EvProcessor {
    fair_model: Arc<dyn FairOddsModel>,
}

impl Default for EvProcessor {
    fn default() -> Self {
        Self::new(Arc::new(PassthroughModel::default()))
    }
}

impl EvProcessor {
    pub fn new(fair_model: Arc<dyn FairOddsModel>) -> Self {
        Self { fair_model }
    }

    /// Process a batch of raw events into opportunities plus analytics.
    pub fn process(&self, raw_events: &[RawEvent]) -> (Vec<Opportunity>, EvAnalytics) {
        let opportunities: Vec<Opportunity> = raw_events
            .iter()
            .flat_map(|event| {
                event
                    .markets
                    .iter()
                    .map(move |market| self.process_market(event, market))
            })
            .collect();

        let analytics = Self::analyze(&opportunities);
        debug!(
            count = analytics.opportunity_count,
            avg_ev = analytics.average_ev,
            parse_failures = analytics.parse_failures,
            model = self.fair_model.model_name(),
            "processed raw events"
        );
        (opportunities, analytics)
    }

    fn process_market(&self, event: &RawEvent, market: &RawMarket) -> Opportunity {
        let mut quotes: Vec<BookQuote> = Vec::with_capacity(market.quotes.len());
        let mut dropped_books = 0u32;
        let mut parse_failed = false;
        let mut seen: FxHashMap<Book, ()> = FxHashMap::default();

        for raw in &market.quotes {
            let Some(book) = Book::from_key(&raw.book) else {
                dropped_books += 1;
                continue;
            };
            // One quote per book; the first wins
            if seen.insert(book, ()).is_some() {
                continue;
            }
            let decimal = match AmericanOdds::parse(&raw.odds) {
                Ok(odds) => odds.to_decimal(),
                Err(e) => {
                    warn!(
                        event = %event.event_name,
                        book = %book,
                        odds = %raw.odds,
                        error = %e,
                        "unparseable odds string, falling back to even odds"
                    );
                    parse_failed = true;
                    2.0
                }
            };
            quotes.push(BookQuote { book, decimal });
        }

        let best = quotes
            .iter()
            .copied()
            .max_by(|a, b| a.decimal.total_cmp(&b.decimal));
        let best_decimal = best.map(|q| q.decimal).unwrap_or(2.0);

        let fair_decimal = self.fair_model.fair_decimal(market.fair_odds, &quotes);
        let fair_prob = if fair_decimal > 1.0 {
            1.0 / fair_decimal
        } else {
            0.5
        };
        let expected_value = fair_prob * best_decimal - 1.0;

        let coverage = quotes.len() as f64;
        let confidence = {
            let base = coverage / Book::SUPPORTED.len() as f64;
            if parse_failed {
                base * 0.5
            } else {
                base
            }
        };

        Opportunity {
            sport: event.sport,
            league: event.league.clone(),
            event_name: event.event_name.clone(),
            home_team: event.home_team.clone(),
            away_team: event.away_team.clone(),
            market: market.kind,
            market_description: market.description.clone(),
            params: market.params.clone(),
            side: market.side,
            commence_time: event.commence_time,
            quotes,
            dropped_books,
            fair_decimal,
            implied_probability: fair_prob,
            best_book: best.map(|q| q.book),
            best_decimal,
            expected_value,
            tier: EvTier::classify(expected_value),
            parse_failed,
            confidence,
            volume_indicator: coverage,
        }
    }

    /// One-shot analytics over the full result set.
    pub fn analyze(opportunities: &[Opportunity]) -> EvAnalytics {
        let count = opportunities.len();
        if count == 0 {
            return EvAnalytics::default();
        }

        let sum: f64 = opportunities.par_iter().map(|o| o.expected_value).sum();
        let mean = sum / count as f64;
        let variance = opportunities
            .par_iter()
            .map(|o| {
                let d = o.expected_value - mean;
                d * d
            })
            .sum::<f64>()
            / count as f64;

        let mut tier_histogram: FxHashMap<String, usize> = FxHashMap::default();
        let mut parse_failures = 0usize;
        let mut dropped_books = 0u32;
        for opp in opportunities {
            *tier_histogram.entry(opp.tier.key().to_string()).or_insert(0) += 1;
            if opp.parse_failed {
                parse_failures += 1;
            }
            dropped_books += opp.dropped_books;
        }

        EvAnalytics {
            opportunity_count: count,
            average_ev: mean,
            ev_variance: variance,
            tier_histogram,
            parse_failures,
            dropped_books,
        }
    }
}
