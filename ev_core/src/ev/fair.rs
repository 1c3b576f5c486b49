//! Fair-odds estimation strategies.
//!
//! The upstream pipeline sometimes ships a precomputed fair price and
//! sometimes leaves only raw book quotes, so the estimate is a pluggable
//! strategy rather than a single canonical formula.

use crate::odds::implied_probability;
use crate::types::BookQuote;

/// Strategy for estimating fair (de-vigged) decimal odds for one market
/// outcome given the available book quotes.
pub trait FairOddsModel: Send + Sync {
    fn fair_decimal(&self, upstream_fair: Option<f64>, quotes: &[BookQuote]) -> f64;

    fn model_name(&self) -> &str;
}

/// Consensus model: averages the vig-included implied probabilities across
/// all quoting books and prices the outcome at that consensus probability.
/// With a single quote this degenerates to that book's implied price.
#[derive(Debug, Default)]
pub struct ConsensusModel;

impl FairOddsModel for ConsensusModel {
    fn fair_decimal(&self, _upstream_fair: Option<f64>, quotes: &[BookQuote]) -> f64 {
        if quotes.is_empty() {
            return 2.0;
        }
        let mean_prob = quotes
            .iter()
            .map(|q| implied_probability(q.decimal))
            .sum::<f64>()
            / quotes.len() as f64;
        if mean_prob <= 0.0 {
            return 2.0;
        }
        1.0 / mean_prob
    }

    fn model_name(&self) -> &str {
        "consensus"
    }
}

/// Passthrough model: trusts the upstream fair price when present, falls
/// back to consensus otherwise.
#[derive(Debug, Default)]
pub struct PassthroughModel {
    fallback: ConsensusModel,
}

impl FairOddsModel for PassthroughModel {
    fn fair_decimal(&self, upstream_fair: Option<f64>, quotes: &[BookQuote]) -> f64 {
        match upstream_fair {
            Some(fair) if fair > 1.0 => fair,
            _ => self.fallback.fair_decimal(None, quotes),
        }
    }

    fn model_name(&self) -> &str {
        "passthrough"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Book;

    fn quote(book: Book, decimal: f64) -> BookQuote {
        BookQuote { book, decimal }
    }

    #[test]
    fn test_consensus_single_quote() {
        let model = ConsensusModel;
        let quotes = [quote(Book::Pinnacle, 2.0)];
        assert!((model.fair_decimal(None, &quotes) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_consensus_averages_probabilities() {
        let model = ConsensusModel;
        // 0.5 and 0.25 implied -> 0.375 consensus -> 2.667 decimal
        let quotes = [quote(Book::Pinnacle, 2.0), quote(Book::FanDuel, 4.0)];
        assert!((model.fair_decimal(None, &quotes) - 1.0 / 0.375).abs() < 1e-9);
    }

    #[test]
    fn test_consensus_empty_defaults_even() {
        let model = ConsensusModel;
        assert!((model.fair_decimal(None, &[]) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_passthrough_prefers_upstream() {
        let model = PassthroughModel::default();
        let quotes = [quote(Book::Pinnacle, 2.0)];
        assert!((model.fair_decimal(Some(1.8), &quotes) - 1.8).abs() < 1e-9);
        // Invalid upstream values fall back to consensus
        assert!((model.fair_decimal(Some(0.5), &quotes) - 2.0).abs() < 1e-9);
        assert!((model.fair_decimal(None, &quotes) - 2.0).abs() < 1e-9);
    }
}
