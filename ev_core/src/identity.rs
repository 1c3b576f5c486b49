//! Deterministic bet identity derivation.
//!
//! `bet_id` identifies one distinct wager (sport + event + market +
//! parameters + outcome side). `sha_key` is the coarser event-level hash
//! (sport + event + start time) that groups every wager belonging to the
//! same real-world event. Both are pure functions of their inputs: the same
//! logical wager always hashes to the same id across refresh cycles.

use crate::types::Opportunity;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Identity pair for one wager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BetIdentity {
    pub bet_id: String,
    pub sha_key: String,
}

/// Normalize an event name for hashing: casefold and collapse interior
/// whitespace so cosmetic source differences don't split identities.
pub fn normalize_event_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn hash_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    // First 16 bytes are plenty of entropy for a wager identity
    let mut out = String::with_capacity(32);
    for byte in &digest[..16] {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Derive the identity pair for an opportunity.
pub fn bet_identity(opp: &Opportunity) -> BetIdentity {
    let event = normalize_event_name(&opp.event_name);

    let bet_input = format!(
        "{}|{}|{}|{}|{}",
        opp.sport.as_str(),
        event,
        opp.market.key(),
        opp.params.canonical(),
        opp.side.key(),
    );
    let sha_input = format!(
        "{}|{}|{}",
        opp.sport.as_str(),
        event,
        opp.commence_time.timestamp(),
    );

    BetIdentity {
        bet_id: hash_hex(&bet_input),
        sha_key: hash_hex(&sha_input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BetParams, EvTier, MarketKind, OutcomeSide, Sport,
    };
    use chrono::{TimeZone, Utc};

    fn opportunity() -> Opportunity {
        Opportunity {
            sport: Sport::NBA,
            league: Some("NBA".to_string()),
            event_name: "Celtics @ Lakers".to_string(),
            home_team: "Lakers".to_string(),
            away_team: "Celtics".to_string(),
            market: MarketKind::Spread,
            market_description: "Point Spread".to_string(),
            params: BetParams {
                line: Some(-3.5),
                player: None,
            },
            side: OutcomeSide::Home,
            commence_time: Utc.with_ymd_and_hms(2025, 11, 2, 19, 0, 0).unwrap(),
            quotes: Vec::new(),
            dropped_books: 0,
            fair_decimal: 1.95,
            implied_probability: 0.513,
            best_book: None,
            best_decimal: 1.91,
            expected_value: -0.02,
            tier: EvTier::Neutral,
            parse_failed: false,
            confidence: 0.5,
            volume_indicator: 3.0,
        }
    }

    #[test]
    fn test_identity_is_deterministic() {
        let a = bet_identity(&opportunity());
        let b = bet_identity(&opportunity());
        assert_eq!(a, b);
        assert_eq!(a.bet_id.len(), 32);
        assert_eq!(a.sha_key.len(), 32);
    }

    #[test]
    fn test_identity_insensitive_to_quote_data() {
        let mut changed = opportunity();
        changed.best_decimal = 2.4;
        changed.expected_value = 0.08;
        changed.tier = EvTier::Excellent;
        assert_eq!(bet_identity(&opportunity()), bet_identity(&changed));
    }

    #[test]
    fn test_any_identity_input_changes_the_id() {
        let base = bet_identity(&opportunity()).bet_id;

        let mut o = opportunity();
        o.sport = Sport::NFL;
        assert_ne!(bet_identity(&o).bet_id, base);

        let mut o = opportunity();
        o.event_name = "Heat @ Lakers".to_string();
        assert_ne!(bet_identity(&o).bet_id, base);

        let mut o = opportunity();
        o.market = MarketKind::Total;
        assert_ne!(bet_identity(&o).bet_id, base);

        let mut o = opportunity();
        o.params.line = Some(-4.0);
        assert_ne!(bet_identity(&o).bet_id, base);

        let mut o = opportunity();
        o.side = OutcomeSide::Away;
        assert_ne!(bet_identity(&o).bet_id, base);
    }

    #[test]
    fn test_sha_key_groups_event_level() {
        // Different market, same event: same sha_key, different bet_id
        let a = bet_identity(&opportunity());
        let mut o = opportunity();
        o.market = MarketKind::Moneyline;
        let b = bet_identity(&o);
        assert_eq!(a.sha_key, b.sha_key);
        assert_ne!(a.bet_id, b.bet_id);
    }

    #[test]
    fn test_event_name_normalization() {
        let mut o = opportunity();
        o.event_name = "  CELTICS   @  lakers ".to_string();
        assert_eq!(bet_identity(&o), bet_identity(&opportunity()));
        assert_eq!(normalize_event_name("  A   B "), "a b");
    }
}
