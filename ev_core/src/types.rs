//! Shared domain types for the EV pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Supported sports
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sport {
    NFL,
    NBA,
    NHL,
    MLB,
    NCAAF,
    NCAAB,
    #[serde(rename = "SOCCER")]
    Soccer,
    Tennis,
    MMA,
}

impl Sport {
    pub const ALL: [Sport; 9] = [
        Sport::NFL,
        Sport::NBA,
        Sport::NHL,
        Sport::MLB,
        Sport::NCAAF,
        Sport::NCAAB,
        Sport::Soccer,
        Sport::Tennis,
        Sport::MMA,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::NFL => "NFL",
            Sport::NBA => "NBA",
            Sport::NHL => "NHL",
            Sport::MLB => "MLB",
            Sport::NCAAF => "NCAAF",
            Sport::NCAAB => "NCAAB",
            Sport::Soccer => "SOCCER",
            Sport::Tennis => "TENNIS",
            Sport::MMA => "MMA",
        }
    }

    /// Upstream odds-API key for this sport
    pub fn api_key(&self) -> &'static str {
        match self {
            Sport::NFL => "americanfootball_nfl",
            Sport::NBA => "basketball_nba",
            Sport::NHL => "icehockey_nhl",
            Sport::MLB => "baseball_mlb",
            Sport::NCAAF => "americanfootball_ncaaf",
            Sport::NCAAB => "basketball_ncaab",
            Sport::Soccer => "soccer_usa_mls",
            Sport::Tennis => "tennis_atp",
            Sport::MMA => "mma_mixed_martial_arts",
        }
    }

    pub fn from_key(key: &str) -> Option<Sport> {
        Sport::ALL
            .iter()
            .copied()
            .find(|s| s.api_key() == key || s.as_str().eq_ignore_ascii_case(key))
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported sportsbooks. This is a closed set: quotes from any other book
/// are dropped individually and counted for observability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Book {
    Pinnacle,
    DraftKings,
    FanDuel,
    BetMGM,
    Caesars,
    BetRivers,
}

impl Book {
    pub const SUPPORTED: [Book; 6] = [
        Book::Pinnacle,
        Book::DraftKings,
        Book::FanDuel,
        Book::BetMGM,
        Book::Caesars,
        Book::BetRivers,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Book::Pinnacle => "pinnacle",
            Book::DraftKings => "draftkings",
            Book::FanDuel => "fanduel",
            Book::BetMGM => "betmgm",
            Book::Caesars => "caesars",
            Book::BetRivers => "betrivers",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Book::Pinnacle => "Pinnacle",
            Book::DraftKings => "DraftKings",
            Book::FanDuel => "FanDuel",
            Book::BetMGM => "BetMGM",
            Book::Caesars => "Caesars",
            Book::BetRivers => "BetRivers",
        }
    }

    pub fn from_key(key: &str) -> Option<Book> {
        let normalized = key.trim().to_lowercase().replace([' ', '_', '-'], "");
        Book::SUPPORTED
            .iter()
            .copied()
            .find(|b| b.key() == normalized)
    }
}

impl fmt::Display for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Per-book decimal odds, keyed by supported book. Absent key = no quote.
pub type BookOdds = BTreeMap<Book, f64>;

/// Wager market kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Moneyline,
    Spread,
    Total,
    PlayerProp,
    Other,
}

impl MarketKind {
    pub fn key(&self) -> &'static str {
        match self {
            MarketKind::Moneyline => "moneyline",
            MarketKind::Spread => "spread",
            MarketKind::Total => "total",
            MarketKind::PlayerProp => "player_prop",
            MarketKind::Other => "other",
        }
    }

    pub fn from_key(key: &str) -> MarketKind {
        match key.trim().to_lowercase().as_str() {
            "moneyline" | "h2h" | "ml" => MarketKind::Moneyline,
            "spread" | "spreads" | "handicap" => MarketKind::Spread,
            "total" | "totals" | "over_under" => MarketKind::Total,
            "player_prop" | "player_props" | "prop" => MarketKind::PlayerProp,
            _ => MarketKind::Other,
        }
    }
}

/// Side of a wager outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSide {
    Home,
    Away,
    Over,
    Under,
    Draw,
}

impl OutcomeSide {
    pub fn key(&self) -> &'static str {
        match self {
            OutcomeSide::Home => "home",
            OutcomeSide::Away => "away",
            OutcomeSide::Over => "over",
            OutcomeSide::Under => "under",
            OutcomeSide::Draw => "draw",
        }
    }
}

/// Structured wager parameters (spread line, total line, player)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BetParams {
    /// Point spread or total line, where applicable
    pub line: Option<f64>,
    /// Player name for prop markets
    pub player: Option<String>,
}

impl BetParams {
    /// Canonical, stable string form used in identity hashing and persistence.
    pub fn canonical(&self) -> String {
        let mut parts = Vec::new();
        if let Some(line) = self.line {
            parts.push(format!("line={:.2}", line));
        }
        if let Some(player) = &self.player {
            parts.push(format!("player={}", player.trim().to_lowercase()));
        }
        parts.join(";")
    }
}

/// EV classification tiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvTier {
    Excellent,
    High,
    Positive,
    Neutral,
}

impl EvTier {
    /// Classify an EV fraction (0.045 = 4.5%).
    pub fn classify(ev: f64) -> EvTier {
        if ev >= 0.045 {
            EvTier::Excellent
        } else if ev >= 0.025 {
            EvTier::High
        } else if ev > 0.0 {
            EvTier::Positive
        } else {
            EvTier::Neutral
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            EvTier::Excellent => "excellent",
            EvTier::High => "high",
            EvTier::Positive => "positive",
            EvTier::Neutral => "neutral",
        }
    }
}

/// A single book quote as received from the source, odds still in
/// American string form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawQuote {
    pub book: String,
    pub odds: String,
}

/// One market outcome from the source, carrying every book's quote.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawMarket {
    pub kind: MarketKind,
    pub description: String,
    #[serde(default)]
    pub params: BetParams,
    pub side: OutcomeSide,
    pub quotes: Vec<RawQuote>,
    /// Upstream-precomputed fair decimal odds, when the source provides them
    #[serde(default)]
    pub fair_odds: Option<f64>,
}

/// One event from the source with its markets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_id: String,
    pub sport: Sport,
    #[serde(default)]
    pub league: Option<String>,
    pub event_name: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub markets: Vec<RawMarket>,
}

/// Parsed per-book quote
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookQuote {
    pub book: Book,
    pub decimal: f64,
}

/// A fully computed wagering opportunity. Produced once by the EV processor
/// and consumed everywhere downstream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Opportunity {
    pub sport: Sport,
    pub league: Option<String>,
    pub event_name: String,
    pub home_team: String,
    pub away_team: String,
    pub market: MarketKind,
    pub market_description: String,
    pub params: BetParams,
    pub side: OutcomeSide,
    pub commence_time: DateTime<Utc>,
    /// Parsed quotes from supported books only
    pub quotes: Vec<BookQuote>,
    /// Quotes dropped because the book is outside the supported set
    pub dropped_books: u32,
    pub fair_decimal: f64,
    pub implied_probability: f64,
    pub best_book: Option<Book>,
    pub best_decimal: f64,
    /// Expected value as a fraction (0.045 = +4.5%)
    pub expected_value: f64,
    pub tier: EvTier,
    /// True when at least one odds string failed to parse and the
    /// even-odds fallback was applied
    pub parse_failed: bool,
    pub confidence: f64,
    pub volume_indicator: f64,
}

impl Opportunity {
    /// Book coverage: number of supported books with a live quote.
    pub fn coverage(&self) -> u32 {
        self.quotes.len() as u32
    }
}

/// Caller identity for role-segmented views. Replaces the ad hoc
/// anonymous-namespace guest object from the legacy dashboard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserContext {
    Authenticated { user_id: i64, role: Role },
    Guest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Premium,
    Admin,
}

impl UserContext {
    /// Whether this caller sees the full view or the restricted one.
    pub fn is_full_access(&self) -> bool {
        match self {
            UserContext::Authenticated { role, .. } => {
                matches!(role, Role::Premium | Role::Admin)
            }
            UserContext::Guest => false,
        }
    }
}
