//! Batched persistence of bet identities and offer snapshots.
//!
//! Two-phase write per batch: idempotent upsert of lookup rows, upsert of
//! Bet rows keyed by `bet_id` (conflicts only refresh `updated_at`), then
//! append of BetOffer rows that pass the change-detection gate. All writes
//! are chunked; a failed chunk is recorded and the remaining chunks still
//! run. Each chunk commits atomically.

use crate::aggregate::{offer_changed, OfferCandidate, StoredOffer};
use crate::db::retry::execute_with_retry;
use crate::types::Book;
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

const CHUNK_WRITE_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Error,
}

/// Outcome of one `save_batch` call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchWriteReport {
    pub status: BatchStatus,
    pub bets_created: u64,
    pub offers_created: u64,
    pub offers_skipped: u64,
    pub errors: Vec<String>,
}

impl BatchWriteReport {
    fn empty() -> Self {
        Self {
            status: BatchStatus::Success,
            bets_created: 0,
            offers_created: 0,
            offers_skipped: 0,
            errors: Vec::new(),
        }
    }
}

/// Apply the change-detection gate against the stored offers: the write
/// set in input order plus the skip count.
fn gate_candidates<'a>(
    candidates: &'a [OfferCandidate],
    stored: &FxHashMap<String, StoredOffer>,
) -> (Vec<&'a OfferCandidate>, u64) {
    let mut skipped = 0u64;
    let gated = candidates
        .iter()
        .filter(|c| {
            let changed = offer_changed(stored.get(&c.bet_id), c);
            if !changed {
                skipped += 1;
            }
            changed
        })
        .collect();
    (gated, skipped)
}

/// Sole writer for Bet and BetOffer rows.
#[derive(Clone)]
pub struct BetStore {
    pool: PgPool,
    chunk_size: usize,
}

impl BetStore {
    pub fn new(pool: PgPool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Persist one refresh cycle's candidates.
    ///
    /// Returns a report rather than an error: chunk failures are recorded
    /// in `errors` and processing continues. The report status is `error`
    /// only when the operation failed before any chunk could complete.
    pub async fn save_batch(&self, candidates: &[OfferCandidate], source: &str) -> BatchWriteReport {
        let mut report = BatchWriteReport::empty();
        if candidates.is_empty() {
            return report;
        }

        if let Err(e) = self.upsert_lookups(candidates).await {
            report.status = BatchStatus::Error;
            report.errors.push(format!("lookup upsert failed: {e:#}"));
            return report;
        }

        let stored = match self.latest_offers(candidates).await {
            Ok(stored) => stored,
            Err(e) => {
                report.status = BatchStatus::Error;
                report
                    .errors
                    .push(format!("loading prior offers failed: {e:#}"));
                return report;
            }
        };

        let (gated, skipped) = gate_candidates(candidates, &stored);
        report.offers_skipped = skipped;

        for chunk in gated.chunks(self.chunk_size) {
            match execute_with_retry(|| self.write_chunk(chunk, source), CHUNK_WRITE_ATTEMPTS).await
            {
                Ok((bets, offers)) => {
                    report.bets_created += bets;
                    report.offers_created += offers;
                }
                Err(e) => {
                    warn!(chunk_len = chunk.len(), error = %format!("{e:#}"), "chunk write failed");
                    report.errors.push(format!(
                        "chunk of {} offers failed: {e:#}",
                        chunk.len()
                    ));
                }
            }
        }

        info!(
            source,
            bets_created = report.bets_created,
            offers_created = report.offers_created,
            offers_skipped = report.offers_skipped,
            errors = report.errors.len(),
            "batch persisted"
        );
        report
    }

    /// Insert-if-absent for the sport/league/book reference rows every
    /// Bet/BetOffer in this batch references.
    async fn upsert_lookups(&self, candidates: &[OfferCandidate]) -> Result<()> {
        let mut sports: BTreeSet<&str> = BTreeSet::new();
        let mut leagues: BTreeSet<(&str, &str)> = BTreeSet::new();
        for candidate in candidates {
            let opp = &candidate.opportunity;
            sports.insert(opp.sport.as_str());
            if let Some(league) = opp.league.as_deref() {
                leagues.insert((league, opp.sport.as_str()));
            }
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO sports (key) ");
        qb.push_values(sports.iter(), |mut b, key| {
            b.push_bind(*key);
        });
        qb.push(" ON CONFLICT (key) DO NOTHING");
        qb.build()
            .execute(&self.pool)
            .await
            .context("sports upsert")?;

        if !leagues.is_empty() {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO leagues (key, sport_key) ");
            qb.push_values(leagues.iter(), |mut b, (league, sport)| {
                b.push_bind(*league).push_bind(*sport);
            });
            qb.push(" ON CONFLICT (key) DO NOTHING");
            qb.build()
                .execute(&self.pool)
                .await
                .context("leagues upsert")?;
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO books (key, name) ");
        qb.push_values(Book::SUPPORTED.iter(), |mut b, book| {
            b.push_bind(book.key()).push_bind(book.display_name());
        });
        qb.push(" ON CONFLICT (key) DO NOTHING");
        qb.build()
            .execute(&self.pool)
            .await
            .context("books upsert")?;

        Ok(())
    }

    /// Load the most recently stored offer per candidate bet for the
    /// change-detection gate. One window query per batch.
    pub async fn latest_offers(
        &self,
        candidates: &[OfferCandidate],
    ) -> Result<FxHashMap<String, StoredOffer>> {
        let bet_ids: Vec<String> = candidates.iter().map(|c| c.bet_id.clone()).collect();

        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (bet_id)
                bet_id,
                odds_pinnacle, odds_draftkings, odds_fanduel,
                odds_betmgm, odds_caesars, odds_betrivers,
                best_book, best_expected_value, book_coverage
            FROM bet_offers
            WHERE bet_id = ANY($1)
            ORDER BY bet_id, created_at DESC
            "#,
        )
        .bind(&bet_ids)
        .fetch_all(&self.pool)
        .await
        .context("loading latest offers")?;

        let mut out = FxHashMap::default();
        for row in rows {
            let bet_id: String = row.try_get("bet_id")?;
            let mut book_odds = crate::types::BookOdds::new();
            for (book, column) in [
                (Book::Pinnacle, "odds_pinnacle"),
                (Book::DraftKings, "odds_draftkings"),
                (Book::FanDuel, "odds_fanduel"),
                (Book::BetMGM, "odds_betmgm"),
                (Book::Caesars, "odds_caesars"),
                (Book::BetRivers, "odds_betrivers"),
            ] {
                if let Some(odds) = row.try_get::<Option<f64>, _>(column)? {
                    book_odds.insert(book, odds);
                }
            }
            let best_book: Option<String> = row.try_get("best_book")?;
            let stored = StoredOffer {
                bet_id: bet_id.clone(),
                book_odds,
                best_book: best_book.as_deref().and_then(Book::from_key),
                best_expected_value: row.try_get("best_expected_value")?,
                coverage: row.try_get::<i32, _>("book_coverage")? as u32,
            };
            out.insert(bet_id, stored);
        }
        Ok(out)
    }

    /// Write one chunk atomically: bet upserts then offer appends.
    async fn write_chunk(&self, chunk: &[&OfferCandidate], source: &str) -> Result<(u64, u64)> {
        let mut tx = self.pool.begin().await.context("begin chunk tx")?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO bets (bet_id, sha_key, sport_key, league_key, event_name, \
             home_team, away_team, player_name, market_kind, market_description, \
             params, outcome_side, event_start) ",
        );
        qb.push_values(chunk.iter(), |mut b, candidate| {
            let opp = &candidate.opportunity;
            b.push_bind(&candidate.bet_id)
                .push_bind(&candidate.sha_key)
                .push_bind(opp.sport.as_str())
                .push_bind(opp.league.as_deref())
                .push_bind(&opp.event_name)
                .push_bind(&opp.home_team)
                .push_bind(&opp.away_team)
                .push_bind(opp.params.player.as_deref())
                .push_bind(opp.market.key())
                .push_bind(&opp.market_description)
                .push_bind(opp.params.canonical())
                .push_bind(opp.side.key())
                .push_bind(opp.commence_time);
        });
        qb.push(" ON CONFLICT (bet_id) DO NOTHING");
        let bets_created = qb
            .build()
            .execute(&mut *tx)
            .await
            .context("bets upsert")?
            .rows_affected();

        let chunk_ids: Vec<&str> = chunk.iter().map(|c| c.bet_id.as_str()).collect();
        sqlx::query("UPDATE bets SET updated_at = NOW() WHERE bet_id = ANY($1)")
            .bind(&chunk_ids)
            .execute(&mut *tx)
            .await
            .context("bets touch updated_at")?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO bet_offers (offer_id, bet_id, odds_pinnacle, odds_draftkings, \
             odds_fanduel, odds_betmgm, odds_caesars, odds_betrivers, best_book, \
             best_expected_value, fair_odds, implied_probability, confidence, \
             volume_indicator, market_average, book_coverage, refresh_cycle_id, source) ",
        );
        qb.push_values(chunk.iter(), |mut b, candidate| {
            b.push_bind(Uuid::new_v4())
                .push_bind(&candidate.bet_id)
                .push_bind(candidate.book_odds.get(&Book::Pinnacle).copied())
                .push_bind(candidate.book_odds.get(&Book::DraftKings).copied())
                .push_bind(candidate.book_odds.get(&Book::FanDuel).copied())
                .push_bind(candidate.book_odds.get(&Book::BetMGM).copied())
                .push_bind(candidate.book_odds.get(&Book::Caesars).copied())
                .push_bind(candidate.book_odds.get(&Book::BetRivers).copied())
                .push_bind(candidate.best_book.map(|book| book.key()))
                .push_bind(candidate.best_expected_value)
                .push_bind(candidate.fair_decimal)
                .push_bind(candidate.implied_probability)
                .push_bind(candidate.confidence)
                .push_bind(candidate.volume_indicator)
                .push_bind(candidate.market_average)
                .push_bind(candidate.coverage() as i32)
                .push_bind(candidate.refresh_cycle_id)
                .push_bind(source);
        });
        let offers_created = qb
            .build()
            .execute(&mut *tx)
            .await
            .context("offers insert")?
            .rows_affected();

        tx.commit().await.context("commit chunk tx")?;
        Ok((bets_created, offers_created))
    }
}
