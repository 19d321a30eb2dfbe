// Bet intents, receipts, and the user-facing rejection taxonomy.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::market::MarketCatalog;

/// Why a stake submission was refused. Returned as a value from `submit`,
/// never raised across the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Please enter a valid amount")]
    InvalidAmount,

    #[error("Betting is closed for this round")]
    RoundClosed,

    #[error("Unknown market: {0}")]
    UnknownMarket(String),

    #[error("Insufficient funds: stake {needed}, balance {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Account service unavailable: {0}")]
    AccountUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    Draft,
    Rejected(Rejection),
    Accepted,
}

/// A user's intent to stake on one market in one round.
///
/// Created when a market is selected, mutated only by the gate's outcome, and
/// discarded once submitted or canceled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetIntent {
    pub market: String,
    /// Odds text exactly as offered at selection time.
    pub odds: String,
    /// Stake in minor currency units. Signed so that bad input can be
    /// represented and rejected rather than silently clamped.
    pub stake_amount: i64,
    /// Round that was live when the market was selected.
    pub round_id: Option<String>,
    pub status: SubmissionStatus,
}

impl BetIntent {
    pub fn new(market: impl Into<String>, odds: impl Into<String>, round_id: Option<String>) -> Self {
        BetIntent {
            market: market.into(),
            odds: odds.into(),
            stake_amount: 0,
            round_id,
            status: SubmissionStatus::Draft,
        }
    }

    /// Start a draft intent for `market`, taking its odds from the catalog.
    pub fn select(
        catalog: &MarketCatalog,
        market: &str,
        round_id: Option<String>,
    ) -> Result<Self, Rejection> {
        let found = catalog
            .find(market)
            .ok_or_else(|| Rejection::UnknownMarket(market.to_string()))?;
        Ok(BetIntent::new(found.id.clone(), found.odds.clone(), round_id))
    }

    pub fn with_stake(mut self, stake_amount: i64) -> Self {
        self.stake_amount = stake_amount;
        self
    }
}

/// Confirmation of an accepted, reserved stake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetReceipt {
    pub market: String,
    pub odds: String,
    pub stake: u64,
    pub round_id: String,
    pub placed_at: DateTime<Utc>,
}

impl BetReceipt {
    pub fn summary(&self) -> String {
        format!(
            "Placed bet of ₹{} on {} at {}",
            self.stake, self.market, self.odds
        )
    }
}

/// Parse a user-entered stake.
///
/// Accepts integral amounts ("500", " 1000 ", "1e3"); rejects anything
/// non-numeric, non-finite, fractional, or not strictly positive.
pub fn parse_stake(text: &str) -> Result<i64, Rejection> {
    let text = text.trim();
    if let Ok(amount) = text.parse::<i64>() {
        return if amount > 0 {
            Ok(amount)
        } else {
            Err(Rejection::InvalidAmount)
        };
    }

    let value: f64 = text.parse().map_err(|_| Rejection::InvalidAmount)?;
    if !value.is_finite() || value <= 0.0 || value.fract() != 0.0 || value >= i64::MAX as f64 {
        return Err(Rejection::InvalidAmount);
    }
    Ok(value as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_padded_amounts() {
        assert_eq!(parse_stake("500"), Ok(500));
        assert_eq!(parse_stake("  1000 "), Ok(1000));
        assert_eq!(parse_stake("1e3"), Ok(1000));
        assert_eq!(parse_stake("100.0"), Ok(100));
    }

    #[test]
    fn rejects_unusable_amounts() {
        for input in ["", "abc", "0", "-5", "12.5", "NaN", "inf", "-inf", "1e400"] {
            assert_eq!(
                parse_stake(input),
                Err(Rejection::InvalidAmount),
                "input {input:?} should be rejected"
            );
        }
    }

    #[test]
    fn select_takes_odds_from_catalog() {
        let catalog = MarketCatalog::lucky_seven();
        let intent = BetIntent::select(&catalog, "4,5,6", Some("R1".into())).unwrap();
        assert_eq!(intent.odds, "3.8");
        assert_eq!(intent.round_id.as_deref(), Some("R1"));
        assert_eq!(intent.status, SubmissionStatus::Draft);
        assert_eq!(intent.stake_amount, 0);
    }

    #[test]
    fn select_unknown_market_is_rejected() {
        let catalog = MarketCatalog::lucky_seven();
        assert_eq!(
            BetIntent::select(&catalog, "JOKER", None),
            Err(Rejection::UnknownMarket("JOKER".into()))
        );
    }

    #[test]
    fn receipt_summary_names_stake_market_and_odds() {
        let receipt = BetReceipt {
            market: "7 UP".into(),
            odds: "3.75".into(),
            stake: 500,
            round_id: "R1".into(),
            placed_at: Utc::now(),
        };
        assert_eq!(receipt.summary(), "Placed bet of ₹500 on 7 UP at 3.75");
    }
}
