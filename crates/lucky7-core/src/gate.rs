// Bet intent gate: the single authoritative checkpoint for stake submission.
//
// Checks run in a fixed order and the first failure wins:
// 1. amount   -> InvalidAmount
// 2. round    -> RoundClosed
// 3. market   -> UnknownMarket
// The balance check belongs to the account collaborator and runs only after
// the gate accepts.

use tracing::{debug, info};

use crate::bet::{BetIntent, Rejection, SubmissionStatus};
use crate::market::MarketCatalog;
use crate::round::RoundSnapshot;

/// Inclusive stake bounds in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeLimits {
    pub min: u64,
    pub max: u64,
}

impl Default for StakeLimits {
    fn default() -> Self {
        StakeLimits {
            min: 1,
            max: u64::MAX,
        }
    }
}

/// A stake the gate has authorized against the live round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub market: String,
    pub odds: String,
    pub stake: u64,
    pub round_id: String,
}

#[derive(Debug, Clone)]
pub struct BetGate {
    catalog: MarketCatalog,
    limits: StakeLimits,
}

impl BetGate {
    pub fn new(catalog: MarketCatalog, limits: StakeLimits) -> Self {
        BetGate { catalog, limits }
    }

    pub fn catalog(&self) -> &MarketCatalog {
        &self.catalog
    }

    pub fn limits(&self) -> StakeLimits {
        self.limits
    }

    /// Validate `intent` against `live`, which callers must read at the
    /// moment of submission. Records the outcome on the intent.
    pub fn submit(&self, live: &RoundSnapshot, intent: &mut BetIntent) -> Result<Accepted, Rejection> {
        let outcome = self.validate(live, intent);
        match &outcome {
            Ok(accepted) => {
                info!(
                    "Gate accepted {} on {} at {} for round {}",
                    accepted.stake, accepted.market, accepted.odds, accepted.round_id
                );
                intent.status = SubmissionStatus::Accepted;
            }
            Err(reason) => {
                debug!(
                    market = intent.market.as_str(),
                    stake = intent.stake_amount,
                    game_state = %live.game_state(),
                    "Gate rejected stake: {}",
                    reason
                );
                intent.status = SubmissionStatus::Rejected(reason.clone());
            }
        }
        outcome
    }

    fn validate(&self, live: &RoundSnapshot, intent: &BetIntent) -> Result<Accepted, Rejection> {
        let stake = u64::try_from(intent.stake_amount)
            .ok()
            .filter(|s| *s > 0 && (self.limits.min..=self.limits.max).contains(s))
            .ok_or(Rejection::InvalidAmount)?;

        if !live.is_betting_open() {
            return Err(Rejection::RoundClosed);
        }
        let round_id = match (&live.round_id, &intent.round_id) {
            (Some(live_id), Some(intent_id)) if live_id == intent_id => live_id.clone(),
            (Some(live_id), None) => live_id.clone(),
            _ => return Err(Rejection::RoundClosed),
        };

        match self.catalog.find(&intent.market) {
            Some(market) if market.odds == intent.odds => {}
            _ => return Err(Rejection::UnknownMarket(intent.market.clone())),
        }

        Ok(Accepted {
            market: intent.market.clone(),
            odds: intent.odds.clone(),
            stake,
            round_id,
        })
    }
}

impl Default for BetGate {
    fn default() -> Self {
        BetGate::new(MarketCatalog::lucky_seven(), StakeLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RoundPhase;

    fn snapshot(round_id: &str, phase: RoundPhase) -> RoundSnapshot {
        RoundSnapshot {
            round_id: Some(round_id.into()),
            phase: Some(phase),
            timer_seconds: 10,
            ..RoundSnapshot::idle()
        }
    }

    fn intent(market: &str, odds: &str, round_id: &str, stake: i64) -> BetIntent {
        BetIntent::new(market, odds, Some(round_id.into())).with_stake(stake)
    }

    #[test]
    fn accepts_valid_stake_in_open_round() {
        let gate = BetGate::default();
        let mut bet = intent("7 UP", "3.75", "R1", 500);
        let accepted = gate
            .submit(&snapshot("R1", RoundPhase::Betting), &mut bet)
            .unwrap();
        assert_eq!(
            accepted,
            Accepted {
                market: "7 UP".into(),
                odds: "3.75".into(),
                stake: 500,
                round_id: "R1".into(),
            }
        );
        assert_eq!(bet.status, SubmissionStatus::Accepted);
    }

    #[test]
    fn non_positive_stake_is_invalid_in_every_state() {
        let gate = BetGate::default();
        let states = [
            RoundSnapshot::idle(),
            snapshot("R1", RoundPhase::Betting),
            snapshot("R1", RoundPhase::Locked),
            snapshot("R1", RoundPhase::Settled),
            RoundSnapshot {
                disconnected: true,
                ..snapshot("R1", RoundPhase::Betting)
            },
        ];
        for live in &states {
            for stake in [0, -1, -500, i64::MIN] {
                let mut bet = intent("7", "3.75", "R1", stake);
                assert_eq!(
                    gate.submit(live, &mut bet),
                    Err(Rejection::InvalidAmount),
                    "stake {stake} in {}",
                    live.game_state()
                );
                assert_eq!(
                    bet.status,
                    SubmissionStatus::Rejected(Rejection::InvalidAmount)
                );
            }
        }
    }

    #[test]
    fn stake_outside_configured_limits_is_invalid() {
        let gate = BetGate::new(MarketCatalog::lucky_seven(), StakeLimits { min: 100, max: 5000 });
        let live = snapshot("R1", RoundPhase::Betting);
        for stake in [99, 5001] {
            let mut bet = intent("RED", "3.75", "R1", stake);
            assert_eq!(gate.submit(&live, &mut bet), Err(Rejection::InvalidAmount));
        }
        for stake in [100, 5000] {
            let mut bet = intent("RED", "3.75", "R1", stake);
            assert!(gate.submit(&live, &mut bet).is_ok());
        }
    }

    #[test]
    fn closed_round_is_rejected() {
        let gate = BetGate::default();
        for phase in [RoundPhase::Locked, RoundPhase::Resolving, RoundPhase::Settled] {
            let mut bet = intent("7 DOWN", "3.75", "R1", 500);
            assert_eq!(
                gate.submit(&snapshot("R1", phase), &mut bet),
                Err(Rejection::RoundClosed)
            );
        }
    }

    #[test]
    fn idle_and_disconnected_are_closed() {
        let gate = BetGate::default();
        let mut bet = BetIntent::new("7", "3.75", None).with_stake(500);
        assert_eq!(
            gate.submit(&RoundSnapshot::idle(), &mut bet),
            Err(Rejection::RoundClosed)
        );

        let disconnected = RoundSnapshot {
            disconnected: true,
            ..snapshot("R1", RoundPhase::Betting)
        };
        let mut bet = intent("7", "3.75", "R1", 500);
        assert_eq!(
            gate.submit(&disconnected, &mut bet),
            Err(Rejection::RoundClosed)
        );
    }

    #[test]
    fn intent_from_previous_round_is_closed() {
        let gate = BetGate::default();
        let mut bet = intent("EVEN", "3.75", "R1", 500);
        assert_eq!(
            gate.submit(&snapshot("R2", RoundPhase::Betting), &mut bet),
            Err(Rejection::RoundClosed)
        );
    }

    #[test]
    fn intent_without_round_binds_to_live_round() {
        let gate = BetGate::default();
        let mut bet = BetIntent::new("ODD", "3.75", None).with_stake(100);
        let accepted = gate
            .submit(&snapshot("R5", RoundPhase::Betting), &mut bet)
            .unwrap();
        assert_eq!(accepted.round_id, "R5");
    }

    #[test]
    fn amount_check_wins_over_round_check() {
        let gate = BetGate::default();
        let mut bet = intent("7", "3.75", "R1", 0);
        assert_eq!(
            gate.submit(&snapshot("R1", RoundPhase::Locked), &mut bet),
            Err(Rejection::InvalidAmount)
        );
    }

    #[test]
    fn round_check_wins_over_market_check() {
        let gate = BetGate::default();
        let mut bet = intent("JOKER", "99", "R1", 500);
        assert_eq!(
            gate.submit(&snapshot("R1", RoundPhase::Locked), &mut bet),
            Err(Rejection::RoundClosed)
        );
    }

    #[test]
    fn unknown_market_or_stale_odds_are_rejected() {
        let gate = BetGate::default();
        let live = snapshot("R1", RoundPhase::Betting);

        let mut bet = intent("JOKER", "3.75", "R1", 500);
        assert_eq!(
            gate.submit(&live, &mut bet),
            Err(Rejection::UnknownMarket("JOKER".into()))
        );

        let mut bet = intent("7 UP", "3.7500", "R1", 500);
        assert_eq!(
            gate.submit(&live, &mut bet),
            Err(Rejection::UnknownMarket("7 UP".into()))
        );
    }
}
