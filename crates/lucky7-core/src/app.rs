// Application state and orchestration logic.
//
// A single event loop owns the round merger, countdown, notifier and bet
// selection. It consumes connection-channel events, channel state changes,
// user commands, the countdown tick and the toast deadline, and pushes UI
// updates to whatever front end is attached.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::account::AccountService;
use crate::bet::{parse_stake, BetIntent, BetReceipt, Rejection, SubmissionStatus};
use crate::channel::{ChannelEvent, ChannelState};
use crate::config::Config;
use crate::countdown::Countdown;
use crate::gate::BetGate;
use crate::market::MarketCatalog;
use crate::notifier::{Notifier, ToastKind};
use crate::round::{MergeEffects, RoundEvent, RoundMerger, RoundSnapshot};

// ---------------------------------------------------------------------------
// Commands and UI updates
// ---------------------------------------------------------------------------

/// Commands from the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Open the bet slip for a market.
    SelectMarket(String),
    ClearSelection,
    /// Submit the open selection with a user-entered stake.
    PlaceBet(String),
    Quit,
}

/// What the countdown and round header should show.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundView {
    pub snapshot: RoundSnapshot,
    pub display_seconds: u32,
    pub hidden: bool,
}

/// Updates pushed to the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    Round(RoundView),
    Connection(ChannelState),
    /// Current toast text, or `None` once it is dismissed.
    Toast(Option<String>),
    Selection(Option<BetIntent>),
    BetResult(Result<BetReceipt, Rejection>),
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    merger: RoundMerger,
    countdown: Countdown,
    notifier: Notifier,
    gate: BetGate,
    account: Arc<dyn AccountService>,
    selection: Option<BetIntent>,
    presets: Vec<u64>,
    tick_interval: Duration,
}

impl AppState {
    pub fn new(
        gate: BetGate,
        account: Arc<dyn AccountService>,
        notifier: Notifier,
        tick_interval: Duration,
    ) -> Self {
        AppState {
            merger: RoundMerger::new(),
            countdown: Countdown::new(),
            notifier,
            gate,
            account,
            selection: None,
            presets: Vec::new(),
            tick_interval,
        }
    }

    pub fn from_config(config: &Config, account: Arc<dyn AccountService>) -> Self {
        let gate = BetGate::new(MarketCatalog::lucky_seven(), config.stake_limits());
        let mut state = AppState::new(
            gate,
            account,
            Notifier::new(config.toast_duration()),
            config.tick_interval(),
        );
        state.presets = config.client.stakes.presets.clone();
        state
    }

    pub fn snapshot(&self) -> &RoundSnapshot {
        self.merger.snapshot()
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn selection(&self) -> Option<&BetIntent> {
        self.selection.as_ref()
    }

    pub fn catalog(&self) -> &MarketCatalog {
        self.gate.catalog()
    }

    /// Quick-stake amounts offered on the bet slip.
    pub fn presets(&self) -> &[u64] {
        &self.presets
    }

    pub fn round_view(&self) -> RoundView {
        let snapshot = self.merger.snapshot().clone();
        let hidden = Countdown::is_hidden(snapshot.game_state());
        RoundView {
            display_seconds: self.countdown.display_seconds(),
            hidden,
            snapshot,
        }
    }

    /// Fold one channel event into the round state.
    ///
    /// Resyncs the countdown on authoritative timer values, drops a selection
    /// made in a previous round, and raises the betting-opened toast.
    pub fn apply_event(&mut self, event: ChannelEvent, now: Instant) -> MergeEffects {
        let event = match event {
            ChannelEvent::Server(server) => RoundEvent::from(server),
            ChannelEvent::ConnectionLost => RoundEvent::ConnectionLost,
            ChannelEvent::ConnectionRestored => RoundEvent::ConnectionRestored,
        };
        let effects = self.merger.apply(event, now);

        if effects.synced {
            self.countdown.resync_from(self.merger.snapshot());
        }

        if effects.round_changed {
            let live = self.merger.snapshot().round_id.clone();
            if self.selection.as_ref().is_some_and(|s| s.round_id != live) {
                info!("Round changed, discarding open selection");
                self.selection = None;
            }
        }

        if effects.betting_opened {
            let round = self.merger.snapshot().round_id.as_deref().unwrap_or("-");
            self.notifier.show(
                ToastKind::BettingOpened,
                format!("Betting is open for round {round}"),
                now,
            );
        }

        effects
    }

    /// Advance the countdown one interval. Returns whether the display
    /// changed.
    pub fn tick(&mut self) -> bool {
        self.countdown.tick(self.merger.snapshot().game_state())
    }

    /// Open a bet slip for `market`, bound to the round that is live now.
    pub fn select_market(&mut self, market: &str) -> Result<&BetIntent, Rejection> {
        let round_id = self.merger.snapshot().round_id.clone();
        let intent = BetIntent::select(self.gate.catalog(), market, round_id)?;
        debug!("Selected market {} at {}", intent.market, intent.odds);
        Ok(self.selection.insert(intent))
    }

    pub fn clear_selection(&mut self) -> bool {
        self.selection.take().is_some()
    }

    /// The single authoritative checkpoint for a stake. Reads the live
    /// snapshot at call time, runs the gate, then reserves the stake with the
    /// account service.
    pub async fn submit(&self, intent: &mut BetIntent) -> Result<BetReceipt, Rejection> {
        let accepted = self.gate.submit(self.merger.snapshot(), intent)?;

        if let Err(e) = self.account.reserve_stake(accepted.stake).await {
            let reason = Rejection::from(e);
            warn!("Stake reservation refused: {}", reason);
            intent.status = SubmissionStatus::Rejected(reason.clone());
            return Err(reason);
        }

        Ok(BetReceipt {
            market: accepted.market,
            odds: accepted.odds,
            stake: accepted.stake,
            round_id: accepted.round_id,
            placed_at: Utc::now(),
        })
    }

    /// Submit the open selection with a user-entered stake and raise the
    /// matching toast. Returns `None` when no market is selected.
    ///
    /// After an invalid amount or insufficient funds the selection stays open
    /// for another try; any other outcome closes it.
    pub async fn place_bet(
        &mut self,
        amount_text: &str,
        now: Instant,
    ) -> Option<Result<BetReceipt, Rejection>> {
        let Some(selected) = self.selection.clone() else {
            debug!("Place bet with no market selected, ignoring");
            return None;
        };

        let mut intent = selected;
        let outcome = match parse_stake(amount_text) {
            Ok(stake) => {
                intent.stake_amount = stake;
                self.submit(&mut intent).await
            }
            Err(reason) => {
                intent.status = SubmissionStatus::Rejected(reason.clone());
                Err(reason)
            }
        };

        match &outcome {
            Ok(receipt) => {
                info!("{}", receipt.summary());
                self.notifier
                    .show(ToastKind::BetPlaced, receipt.summary(), now);
                self.selection = None;
            }
            Err(reason) => {
                self.notifier
                    .show(ToastKind::BetRejected, reason.to_string(), now);
                self.selection = match reason {
                    Rejection::InvalidAmount | Rejection::InsufficientFunds { .. } => Some(intent),
                    _ => None,
                };
            }
        }

        Some(outcome)
    }

    fn toast_text(&self) -> Option<String> {
        self.notifier.current().map(|t| t.text.clone())
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run the application event loop until `Quit` or until the channel or the
/// command source goes away.
pub async fn run(
    mut events_rx: mpsc::Receiver<ChannelEvent>,
    mut channel_state: watch::Receiver<ChannelState>,
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    ui_tx: mpsc::Sender<UiUpdate>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("Application event loop started");

    let mut state_open = true;
    let initial = *channel_state.borrow_and_update();
    let _ = ui_tx.send(UiUpdate::Connection(initial)).await;
    let _ = ui_tx.send(UiUpdate::Round(state.round_view())).await;

    let mut ticker = tokio::time::interval(state.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; consume it so the countdown
    // moves one full interval after start.
    ticker.tick().await;

    loop {
        let deadline = state.notifier.deadline();

        tokio::select! {
            // --- Channel events ---
            event = events_rx.recv() => {
                match event {
                    Some(event) => {
                        let toast_before = state.toast_text();
                        let selection_before = state.selection.is_some();
                        let effects = state.apply_event(event, Instant::now());
                        if effects.synced {
                            ticker.reset();
                        }
                        let _ = ui_tx.send(UiUpdate::Round(state.round_view())).await;
                        if selection_before && state.selection.is_none() {
                            let _ = ui_tx.send(UiUpdate::Selection(None)).await;
                        }
                        let toast_after = state.toast_text();
                        if toast_after != toast_before || effects.betting_opened {
                            let _ = ui_tx.send(UiUpdate::Toast(toast_after)).await;
                        }
                    }
                    None => {
                        info!("Connection channel closed, shutting down");
                        break;
                    }
                }
            }

            // --- Channel state (only poll while the sender is alive) ---
            changed = channel_state.changed(), if state_open => {
                match changed {
                    Ok(()) => {
                        let current = *channel_state.borrow_and_update();
                        let _ = ui_tx.send(UiUpdate::Connection(current)).await;
                    }
                    Err(_) => {
                        debug!("Channel state sender dropped");
                        state_open = false;
                    }
                }
            }

            // --- User commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UserCommand::Quit) => {
                        info!("Quit command received, shutting down");
                        break;
                    }
                    Some(cmd) => handle_user_command(&mut state, cmd, &ui_tx).await,
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }

            // --- Countdown tick ---
            _ = ticker.tick() => {
                if state.tick() {
                    let _ = ui_tx.send(UiUpdate::Round(state.round_view())).await;
                }
            }

            // --- Toast expiry ---
            _ = sleep_until_deadline(deadline) => {
                if state.notifier.dismiss_expired(Instant::now()) {
                    let _ = ui_tx.send(UiUpdate::Toast(None)).await;
                }
            }
        }
    }

    if state.notifier.clear() {
        let _ = ui_tx.send(UiUpdate::Toast(None)).await;
    }
    info!("Application event loop stopped");
    Ok(())
}

async fn handle_user_command(state: &mut AppState, cmd: UserCommand, ui_tx: &mpsc::Sender<UiUpdate>) {
    match cmd {
        UserCommand::SelectMarket(market) => match state.select_market(&market) {
            Ok(intent) => {
                let intent = intent.clone();
                let _ = ui_tx.send(UiUpdate::Selection(Some(intent))).await;
            }
            Err(reason) => {
                warn!("Selection refused: {}", reason);
                let _ = ui_tx.send(UiUpdate::BetResult(Err(reason))).await;
            }
        },
        UserCommand::ClearSelection => {
            if state.clear_selection() {
                let _ = ui_tx.send(UiUpdate::Selection(None)).await;
            }
        }
        UserCommand::PlaceBet(amount) => {
            let Some(outcome) = state.place_bet(&amount, Instant::now()).await else {
                return;
            };
            let _ = ui_tx.send(UiUpdate::BetResult(outcome)).await;
            let _ = ui_tx
                .send(UiUpdate::Selection(state.selection.clone()))
                .await;
            let _ = ui_tx.send(UiUpdate::Toast(state.toast_text())).await;
        }
        UserCommand::Quit => {}
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::InMemoryWallet;
    use crate::gate::StakeLimits;
    use crate::protocol::{decode_frame, ServerEvent};

    fn server(frame: &str) -> ChannelEvent {
        let event: ServerEvent = decode_frame(frame).unwrap().unwrap();
        ChannelEvent::Server(event)
    }

    fn init(round: &str, phase: &str, timer: u32) -> ChannelEvent {
        server(&format!(
            r#"{{"event":"init","data":{{"roundId":"{round}","gameState":"{phase}","timerSeconds":{timer}}}}}"#
        ))
    }

    fn state_with_balance(balance: u64) -> AppState {
        AppState::new(
            BetGate::new(MarketCatalog::lucky_seven(), StakeLimits { min: 1, max: 100_000 }),
            Arc::new(InMemoryWallet::new(balance)),
            Notifier::default(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn init_resyncs_countdown_and_opens_betting_toast() {
        let mut state = state_with_balance(1000);
        let effects = state.apply_event(init("R1", "betting", 15), Instant::now());

        assert!(effects.synced && effects.betting_opened);
        assert_eq!(state.countdown().display_seconds(), 15);
        assert!(!state.round_view().hidden);
        assert_eq!(
            state.notifier().current().unwrap().kind,
            ToastKind::BettingOpened
        );
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_hidden_until_first_event_and_while_disconnected() {
        let mut state = state_with_balance(1000);
        assert!(state.round_view().hidden);

        state.apply_event(init("R1", "betting", 15), Instant::now());
        state.apply_event(ChannelEvent::ConnectionLost, Instant::now());
        let view = state.round_view();
        assert!(view.hidden);
        assert_eq!(view.snapshot.round_id.as_deref(), Some("R1"));
        assert!(!state.tick(), "countdown must freeze while disconnected");
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_bet_debits_wallet_and_closes_selection() {
        let wallet = Arc::new(InMemoryWallet::new(1000));
        let mut state = AppState::new(
            BetGate::default(),
            wallet.clone(),
            Notifier::default(),
            Duration::from_secs(1),
        );
        state.apply_event(init("R1", "betting", 15), Instant::now());
        state.select_market("7 UP").unwrap();

        let receipt = state
            .place_bet("500", Instant::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.round_id, "R1");
        assert_eq!(receipt.stake, 500);
        assert!(state.selection().is_none());
        assert_eq!(wallet.balance().await.unwrap(), 500);
        assert_eq!(
            state.notifier().current().unwrap().text,
            "Placed bet of ₹500 on 7 UP at 3.75"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn locked_round_rejects_and_closes_selection() {
        let mut state = state_with_balance(1000);
        state.apply_event(init("R1", "betting", 15), Instant::now());
        state.select_market("RED").unwrap();
        state.apply_event(
            server(r#"{"event":"round:update","data":{"gameState":"locked"}}"#),
            Instant::now(),
        );

        let outcome = state.place_bet("500", Instant::now()).await.unwrap();
        assert_eq!(outcome, Err(Rejection::RoundClosed));
        assert!(state.selection().is_none());
        assert_eq!(
            state.notifier().current().unwrap().kind,
            ToastKind::BetRejected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bad_amount_and_insufficient_funds_keep_selection_open() {
        let mut state = state_with_balance(300);
        state.apply_event(init("R1", "betting", 15), Instant::now());
        state.select_market("7").unwrap();

        let outcome = state.place_bet("abc", Instant::now()).await.unwrap();
        assert_eq!(outcome, Err(Rejection::InvalidAmount));
        assert_eq!(
            state.selection().unwrap().status,
            SubmissionStatus::Rejected(Rejection::InvalidAmount)
        );

        let outcome = state.place_bet("500", Instant::now()).await.unwrap();
        assert_eq!(
            outcome,
            Err(Rejection::InsufficientFunds {
                needed: 500,
                available: 300
            })
        );
        assert!(state.selection().is_some());

        assert!(state.place_bet("300", Instant::now()).await.unwrap().is_ok());
        assert!(state.selection().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn place_bet_without_selection_is_ignored() {
        let mut state = state_with_balance(1000);
        state.apply_event(init("R1", "betting", 15), Instant::now());
        assert!(state.place_bet("500", Instant::now()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn new_round_discards_selection_from_previous_round() {
        let mut state = state_with_balance(1000);
        state.apply_event(init("R1", "betting", 15), Instant::now());
        state.select_market("EVEN").unwrap();

        state.apply_event(
            server(r#"{"event":"round:start","data":{"roundId":"R2","gameState":"betting","timerSeconds":15}}"#),
            Instant::now(),
        );
        assert!(state.selection().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_ticks_countdown_down_to_zero() {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (_state_tx, state_rx) = watch::channel(ChannelState::Open);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (ui_tx, mut ui_rx) = mpsc::channel(256);

        let handle = tokio::spawn(run(events_rx, state_rx, cmd_rx, ui_tx, state_with_balance(0)));

        events_tx.send(init("R1", "betting", 15)).await.unwrap();

        let mut last_seconds = None;
        while let Some(update) = ui_rx.recv().await {
            if let UiUpdate::Round(view) = update {
                if view.snapshot.round_id.is_some() {
                    last_seconds = Some(view.display_seconds);
                    if view.display_seconds == 0 {
                        break;
                    }
                }
            }
        }
        assert_eq!(last_seconds, Some(0));

        // Frozen at zero: further ticks send nothing new.
        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(update) = ui_rx.try_recv() {
            assert!(!matches!(update, UiUpdate::Round(_)), "unexpected {update:?}");
        }

        cmd_tx.send(UserCommand::Quit).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_dismisses_toast_after_deadline() {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (_state_tx, state_rx) = watch::channel(ChannelState::Open);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (ui_tx, mut ui_rx) = mpsc::channel(256);

        let handle = tokio::spawn(run(events_rx, state_rx, cmd_rx, ui_tx, state_with_balance(0)));
        events_tx.send(init("R1", "betting", 15)).await.unwrap();

        let mut shown_at = None;
        while let Some(update) = ui_rx.recv().await {
            match update {
                UiUpdate::Toast(Some(_)) => shown_at = Some(Instant::now()),
                UiUpdate::Toast(None) => break,
                _ => {}
            }
        }
        let shown_at = shown_at.expect("toast shown");
        assert_eq!(Instant::now() - shown_at, Duration::from_secs(3));

        cmd_tx.send(UserCommand::Quit).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_clears_visible_toast_on_quit() {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (_state_tx, state_rx) = watch::channel(ChannelState::Open);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (ui_tx, mut ui_rx) = mpsc::channel(256);

        let handle = tokio::spawn(run(events_rx, state_rx, cmd_rx, ui_tx, state_with_balance(0)));
        events_tx.send(init("R1", "betting", 15)).await.unwrap();

        loop {
            if let UiUpdate::Toast(Some(_)) = ui_rx.recv().await.unwrap() {
                break;
            }
        }
        let shown_at = Instant::now();

        cmd_tx.send(UserCommand::Quit).await.unwrap();
        handle.await.unwrap().unwrap();
        assert!(Instant::now() - shown_at < Duration::from_secs(3));

        let mut remaining = Vec::new();
        while let Some(update) = ui_rx.recv().await {
            remaining.push(update);
        }
        assert_eq!(remaining.last(), Some(&UiUpdate::Toast(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_forwards_connection_state() {
        let (_events_tx, events_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (ui_tx, mut ui_rx) = mpsc::channel(64);

        let handle = tokio::spawn(run(events_rx, state_rx, cmd_rx, ui_tx, state_with_balance(0)));
        assert_eq!(
            ui_rx.recv().await.unwrap(),
            UiUpdate::Connection(ChannelState::Connecting)
        );

        state_tx.send(ChannelState::Open).unwrap();
        loop {
            if let UiUpdate::Connection(s) = ui_rx.recv().await.unwrap() {
                assert_eq!(s, ChannelState::Open);
                break;
            }
        }

        drop(cmd_tx);
        handle.await.unwrap().unwrap();
    }
}
