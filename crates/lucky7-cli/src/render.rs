// Plain-text rendering of UI updates for the headless client.

use lucky7_core::app::{RoundView, UiUpdate};
use lucky7_core::channel::ChannelState;
use lucky7_core::market::{MarketCatalog, MarketGroup};

pub fn render(update: &UiUpdate) -> String {
    match update {
        UiUpdate::Round(view) => render_round(view),
        UiUpdate::Connection(state) => format!("[connection] {}", connection_label(*state)),
        UiUpdate::Toast(Some(text)) => format!(">> {text}"),
        UiUpdate::Toast(None) => String::new(),
        UiUpdate::Selection(Some(intent)) => {
            format!("[slip] {} @ {}", intent.market, intent.odds)
        }
        UiUpdate::Selection(None) => "[slip] closed".to_string(),
        UiUpdate::BetResult(Ok(receipt)) => {
            format!("[bet] {} (round {})", receipt.summary(), receipt.round_id)
        }
        UiUpdate::BetResult(Err(reason)) => format!("[bet] rejected: {reason}"),
    }
}

fn render_round(view: &RoundView) -> String {
    let snap = &view.snapshot;
    let round = snap.round_id.as_deref().unwrap_or("-");
    if view.hidden {
        return format!("[round {round}] {}", snap.game_state());
    }
    format!(
        "[round {round}] {} {:>2}s",
        snap.game_state(),
        view.display_seconds
    )
}

fn connection_label(state: ChannelState) -> &'static str {
    match state {
        ChannelState::Connecting => "connecting",
        ChannelState::Open => "open",
        ChannelState::Disconnected => "disconnected, reconnecting",
    }
}

/// Market board, grouped the way the bet grid lays it out.
pub fn render_markets(catalog: &MarketCatalog, presets: &[u64]) -> String {
    let mut out = String::new();
    for group in MarketGroup::ALL {
        let line = catalog
            .in_group(group)
            .map(|m| format!("{} {}", m.id, m.odds))
            .collect::<Vec<_>>()
            .join(" | ");
        out.push_str(&format!("{}: {}\n", group.title(), line));
    }
    let presets = presets
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}={}", i + 1, p))
        .collect::<Vec<_>>()
        .join(" ");
    out.push_str(&format!("Quick stakes: {presets}"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucky7_core::bet::{BetIntent, Rejection};
    use lucky7_core::protocol::RoundPhase;
    use lucky7_core::round::RoundSnapshot;

    fn view(phase: Option<RoundPhase>, seconds: u32, hidden: bool) -> RoundView {
        RoundView {
            snapshot: RoundSnapshot {
                round_id: Some("R1".into()),
                phase,
                timer_seconds: seconds,
                ..RoundSnapshot::idle()
            },
            display_seconds: seconds,
            hidden,
        }
    }

    #[test]
    fn round_shows_countdown_only_when_visible() {
        assert_eq!(
            render(&UiUpdate::Round(view(Some(RoundPhase::Betting), 9, false))),
            "[round R1] betting  9s"
        );
        let mut hidden = view(Some(RoundPhase::Betting), 9, true);
        hidden.snapshot.disconnected = true;
        assert_eq!(render(&UiUpdate::Round(hidden)), "[round R1] disconnected");
    }

    #[test]
    fn slip_and_rejection_lines() {
        let intent = BetIntent::new("7 UP", "3.75", Some("R1".into()));
        assert_eq!(
            render(&UiUpdate::Selection(Some(intent))),
            "[slip] 7 UP @ 3.75"
        );
        assert_eq!(
            render(&UiUpdate::BetResult(Err(Rejection::InvalidAmount))),
            "[bet] rejected: Please enter a valid amount"
        );
    }

    #[test]
    fn markets_board_lists_every_group_and_presets() {
        let board = render_markets(&MarketCatalog::lucky_seven(), &[100, 500, 1000]);
        assert!(board.starts_with("Main Market: 7 UP 3.75 | 7 DOWN 3.75 | 7 3.75\n"));
        assert_eq!(board.lines().count(), MarketGroup::ALL.len() + 1);
        assert!(board.ends_with("Quick stakes: 1=100 2=500 3=1000"));
    }
}
