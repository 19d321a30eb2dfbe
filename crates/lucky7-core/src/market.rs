// Lucky Seven market catalog.
//
// Odds are carried as the exact decimal text shown to the user; this client
// never computes or rounds them.

/// Section of the board a market belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketGroup {
    Main,
    CardSelection,
    Trio,
    SingleCard,
}

impl MarketGroup {
    pub const ALL: [MarketGroup; 4] = [
        MarketGroup::Main,
        MarketGroup::CardSelection,
        MarketGroup::Trio,
        MarketGroup::SingleCard,
    ];

    pub fn title(self) -> &'static str {
        match self {
            MarketGroup::Main => "Main Market",
            MarketGroup::CardSelection => "Card Selection",
            MarketGroup::Trio => "Trio Cards",
            MarketGroup::SingleCard => "Single Card",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    /// Market identifier, also its display label (e.g. "7 UP").
    pub id: String,
    /// Decimal odds as exact text (e.g. "3.75").
    pub odds: String,
    pub group: MarketGroup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketCatalog {
    markets: Vec<Market>,
}

impl MarketCatalog {
    /// The standard Lucky Seven board.
    pub fn lucky_seven() -> Self {
        let mut markets = Vec::new();
        push_group(&mut markets, MarketGroup::Main, &["7 UP", "7 DOWN", "7"], "3.75");
        push_group(
            &mut markets,
            MarketGroup::CardSelection,
            &["RED", "BLACK", "ODD", "EVEN"],
            "3.75",
        );
        push_group(
            &mut markets,
            MarketGroup::Trio,
            &["A,2,3", "4,5,6", "8,9,10", "J,Q,K"],
            "3.8",
        );
        push_group(
            &mut markets,
            MarketGroup::SingleCard,
            &["A", "2", "3", "4", "5", "6", "8", "9", "J", "Q", "K"],
            "12",
        );
        MarketCatalog { markets }
    }

    pub fn find(&self, id: &str) -> Option<&Market> {
        self.markets.iter().find(|m| m.id == id)
    }

    pub fn in_group(&self, group: MarketGroup) -> impl Iterator<Item = &Market> {
        self.markets.iter().filter(move |m| m.group == group)
    }
}

fn push_group(markets: &mut Vec<Market>, group: MarketGroup, ids: &[&str], odds: &str) {
    markets.extend(ids.iter().map(|id| Market {
        id: (*id).to_string(),
        odds: odds.to_string(),
        group,
    }));
}

impl Default for MarketCatalog {
    fn default() -> Self {
        Self::lucky_seven()
    }
}
