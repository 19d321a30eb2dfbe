// Round state: the reconciled snapshot and the reducer that maintains it.

pub mod merger;
pub mod snapshot;

pub use merger::{reduce, MergeEffects, MergerState, RoundEvent, RoundMerger};
pub use snapshot::{GameState, RoundSnapshot};
