// Lucky Seven round-state synchronization engine.
//
// Keeps a local view of the live round consistent with the server's pushed
// feed and gates stake submissions on it.

pub mod account;
pub mod app;
pub mod bet;
pub mod channel;
pub mod config;
pub mod countdown;
pub mod gate;
pub mod market;
pub mod notifier;
pub mod protocol;
pub mod round;
