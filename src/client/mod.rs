//! Outbound API clients.

pub mod gamma;

pub use gamma::{derive_window, GammaClient, ResolvedMarket, SlotWindow};
