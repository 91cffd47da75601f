//! Turning submitted trade records into a verified [`TradeSet`].
//!
//! [`TradeSet`]: crate::core::trade::TradeSet

pub mod loader;
pub mod record;
