pub mod engine;
pub mod hub;
pub mod netting;
pub mod proposal;
pub mod reconciliation;
pub mod subset;
