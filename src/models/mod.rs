// Models module - Promotion entity and its wire representation

pub mod promotion;

pub use promotion::{Promotion, PromotionState, PromotionType};
