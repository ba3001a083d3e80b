pub mod combiner;

pub use combiner::{aggregate, base_weight, rank, AGREEMENT_BONUS, NOISE_FLOOR, RESIDUAL_WEIGHT};
