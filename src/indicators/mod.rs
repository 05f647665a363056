// Technical indicators module
pub mod moving_average;

pub use moving_average::{mean, trailing_mean};
