pub mod nearest;

pub use nearest::{midpoint, nearest_per_group};
