pub mod pcr;
pub mod threshold;

pub use pcr::{aggregate, OptionChain, StrikeOi};
pub use threshold::evaluate;
