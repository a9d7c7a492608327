mod condition;
mod config;
mod environment;
mod eval;
mod feature;
mod feature_state;
mod filter;
pub mod hashing;
mod identity;
mod multivariate;
mod priority;
mod segment;
mod store;
mod test_common;
mod util;
mod value;

pub use condition::*;
pub use config::*;
pub use environment::*;
pub use eval::*;
pub use feature::*;
pub use feature_state::*;
pub use filter::Filter;
pub use identity::*;
pub use multivariate::{resolve as resolve_multivariate, MultivariateOutcome};
pub use priority::*;
pub use segment::*;
pub use store::*;
pub use value::*;
