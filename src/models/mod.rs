mod action;
mod counters;
mod decision;
mod limit;

pub use action::*;
pub use counters::*;
pub use decision::*;
pub use limit::*;
