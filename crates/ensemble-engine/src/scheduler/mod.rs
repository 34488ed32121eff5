//! Resolution scheduling
//!
//! Request/response surface plus the resolver that drives graph-ordered
//! execution, freshness checks and joins for each requested row.

mod request;
mod resolver;

pub use request::{
    RequestRow, ResolutionMode, ResolutionRequest, ResolutionResponse, ResolutionState, RowError,
    RowResult,
};
pub use resolver::Resolver;

#[cfg(test)]
mod tests;
