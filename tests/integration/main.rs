//! Integration tests.
//!
//! Wire the component graph over a deterministic in-memory chain and
//! replay the literal rebalancing scenarios end to end.

mod engine_flow;
mod mock_chain;
mod scenarios;
