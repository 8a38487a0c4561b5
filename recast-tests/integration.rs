//! Integration tests for Recast
//!
//! Drive complete conversions through the simulated codec platform: the
//! surface and buffer pipelines, the encoder strategy chain, audio
//! passthrough, failure handling and the request service.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/end_to_end.rs"]
mod end_to_end;
#[path = "integration/failures.rs"]
mod failures;
#[path = "integration/fallback.rs"]
mod fallback;
#[path = "integration/service.rs"]
mod service;
#[path = "integration/strategy_chain.rs"]
mod strategy_chain;
