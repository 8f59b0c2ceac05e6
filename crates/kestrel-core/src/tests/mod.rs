//! Test module for kestrel-core
//!
//! Scenario tests that drive several components together:
//! - Routing of keyword-scoped and global queries
//! - Timeouts, faults and stale generations end to end
//! - Ranking with weight and history boosts
//! - Plugin lifecycle through the engine
//! - Configuration loading and validation

mod routing_tests;
