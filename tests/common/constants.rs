//! Shared constants for end-to-end tests
//!
//! When the seeded listings change, update only this file and `fixtures.rs`.

// ============================================================================
// Seeded catalog keys
// ============================================================================

/// "Toy Story" (1995), G, gentle scores.
pub const TOY_STORY_KEY: &str = "tt0114709";

/// "The Dark Knight" (2008), PG-13, violent.
pub const DARK_KNIGHT_KEY: &str = "tt0468569";

/// "Deadpool" (2016), R, high on every category.
pub const DEADPOOL_KEY: &str = "tt1431045";

/// "Seven" (1995). Listed as "Se7en", which lands in the review band.
pub const SEVEN_KEY: &str = "tt0114369";

/// Entries accepted automatically by the seeding cycle.
pub const AUTO_ACCEPTED_COUNT: usize = 3;

/// Listings the seeding cycle reads, including the unmatched one.
pub const SEEDED_LISTING_COUNT: usize = 5;

// ============================================================================
// Timeouts
// ============================================================================

pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;
pub const REQUEST_TIMEOUT_SECS: u64 = 10;
pub const REFRESH_WAIT_TIMEOUT_MS: u64 = 10_000;
