//! Test constants shared by every e2e suite

pub const TEST_USER_ID: usize = 1;
pub const OTHER_USER_ID: usize = 2;

// 16 episodes of 60 minutes, Drama + Fantasy
pub const GUARDIAN_ID: i64 = 42;
pub const GUARDIAN_NAME: &str = "Guardian: The Lonely and Great God";
pub const GUARDIAN_EPISODES: u32 = 16;
pub const GUARDIAN_RUNTIME: u32 = 960;

// 16 episodes of 70 minutes, Thriller
pub const SIGNAL_ID: i64 = 7;
pub const SIGNAL_RUNTIME: u32 = 1120;

// 12 episodes of 45 minutes, Romance + Comedy
pub const CRASH_LANDING_ID: i64 = 9;

/// Present in no catalog.
pub const UNKNOWN_TITLE_ID: i64 = 999;

/// First id of a block of plain dramas, see `create_test_catalog`.
pub const FILLER_FIRST_ID: i64 = 100;
pub const FILLER_COUNT: i64 = 30;

pub const ACTOR_GONG_YOO: &str = "Gong Yoo";
