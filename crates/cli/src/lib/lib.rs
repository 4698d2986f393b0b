pub mod dev;
pub mod env;
pub mod logging;
pub mod trace;

/// Exit codes shared by every binary.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const INVALID_ARGUMENTS: i32 = 1;
    pub const TEST_FAILURE: i32 = 2;
    pub const LOAD_FAILURE: i32 = 3;
}
