//! CLI command implementations
//!
//! Every handler returns the process exit code:
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | success, or a partial run at or above `min_success_rate` |
//! | 1 | partial run below `min_success_rate` |
//! | 2 | configuration error |
//! | 3 | input error |
//! | 4 | connection error |
//! | 5 | failed run or fatal error |
//! | 130 | interrupted by a shutdown signal |

pub mod check;
pub mod init;
pub mod run;
pub mod status;
pub mod validate;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_INPUT: i32 = 3;
pub const EXIT_CONNECTION: i32 = 4;
pub const EXIT_FATAL: i32 = 5;
pub const EXIT_INTERRUPTED: i32 = 130;
