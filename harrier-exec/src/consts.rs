//! Executor tuning parameters.

use std::time::Duration;

/// Capacity of the output buffer, in bytes.
pub const OUTPUT_SIZE: usize = 16 << 20;

/// How long the coordinator waits for the call it just dispatched.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_millis(20);

/// Completion wait under the debug env flag, where targets run slower.
pub const COMPLETION_TIMEOUT_DEBUG: Duration = Duration::from_millis(500);

/// Grace window granted to straggler completions mid-program.
pub const GRACE_PERIOD: Duration = Duration::from_millis(1);

/// Grace window at the end of the program, when nothing else is waiting.
pub const GRACE_PERIOD_FINAL: Duration = Duration::from_millis(10);

/// Total budget of the post-EOF sweep over still-running workers.
pub const FINAL_DRAIN_BUDGET: Duration = Duration::from_millis(100);

static_assertions::const_assert!(OUTPUT_SIZE % 4 == 0);
