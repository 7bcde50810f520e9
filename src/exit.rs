//! Reserved process exit codes
//!
//! Service managers and wrapper scripts key on these values to tell which
//! startup stage failed. `2` is used by the CLI parser for usage errors and
//! must not be reassigned here.

/// Clean shutdown.
pub const SUCCESS: i32 = 0;

/// Manager construction failed before the run loop started
/// (configuration, greeter, or validator initialization).
pub const INIT: i32 = 9;

/// Installing the signal catcher failed.
pub const SIGNAL_SETUP: i32 = 10;

/// Display server bring-up failed (no free display, no free VT,
/// or the X server could not be spawned).
pub const DISPLAY_INIT: i32 = 11;

/// Applying root-window styling failed.
pub const STYLE: i32 = 12;

/// The login prompt could not be built or its event channel closed.
pub const PROMPT: i32 = 13;

/// A termination signal (other than pid 1's SIGTERM) ended the run loop.
pub const SIGNAL_EXIT: i32 = 14;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let codes = [SUCCESS, INIT, SIGNAL_SETUP, DISPLAY_INIT, STYLE, PROMPT, SIGNAL_EXIT];
        for (i, a) in codes.iter().enumerate() {
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_failure_codes_are_nonzero() {
        for code in [INIT, SIGNAL_SETUP, DISPLAY_INIT, STYLE, PROMPT, SIGNAL_EXIT] {
            assert_ne!(code, 0);
            // 2 is claimed by the CLI parser for usage errors
            assert_ne!(code, 2);
        }
    }
}
