// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler configuration
//!
//! Compile-time defaults plus the runtime [`Config`] accepted by
//! [`start_with`](crate::start_with).

use core::time::Duration;

use crate::error::{Result, ThreadError};

/// Usable stack size of every created thread, in bytes
pub const STACK_SIZE: usize = 32 * 1024;

/// Smallest stack a [`Config`] may request
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Preemption tick frequency (100 Hz is a 10 ms slice)
pub const PREEMPT_HZ: u32 = 100;

/// Highest tick frequency a [`Config`] may request
pub const MAX_PREEMPT_HZ: u32 = 1_000_000;

/// Exit code reported to the joiner of a thread whose entry panicked
pub const PANIC_EXIT_CODE: i32 = -1;

/// Runtime scheduler configuration
///
/// # Example
/// ```ignore
/// let config = uthread::Config::default()
///     .with_preempt(true)
///     .with_tick_hz(250);
/// uthread::start_with(config)?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Arm the preemption timer
    pub preempt: bool,
    /// Preemption tick frequency in Hz
    pub tick_hz: u32,
    /// Usable stack bytes per created thread (a guard page is added)
    pub stack_size: usize,
}

impl Config {
    /// Default configuration: cooperative only, 100 Hz, 32 KiB stacks
    pub const fn new() -> Self {
        Self {
            preempt: false,
            tick_hz: PREEMPT_HZ,
            stack_size: STACK_SIZE,
        }
    }

    /// Enable or disable timer preemption
    pub const fn with_preempt(mut self, preempt: bool) -> Self {
        self.preempt = preempt;
        self
    }

    /// Set the preemption tick frequency
    pub const fn with_tick_hz(mut self, tick_hz: u32) -> Self {
        self.tick_hz = tick_hz;
        self
    }

    /// Set the usable stack size of created threads
    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Check that every value is in range
    pub fn validate(&self) -> Result<()> {
        if self.tick_hz == 0 {
            return Err(ThreadError::InvalidConfig("tick_hz must be non-zero"));
        }
        if self.tick_hz > MAX_PREEMPT_HZ {
            return Err(ThreadError::InvalidConfig("tick_hz above 1 MHz"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ThreadError::InvalidConfig("stack_size below 16 KiB"));
        }
        Ok(())
    }

    /// Period between two preemption ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_hz.max(1)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(!config.preempt);
        assert_eq!(config.tick_hz, 100);
        assert_eq!(config.stack_size, 32768);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_tick_interval() {
        assert_eq!(Config::new().tick_interval(), Duration::from_millis(10));
        assert_eq!(
            Config::new().with_tick_hz(1000).tick_interval(),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_config_validate_rejects_out_of_range() {
        assert!(matches!(
            Config::new().with_tick_hz(0).validate(),
            Err(ThreadError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::new().with_tick_hz(MAX_PREEMPT_HZ + 1).validate(),
            Err(ThreadError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::new().with_stack_size(4096).validate(),
            Err(ThreadError::InvalidConfig(_))
        ));
        assert!(Config::new().with_stack_size(MIN_STACK_SIZE).validate().is_ok());
    }
}
