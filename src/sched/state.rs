// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread state
//!
//! A thread is Ready from creation until it exits, whether it is running
//! or waiting in the ready queue, and a Zombie from exit until a joiner
//! (or `stop`) collects it.

/// Thread states
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThreadState {
    /// Thread is running or waiting in the ready queue
    Ready,
    /// Thread has exited and awaits collection
    Zombie,
}

impl ThreadState {
    /// Check if the thread can still be scheduled
    #[cfg(test)]
    pub fn is_runnable(self) -> bool {
        self == Self::Ready
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::Ready
    }
}
