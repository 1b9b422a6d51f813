// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler and thread management
//!
//! This module provides the green thread scheduler: thread control blocks,
//! the scheduler state machine, and the global round-robin instance.
//!
//! # Example
//! ```ignore
//! use uthread::sched;
//!
//! sched::start(false)?;
//! let tid = sched::create(|| 7)?;
//! assert_eq!(sched::join(tid)?, 7);
//! sched::stop()?;
//! ```

mod round_robin;
mod scheduler;
mod state;
mod thread;

pub use round_robin::{create, current, exit, join, start, start_with, stop, yield_now};
pub use thread::{Tid, MAIN_TID};

pub(crate) use round_robin::{preempt_tick, take_entry};
