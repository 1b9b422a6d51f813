// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! User-level green threads
//!
//! Cooperative threads with optional timer preemption, all multiplexed on
//! the single OS thread that starts the scheduler.
//!
//! # Modules
//!
//! - **queue**: FIFO queue used for the ready and zombie lists
//! - **context**: guarded stacks and the context switch
//! - **preempt**: the preemption tick and its mask
//! - **sched**: thread control blocks and the round-robin scheduler
//!
//! # Usage
//!
//! ```no_run
//! fn main() -> uthread::Result<()> {
//!     uthread::start(false)?;
//!
//!     let tid = uthread::create(|| {
//!         println!("hello from thread {}", uthread::current());
//!         0
//!     })?;
//!     let code = uthread::join(tid)?;
//!     assert_eq!(code, 0);
//!
//!     uthread::stop()
//! }
//! ```
//!
//! # Platform
//!
//! Linux on x86_64 or aarch64.

mod arch;
mod context;
mod sync;

pub mod config;
pub mod error;
pub mod logger;
pub mod preempt;
pub mod queue;
pub mod sched;

pub use config::Config;
pub use error::{QueueError, Result, ThreadError};
pub use queue::Queue;
pub use sched::{create, current, exit, join, start, start_with, stop, yield_now, Tid, MAIN_TID};
