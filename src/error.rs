// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Error types
//!
//! Two tiers of failure exist in this library:
//!
//! - **API errors** ([`ThreadError`], [`QueueError`]) are returned to the
//!   caller, who handles them locally. Nothing is unwound or aborted.
//! - **Platform failures** (signal masks, signal handlers, timers, guard
//!   pages, broken scheduler invariants) are unrecoverable and go through
//!   [`fatal`], which reports and terminates the process.

use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

use crate::sched::Tid;

/// Result alias for scheduler operations
pub type Result<T> = std::result::Result<T, ThreadError>;

/// Errors returned by the scheduler API
#[derive(Error, Debug)]
pub enum ThreadError {
    /// The scheduler is not running on the calling OS thread.
    #[error("scheduler is not running on this thread")]
    NotStarted,

    /// `start` was called while a scheduler is already running in this process.
    #[error("scheduler already started")]
    AlreadyStarted,

    /// Only the main thread (TID 0) may stop the scheduler.
    #[error("only the main thread may stop the scheduler")]
    NotMain,

    /// The main thread cannot be joined.
    #[error("the main thread cannot be joined")]
    JoinMain,

    /// A thread cannot join itself.
    #[error("a thread cannot join itself")]
    JoinSelf,

    /// No live or uncollected thread has this TID.
    #[error("no thread with TID {0}")]
    NoSuchThread(Tid),

    /// Another thread is already waiting to collect this TID.
    #[error("thread {0} is already being joined")]
    AlreadyJoined(Tid),

    /// Every representable TID has been handed out.
    #[error("thread identifier space exhausted")]
    TidExhausted,

    /// The thread stack could not be mapped or guarded.
    #[error("failed to allocate thread stack: {0}")]
    StackAlloc(#[source] io::Error),

    /// The execution context could not be bound to its stack.
    #[error("failed to initialize execution context")]
    ContextInit,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Scheduler bookkeeping failed in a queue operation.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors returned by [`Queue`](crate::queue::Queue) operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Dequeue on a queue with no items.
    #[error("queue is empty")]
    Empty,

    /// Delete of an item that is not in the queue.
    #[error("item not found in queue")]
    NotFound,

    /// A node slot could not be allocated.
    #[error("queue node allocation failed: {0}")]
    AllocFailed(#[from] TryReserveError),
}

/// Report an unrecoverable platform failure and terminate the process.
///
/// Mirrors `perror` followed by `exit(1)`: the failing operation and the
/// current OS error are written to stderr and the process exits with
/// status 1. Callers capture `errno` through `err` before anything else can
/// clobber it.
#[cold]
pub(crate) fn fatal(context: &str, err: io::Error) -> ! {
    log::error!("[FATAL] {}: {}", context, err);
    eprintln!("uthread: {}: {}", context, err);
    std::process::exit(1);
}

/// Report a broken scheduler invariant and terminate the process.
#[cold]
pub(crate) fn invariant(what: &str) -> ! {
    fatal(what, io::Error::new(io::ErrorKind::Other, "scheduler invariant violated"))
}
