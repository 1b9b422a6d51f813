// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Round-robin scheduler API
//!
//! The global scheduler instance and the operations client code calls. Every
//! operation takes the scheduler lock (which masks the preemption tick),
//! applies one [`Scheduler`] transition, and performs the resulting context
//! switch after releasing the lock with the tick still masked. The thread
//! that resumes on the other side unmasks it.
//!
//! Only the OS thread that called [`start`] may use the scheduler; calls
//! from other OS threads see [`ThreadError::NotStarted`].

use core::sync::atomic::{AtomicU64, Ordering};

use super::scheduler::{Drain, Scheduler};
use super::thread::{boxed_entry, ThreadEntry, Tid, MAIN_TID};
use crate::config::Config;
use crate::error::{invariant, Result, ThreadError};
use crate::preempt;
use crate::sync::MaskedMutex;

/// ============================================================================
/// Global Scheduler Instance
/// ============================================================================

/// Global scheduler, `None` outside start/stop
static SCHEDULER: MaskedMutex<Option<Scheduler>> = MaskedMutex::new(None);

/// `pthread_self` of the OS thread running the scheduler, 0 when stopped
static OWNER: AtomicU64 = AtomicU64::new(0);

fn this_os_thread() -> u64 {
    // SAFETY: pthread_self has no preconditions
    unsafe { libc::pthread_self() as u64 }
}

fn is_owner() -> bool {
    OWNER.load(Ordering::Acquire) == this_os_thread()
}

/// ============================================================================
/// Scheduler API Functions
/// ============================================================================

/// Start the scheduler with default settings
///
/// The calling thread becomes TID 0. With `preempt` set, a 100 Hz tick
/// forces running threads to yield.
///
/// # Returns
///
/// * `Ok(())` - The scheduler is running on this OS thread
/// * `Err(ThreadError::AlreadyStarted)` - A scheduler is already running
pub fn start(preempt: bool) -> Result<()> {
    start_with(Config::default().with_preempt(preempt))
}

/// Start the scheduler with an explicit configuration
pub fn start_with(config: Config) -> Result<()> {
    config.validate()?;

    OWNER
        .compare_exchange(0, this_os_thread(), Ordering::AcqRel, Ordering::Acquire)
        .map_err(|_| ThreadError::AlreadyStarted)?;

    let mut guard = SCHEDULER.lock();
    let mut scheduler = match Scheduler::new(config) {
        Ok(scheduler) => scheduler,
        Err(err) => {
            OWNER.store(0, Ordering::Release);
            return Err(err);
        }
    };
    if config.preempt {
        scheduler.arm(preempt::start(config.tick_interval()));
    }
    *guard = Some(scheduler);

    log::debug!(
        "[SCHED] started (preempt: {}, stack: {} bytes)",
        config.preempt,
        config.stack_size
    );
    Ok(())
}

/// Stop the scheduler
///
/// Joins every thread nobody else is joining, frees all remaining threads,
/// disarms preemption, and releases the scheduler so it can be started
/// again. Exit codes of threads joined here are discarded.
///
/// # Returns
///
/// * `Ok(())` - Everything was torn down
/// * `Err(ThreadError::NotMain)` - Called from a thread other than TID 0
pub fn stop() -> Result<()> {
    if !is_owner() {
        return Err(ThreadError::NotStarted);
    }
    if with_scheduler(|s| s.current())? != MAIN_TID {
        return Err(ThreadError::NotMain);
    }

    loop {
        match with_scheduler(|s| s.drain_step())? {
            Drain::Join(tid) => {
                let code = join(tid)?;
                log::trace!("[SCHED] stop joined thread {} (exit code {})", tid, code);
            }
            Drain::Wait => yield_now(),
            Drain::Done => break,
        }
    }

    let mut guard = SCHEDULER.lock();
    let scheduler = match guard.take() {
        Some(scheduler) => scheduler,
        None => invariant("scheduler vanished during stop"),
    };
    if let Some(preemption) = scheduler.teardown() {
        preempt::stop(preemption);
    }
    OWNER.store(0, Ordering::Release);
    drop(guard);

    log::debug!("[SCHED] stopped");
    Ok(())
}

/// Create a thread that runs `entry`
///
/// The thread is queued behind every thread already ready and first runs
/// when its turn comes. Returning from `entry` exits the thread with the
/// returned value.
///
/// # Returns
///
/// The new thread's TID. On failure the scheduler is left unchanged.
pub fn create<F>(entry: F) -> Result<Tid>
where
    F: FnOnce() -> i32 + 'static,
{
    if !is_owner() {
        return Err(ThreadError::NotStarted);
    }

    let mut guard = SCHEDULER.lock();
    let scheduler = guard.as_mut().ok_or(ThreadError::NotStarted)?;

    // Boxed under the lock: the allocator must not be entered preemptibly
    let entry = boxed_entry(entry);
    let tid = scheduler.spawn(entry)?;

    log::debug!("[SCHED] created thread {}", tid);
    Ok(tid)
}

/// Get the running thread's TID
///
/// # Panics
///
/// If the scheduler is not running on this OS thread.
pub fn current() -> Tid {
    match try_with_scheduler(|s| s.current()) {
        Some(tid) => tid,
        None => panic!("uthread::current called without a running scheduler"),
    }
}

/// Give the processor to the next ready thread
///
/// Returns once every other ready thread has had a turn. Returns at once if
/// no other thread is ready or the scheduler is not running. Preemption is
/// unmasked on return.
pub fn yield_now() {
    if !is_owner() {
        return;
    }

    let mut guard = SCHEDULER.lock();
    match guard.as_mut().and_then(Scheduler::rotate) {
        Some(switch) => {
            guard.unlock_masked();
            // SAFETY: masked, unlocked, and both TCBs are live threads
            unsafe { switch.perform() };
            preempt::enable();
        }
        None => drop(guard),
    }
}

/// Exit the running thread with `code`
///
/// The code is handed to whichever thread joins this one. If no other
/// thread is left to run, the process exits with `code`.
///
/// # Panics
///
/// If the scheduler is not running on this OS thread.
pub fn exit(code: i32) -> ! {
    if !is_owner() {
        panic!("uthread::exit called without a running scheduler");
    }

    let mut guard = SCHEDULER.lock();
    let scheduler = match guard.as_mut() {
        Some(scheduler) => scheduler,
        None => panic!("uthread::exit called without a running scheduler"),
    };
    let tid = scheduler.current();
    log::debug!("[SCHED] thread {} exited with code {}", tid, code);

    match scheduler.retire(code) {
        Some(switch) => {
            guard.unlock_masked();
            // SAFETY: the zombie's context and stack stay allocated until a
            // joiner collects it, which cannot happen before this switch
            unsafe { switch.perform() };
            invariant("zombie thread resumed")
        }
        None => {
            drop(guard);
            log::debug!("[SCHED] no thread left to run, exiting process");
            std::process::exit(code)
        }
    }
}

/// Wait for thread `tid` to exit and collect its exit code
///
/// The caller keeps yielding until the target exits. A target that already
/// exited is collected without yielding. Each thread can be joined once.
///
/// # Returns
///
/// * `Ok(code)` - The target's exit code; the target is gone afterwards
/// * `Err(ThreadError::JoinMain)` - `tid` is 0
/// * `Err(ThreadError::JoinSelf)` - `tid` is the caller
/// * `Err(ThreadError::NoSuchThread(_))` - No such live or uncollected thread
/// * `Err(ThreadError::AlreadyJoined(_))` - Another thread is joining it
pub fn join(tid: Tid) -> Result<i32> {
    if !is_owner() {
        return Err(ThreadError::NotStarted);
    }

    let collected = with_scheduler(|s| {
        let caller = s.current();
        s.claim(caller, tid)
    })??;
    if let Some(code) = collected {
        return Ok(code);
    }

    loop {
        yield_now();
        if let Some(code) = with_scheduler(|s| s.try_collect(tid))? {
            return Ok(code);
        }
    }
}

/// Preemption tick, called from the signal handler
pub(crate) fn preempt_tick() {
    yield_now();
}

/// Hand a thread its entry function on first run
pub(crate) fn take_entry(tid: Tid) -> Option<ThreadEntry> {
    let mut guard = SCHEDULER.lock();
    guard.as_mut()?.take_entry(tid)
}

/// Run `f` on the scheduler under the lock
fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Result<R> {
    try_with_scheduler(f).ok_or(ThreadError::NotStarted)
}

fn try_with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Option<R> {
    if !is_owner() {
        return None;
    }
    let mut guard = SCHEDULER.lock();
    guard.as_mut().map(f)
}
