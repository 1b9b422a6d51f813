// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Timer preemption
//!
//! A periodic `SIGVTALRM` tick forces the running green thread to yield, and
//! masking that signal is the scheduler's critical-section guard.
//!
//! # Design
//!
//! - **Per-executor timer**: a POSIX timer on `CLOCK_THREAD_CPUTIME_ID`
//!   delivers the tick with `SIGEV_THREAD_ID` to the OS thread that started
//!   the scheduler, so other OS threads of the process are unaffected
//! - **Masking**: [`disable`] and [`enable`] block and unblock the tick for
//!   the calling OS thread only
//! - **Not nestable**: the pair does not count. Two `disable` calls are
//!   undone by one `enable`
//!
//! # Allocation hazard
//!
//! A thread preempted inside the allocator still holds the allocator's lock.
//! Any other green thread that allocates before it resumes deadlocks the
//! executor. Code that runs with preemption enabled should either avoid
//! allocating or wrap allocating sections in [`disable`]/[`enable`].
//! This includes dropping what a thread's entry closure captured, which
//! happens inside the call, and panicking, which boxes its payload. The
//! library frees its own boxes, such as the entry box and a caught panic
//! payload, with the tick masked.
//!
//! # Usage
//!
//! ```ignore
//! uthread::preempt::disable();
//! let buffer = vec![0u8; 4096];
//! uthread::preempt::enable();
//! ```

use std::fmt;
use std::io;
use std::mem::{self, MaybeUninit};
use std::ptr;
use std::time::Duration;

use libc::c_int;

use crate::error::fatal;
use crate::sched;

/// Signal carrying the preemption tick
const TICK_SIGNAL: c_int = libc::SIGVTALRM;

/// An armed preemption timer and the signal action it replaced
pub struct Preemption {
    timer: libc::timer_t,
    previous: libc::sigaction,
    interval: Duration,
}

impl Preemption {
    /// Period between ticks
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl fmt::Debug for Preemption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preemption")
            .field("timer", &self.timer)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Signal set holding only the tick signal
fn tick_set() -> libc::sigset_t {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigemptyset initializes the set before sigaddset reads it
    unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), TICK_SIGNAL);
        set.assume_init()
    }
}

fn set_mask(how: c_int) {
    let set = tick_set();
    // SAFETY: `set` is initialized, the old mask is not requested
    let rc = unsafe { libc::pthread_sigmask(how, &set, ptr::null_mut()) };
    if rc != 0 {
        fatal("pthread_sigmask", io::Error::from_raw_os_error(rc));
    }
}

/// Mask the preemption tick on the calling OS thread
pub fn disable() {
    set_mask(libc::SIG_BLOCK);
}

/// Unmask the preemption tick on the calling OS thread
///
/// A tick that arrived while masked is delivered immediately.
pub fn enable() {
    set_mask(libc::SIG_UNBLOCK);
}

/// Check whether the tick is masked on the calling OS thread
pub fn is_masked() -> bool {
    let mut current = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: a null new set only queries the mask into `current`
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, ptr::null(), current.as_mut_ptr()) };
    if rc != 0 {
        fatal("pthread_sigmask", io::Error::from_raw_os_error(rc));
    }
    // SAFETY: filled in by the successful call above
    unsafe { libc::sigismember(current.as_ptr(), TICK_SIGNAL) == 1 }
}

/// Install the tick handler and arm a periodic timer for the calling thread
///
/// Any platform failure is fatal.
pub fn start(interval: Duration) -> Preemption {
    // SAFETY: sigaction is plain old data, all-zero is a valid empty action
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = on_tick as extern "C" fn(c_int) as libc::sighandler_t;
    action.sa_flags = libc::SA_RESTART;
    // SAFETY: sa_mask is owned by `action`
    unsafe { libc::sigemptyset(&mut action.sa_mask) };

    // SAFETY: as above
    let mut previous: libc::sigaction = unsafe { mem::zeroed() };
    // SAFETY: both pointers refer to live sigaction values
    if unsafe { libc::sigaction(TICK_SIGNAL, &action, &mut previous) } != 0 {
        fatal("sigaction", io::Error::last_os_error());
    }

    // SAFETY: sigevent is plain old data
    let mut event: libc::sigevent = unsafe { mem::zeroed() };
    event.sigev_notify = libc::SIGEV_THREAD_ID;
    event.sigev_signo = TICK_SIGNAL;
    // SAFETY: gettid has no preconditions
    event.sigev_notify_thread_id = unsafe { libc::syscall(libc::SYS_gettid) } as libc::pid_t;

    let mut timer: libc::timer_t = ptr::null_mut();
    // SAFETY: `event` and `timer` are live for the call
    if unsafe { libc::timer_create(libc::CLOCK_THREAD_CPUTIME_ID, &mut event, &mut timer) } != 0 {
        fatal("timer_create", io::Error::last_os_error());
    }

    let period = libc::timespec {
        tv_sec: interval.as_secs() as libc::time_t,
        tv_nsec: interval.subsec_nanos() as libc::c_long,
    };
    let setting = libc::itimerspec {
        it_interval: period,
        it_value: period,
    };
    // SAFETY: `timer` was created above
    if unsafe { libc::timer_settime(timer, 0, &setting, ptr::null_mut()) } != 0 {
        fatal("timer_settime", io::Error::last_os_error());
    }

    log::debug!("[PREEMPT] tick armed every {:?}", interval);
    Preemption {
        timer,
        previous,
        interval,
    }
}

/// Disarm the timer, drop a pending tick, and restore the previous handler
///
/// Must be called with the tick masked, so that no tick can be delivered
/// between disarming and restoring.
pub fn stop(preemption: Preemption) {
    debug_assert!(is_masked());

    // SAFETY: the timer is owned by `preemption` and deleted exactly once
    if unsafe { libc::timer_delete(preemption.timer) } != 0 {
        fatal("timer_delete", io::Error::last_os_error());
    }

    discard_pending();

    // SAFETY: `previous` was filled in by the sigaction call in `start`
    if unsafe { libc::sigaction(TICK_SIGNAL, &preemption.previous, ptr::null_mut()) } != 0 {
        fatal("sigaction", io::Error::last_os_error());
    }

    log::debug!("[PREEMPT] tick disarmed");
}

/// Consume a tick that fired while masked
fn discard_pending() {
    let mut pending = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigpending fills `pending`
    if unsafe { libc::sigpending(pending.as_mut_ptr()) } != 0 {
        fatal("sigpending", io::Error::last_os_error());
    }

    // SAFETY: initialized by sigpending
    if unsafe { libc::sigismember(pending.as_ptr(), TICK_SIGNAL) } == 1 {
        let set = tick_set();
        let timeout = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: all pointers refer to live values
        unsafe { libc::sigtimedwait(&set, ptr::null_mut(), &timeout) };
    }
}

/// Tick handler
///
/// Runs on the stack of whichever green thread was interrupted and may
/// switch away from it. Nothing on this path logs.
extern "C" fn on_tick(_signal: c_int) {
    // SAFETY: __errno_location returns this OS thread's errno slot
    let saved = unsafe { *libc::__errno_location() };
    sched::preempt_tick();
    // SAFETY: as above
    unsafe { *libc::__errno_location() = saved };
}
