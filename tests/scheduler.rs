// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler behavior tests
//!
//! The scheduler is one per process, so every test that starts it holds
//! `SERIAL` for its whole run.

use std::env;
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use uthread::{Config, ThreadError, MAIN_TID};

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn test_hello() {
    let _serial = serial();
    static RAN: AtomicBool = AtomicBool::new(false);

    uthread::start(false).unwrap();
    let tid = uthread::create(|| {
        println!("Hello world!");
        RAN.store(true, Ordering::SeqCst);
        0
    })
    .unwrap();

    assert_eq!(uthread::join(tid).unwrap(), 0);
    assert!(RAN.load(Ordering::SeqCst));
    uthread::stop().unwrap();
}

/// Each thread creates and joins the next one, then yields before
/// recording itself, so the deepest thread records first.
#[test]
fn test_yield_ordering() {
    let _serial = serial();
    static ORDER: Mutex<Vec<uthread::Tid>> = Mutex::new(Vec::new());

    fn record() {
        ORDER.lock().unwrap().push(uthread::current());
    }

    fn thread4() -> i32 {
        uthread::yield_now();
        record();
        0
    }

    fn thread3() -> i32 {
        uthread::join(uthread::create(thread4).unwrap()).unwrap();
        uthread::yield_now();
        record();
        0
    }

    fn thread2() -> i32 {
        uthread::join(uthread::create(thread3).unwrap()).unwrap();
        uthread::yield_now();
        record();
        0
    }

    fn thread1() -> i32 {
        uthread::join(uthread::create(thread2).unwrap()).unwrap();
        record();
        uthread::yield_now();
        0
    }

    ORDER.lock().unwrap().clear();
    uthread::start(false).unwrap();
    uthread::join(uthread::create(thread1).unwrap()).unwrap();
    uthread::stop().unwrap();

    assert_eq!(*ORDER.lock().unwrap(), vec![4, 3, 2, 1]);
}

#[test]
fn test_round_robin_turns() {
    let _serial = serial();
    static TRACE: Mutex<Vec<(uthread::Tid, u32)>> = Mutex::new(Vec::new());

    fn worker() -> i32 {
        for round in 0..3 {
            TRACE.lock().unwrap().push((uthread::current(), round));
            uthread::yield_now();
        }
        0
    }

    TRACE.lock().unwrap().clear();
    uthread::start(false).unwrap();
    for _ in 0..3 {
        uthread::create(worker).unwrap();
    }
    uthread::stop().unwrap();

    // Every thread gets one turn before any thread gets a second
    let expected: Vec<(uthread::Tid, u32)> = (0..3)
        .flat_map(|round| (1..=3).map(move |tid| (tid, round)))
        .collect();
    assert_eq!(*TRACE.lock().unwrap(), expected);
}

#[test]
fn test_tid_assignment() {
    let _serial = serial();
    static SEEN: AtomicUsize = AtomicUsize::new(0);

    uthread::start(false).unwrap();
    assert_eq!(uthread::current(), MAIN_TID);

    let first = uthread::create(|| {
        SEEN.store(uthread::current() as usize, Ordering::SeqCst);
        0
    })
    .unwrap();
    let second = uthread::create(|| 0).unwrap();
    let third = uthread::create(|| 0).unwrap();
    assert_eq!(first, 1);
    assert!(second > first && third > second);

    uthread::join(first).unwrap();
    assert_eq!(SEEN.load(Ordering::SeqCst), first as usize);
    uthread::stop().unwrap();

    // A fresh start numbers from 1 again
    uthread::start(false).unwrap();
    assert_eq!(uthread::create(|| 0).unwrap(), 1);
    uthread::stop().unwrap();
}

#[test]
fn test_join_guards() {
    let _serial = serial();

    uthread::start(false).unwrap();
    assert!(matches!(uthread::join(MAIN_TID), Err(ThreadError::JoinMain)));
    assert!(matches!(uthread::join(uthread::current()), Err(ThreadError::JoinMain)));

    let tid = uthread::create(|| {
        let self_join = matches!(uthread::join(uthread::current()), Err(ThreadError::JoinSelf));
        let main_join = matches!(uthread::join(MAIN_TID), Err(ThreadError::JoinMain));
        i32::from(self_join) + i32::from(main_join)
    })
    .unwrap();

    assert_eq!(uthread::join(tid).unwrap(), 2);
    assert!(matches!(uthread::join(99), Err(ThreadError::NoSuchThread(99))));
    uthread::stop().unwrap();
}

#[test]
fn test_exit_codes() {
    let _serial = serial();

    uthread::start(false).unwrap();
    let returned = uthread::create(|| 42).unwrap();
    let exited = uthread::create(|| uthread::exit(7)).unwrap();
    let negative = uthread::create(|| -3).unwrap();

    assert_eq!(uthread::join(exited).unwrap(), 7);
    assert_eq!(uthread::join(returned).unwrap(), 42);
    assert_eq!(uthread::join(negative).unwrap(), -3);
    uthread::stop().unwrap();
}

/// Set in the re-run test binary that performs the process-ending exits
const EXIT_CHILD_ENV: &str = "UTHREAD_TEST_EXIT_CHILD";

/// Main exits first and becomes a zombie; the last thread to exit finds
/// nothing ready and ends the process with its own code.
#[test]
fn test_last_exit_ends_process() {
    if env::var_os(EXIT_CHILD_ENV).is_some() {
        uthread::start(false).unwrap();
        uthread::create(|| uthread::exit(9)).unwrap();
        uthread::exit(3);
    }

    let _serial = serial();
    let status = Command::new(env::current_exe().unwrap())
        .args(["--exact", "test_last_exit_ends_process", "--test-threads=1"])
        .env(EXIT_CHILD_ENV, "1")
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(9));
}

#[test]
fn test_join_collects_once() {
    let _serial = serial();

    uthread::start(false).unwrap();
    let tid = uthread::create(|| 5).unwrap();

    // Let the thread finish before anyone joins it
    uthread::yield_now();
    assert_eq!(uthread::join(tid).unwrap(), 5);
    assert!(matches!(uthread::join(tid), Err(ThreadError::NoSuchThread(t)) if t == tid));
    uthread::stop().unwrap();
}

#[test]
fn test_second_joiner_rejected() {
    let _serial = serial();
    static RELEASE: AtomicBool = AtomicBool::new(false);

    RELEASE.store(false, Ordering::SeqCst);
    uthread::start(false).unwrap();

    let target = uthread::create(|| {
        while !RELEASE.load(Ordering::SeqCst) {
            uthread::yield_now();
        }
        11
    })
    .unwrap();
    let joiner = uthread::create(move || uthread::join(target).unwrap_or(-1)).unwrap();

    // Target and joiner each run once; the joiner has claimed the target
    uthread::yield_now();
    assert!(matches!(
        uthread::join(target),
        Err(ThreadError::AlreadyJoined(t)) if t == target
    ));

    RELEASE.store(true, Ordering::SeqCst);
    assert_eq!(uthread::join(joiner).unwrap(), 11);
    uthread::stop().unwrap();
}

#[test]
fn test_stop_joins_remaining_threads() {
    let _serial = serial();
    static FINISHED: AtomicUsize = AtomicUsize::new(0);

    FINISHED.store(0, Ordering::SeqCst);
    uthread::start(false).unwrap();
    for _ in 0..3 {
        uthread::create(|| {
            uthread::yield_now();
            FINISHED.fetch_add(1, Ordering::SeqCst);
            0
        })
        .unwrap();
    }
    // One thread exits before stop and is reclaimed as an unjoined zombie
    uthread::create(|| 0).unwrap();
    uthread::yield_now();

    uthread::stop().unwrap();
    assert_eq!(FINISHED.load(Ordering::SeqCst), 3);
}

#[test]
fn test_stop_requires_main() {
    let _serial = serial();

    uthread::start(false).unwrap();
    let tid = uthread::create(|| match uthread::stop() {
        Err(ThreadError::NotMain) => 1,
        _ => 0,
    })
    .unwrap();

    assert_eq!(uthread::join(tid).unwrap(), 1);
    uthread::stop().unwrap();
}

#[test]
fn test_start_twice() {
    let _serial = serial();

    uthread::start(false).unwrap();
    assert!(matches!(uthread::start(false), Err(ThreadError::AlreadyStarted)));
    uthread::stop().unwrap();

    uthread::start(false).unwrap();
    uthread::stop().unwrap();
}

#[test]
fn test_not_started() {
    let _serial = serial();

    assert!(matches!(uthread::create(|| 0), Err(ThreadError::NotStarted)));
    assert!(matches!(uthread::join(1), Err(ThreadError::NotStarted)));
    assert!(matches!(uthread::stop(), Err(ThreadError::NotStarted)));
    uthread::yield_now();
}

#[test]
fn test_invalid_config() {
    let _serial = serial();

    let config = Config::default().with_tick_hz(0);
    assert!(matches!(uthread::start_with(config), Err(ThreadError::InvalidConfig(_))));

    // A rejected config leaves the scheduler startable
    uthread::start(false).unwrap();
    uthread::stop().unwrap();
}

#[test]
fn test_panicking_thread() {
    let _serial = serial();

    uthread::start_with(Config::default().with_stack_size(256 * 1024)).unwrap();
    let tid = uthread::create(|| panic!("thread failure")).unwrap();
    let after = uthread::create(|| 3).unwrap();

    assert_eq!(uthread::join(tid).unwrap(), uthread::config::PANIC_EXIT_CODE);
    assert_eq!(uthread::join(after).unwrap(), 3);
    uthread::stop().unwrap();
}

#[test]
fn test_deep_stack_use() {
    let _serial = serial();

    fn depth(n: u64) -> u64 {
        let pad = [n; 16];
        if n == 0 {
            0
        } else {
            std::hint::black_box(pad)[0] + depth(n - 1)
        }
    }

    uthread::start_with(Config::default().with_stack_size(128 * 1024)).unwrap();
    let tid = uthread::create(|| (depth(200) % 1000) as i32).unwrap();
    assert_eq!(uthread::join(tid).unwrap(), (200 * 201 / 2) % 1000);
    uthread::stop().unwrap();
}

/// A thread that never yields is still interrupted by the tick, letting
/// the thread that releases it run.
#[test]
fn test_preemption() {
    let _serial = serial();
    static RELEASED: AtomicBool = AtomicBool::new(false);

    RELEASED.store(false, Ordering::SeqCst);
    uthread::start(true).unwrap();

    let spinner = uthread::create(|| {
        while !RELEASED.load(Ordering::SeqCst) {
            std::hint::spin_loop();
        }
        0
    })
    .unwrap();
    let releaser = uthread::create(|| {
        RELEASED.store(true, Ordering::SeqCst);
        0
    })
    .unwrap();

    assert_eq!(uthread::join(spinner).unwrap(), 0);
    assert_eq!(uthread::join(releaser).unwrap(), 0);
    uthread::stop().unwrap();
}

/// Yielding still works after the tick has switched threads, and the
/// timer is gone after stop.
#[test]
fn test_preemption_restart() {
    let _serial = serial();
    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    for _ in 0..2 {
        COUNTER.store(0, Ordering::SeqCst);
        uthread::start_with(Config::default().with_preempt(true).with_tick_hz(1000)).unwrap();
        for _ in 0..4 {
            uthread::create(|| {
                for _ in 0..1000 {
                    COUNTER.fetch_add(1, Ordering::SeqCst);
                    uthread::yield_now();
                }
                0
            })
            .unwrap();
        }
        uthread::stop().unwrap();
        assert_eq!(COUNTER.load(Ordering::SeqCst), 4000);
    }
    assert!(!uthread::preempt::is_masked());
}
