// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler state machine
//!
//! [`Scheduler`] owns every TCB plus the ready and zombie queues and
//! implements the transitions of create, yield, exit and join as plain
//! methods. It never switches contexts itself: transitions that hand the
//! processor to another thread return a [`Switch`] for the caller to
//! perform once the scheduler lock has been released.

use std::collections::HashMap;

use super::thread::{Tcb, ThreadEntry, Tid, TidAllocator, MAIN_TID};
use crate::config::Config;
use crate::context::{self, alloc_stack, destroy_stack, ExecutionContext};
use crate::error::{invariant, QueueError, Result, ThreadError};
use crate::preempt::Preemption;
use crate::queue::Queue;

/// ============================================================================
/// Context Switch Ticket
/// ============================================================================

/// A pending switch between two threads
///
/// Holds raw pointers into boxed TCBs, which stay put while the map that
/// owns them grows.
#[derive(Debug)]
#[must_use = "a switch does nothing until performed"]
pub(crate) struct Switch {
    prev: *mut ExecutionContext,
    next: *const ExecutionContext,
}

impl Switch {
    /// Suspend the calling thread and resume the next one
    ///
    /// # Safety
    ///
    /// The preemption tick must be masked, the scheduler lock released, and
    /// neither TCB freed until the switch completes.
    pub unsafe fn perform(self) {
        // SAFETY: forwarded to the caller
        unsafe { context::switch(self.prev, self.next) }
    }
}

/// Next step of the shutdown drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drain {
    /// Join this thread, nobody else will
    Join(Tid),
    /// Every remaining ready thread is already being joined: yield to them
    Wait,
    /// Only the main thread is left
    Done,
}

/// ============================================================================
/// Scheduler
/// ============================================================================

/// Process-wide scheduler state
pub(crate) struct Scheduler {
    /// Currently running thread
    current: Tid,
    /// Threads waiting for their turn, in round-robin order
    ready: Queue<Tid>,
    /// Exited threads waiting to be collected
    zombies: Queue<Tid>,
    /// Every live or uncollected thread
    threads: HashMap<Tid, Box<Tcb>>,
    /// TID source
    tids: TidAllocator,
    /// Configuration the scheduler was started with
    config: Config,
    /// Armed preemption timer, if any
    preemption: Option<Preemption>,
}

// SAFETY: the scheduler lives behind a lock that only the OS thread which
// started it ever takes (see `round_robin`), so its contents never cross
// OS threads.
unsafe impl Send for Scheduler {}

impl Scheduler {
    /// Create a scheduler whose only thread is the caller, as TID 0
    pub fn new(config: Config) -> Result<Self> {
        let mut threads = HashMap::new();
        threads
            .try_reserve(1)
            .map_err(|e| ThreadError::Queue(QueueError::AllocFailed(e)))?;
        threads.insert(MAIN_TID, Tcb::main());

        Ok(Self {
            current: MAIN_TID,
            ready: Queue::new(),
            zombies: Queue::new(),
            threads,
            tids: TidAllocator::new(),
            config,
            preemption: None,
        })
    }

    /// Get the running thread's TID
    pub fn current(&self) -> Tid {
        self.current
    }

    /// Number of threads waiting in the ready queue
    #[cfg(test)]
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Number of exited, uncollected threads
    #[cfg(test)]
    pub fn zombie_len(&self) -> usize {
        self.zombies.len()
    }

    /// Number of live or uncollected threads, main included
    #[cfg(test)]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Keep the armed preemption timer until teardown
    pub fn arm(&mut self, preemption: Preemption) {
        self.preemption = Some(preemption);
    }

    /// Create a Ready thread that runs `entry` and queue it last
    ///
    /// On failure nothing is queued and no TID is consumed.
    pub fn spawn(&mut self, entry: ThreadEntry) -> Result<Tid> {
        let tid = self.tids.peek().ok_or(ThreadError::TidExhausted)?;

        // Every thread may sit in either queue at once, so reserve for all
        // of them now and keep rotation and exit allocation-free
        let total = self.threads.len() + 1;
        self.ready.reserve(total)?;
        self.zombies.reserve(total)?;
        self.threads
            .try_reserve(1)
            .map_err(|e| ThreadError::Queue(QueueError::AllocFailed(e)))?;

        let stack = alloc_stack(self.config.stack_size)?;
        let tcb = Tcb::new(tid, stack, entry)?;

        self.ready.enqueue(tid)?;
        self.threads.insert(tid, tcb);
        self.tids.allocate();

        Ok(tid)
    }

    /// Take the entry function of a thread about to run for the first time
    pub fn take_entry(&mut self, tid: Tid) -> Option<ThreadEntry> {
        self.threads.get_mut(&tid)?.entry.take()
    }

    /// Move the running thread to the back of the ready queue and pick the
    /// front one
    ///
    /// Returns `None` when no other thread is ready.
    pub fn rotate(&mut self) -> Option<Switch> {
        if self.ready.is_empty() {
            return None;
        }

        let prev = self.current;
        if self.ready.enqueue(prev).is_err() {
            invariant("ready queue grew during rotation");
        }
        let next = match self.ready.dequeue() {
            Ok(next) => next,
            Err(_) => invariant("ready queue emptied during rotation"),
        };
        self.current = next;

        Some(self.switch_between(prev, next))
    }

    /// Turn the running thread into a zombie with `code` and pick the front
    /// of the ready queue
    ///
    /// Returns `None`, leaving everything untouched, when no thread is
    /// ready to take over.
    pub fn retire(&mut self, code: i32) -> Option<Switch> {
        if self.ready.is_empty() {
            return None;
        }

        let prev = self.current;
        self.tcb_mut(prev).mark_zombie(code);
        if self.zombies.enqueue(prev).is_err() {
            invariant("zombie queue grew during exit");
        }

        let next = match self.ready.dequeue() {
            Ok(next) => next,
            Err(_) => invariant("ready queue emptied during exit"),
        };
        self.current = next;

        Some(self.switch_between(prev, next))
    }

    /// Register `caller` as the one thread that will collect `target`
    ///
    /// # Returns
    ///
    /// * `Ok(Some(code))` - `target` had already exited and was collected
    /// * `Ok(None)` - `target` is still running, poll with [`Self::try_collect`]
    /// * `Err(_)` - the join is not allowed; nothing was changed
    pub fn claim(&mut self, caller: Tid, target: Tid) -> Result<Option<i32>> {
        if target == MAIN_TID {
            return Err(ThreadError::JoinMain);
        }
        if target == caller {
            return Err(ThreadError::JoinSelf);
        }

        let tcb = self
            .threads
            .get_mut(&target)
            .ok_or(ThreadError::NoSuchThread(target))?;
        if tcb.joiner.is_some() {
            return Err(ThreadError::AlreadyJoined(target));
        }
        tcb.joiner = Some(caller);

        Ok(self.try_collect(target))
    }

    /// Collect `target` if it has exited
    ///
    /// Removes it from the zombie queue, frees its stack and TCB, and
    /// returns its exit code.
    pub fn try_collect(&mut self, target: Tid) -> Option<i32> {
        if !self.threads.get(&target)?.is_zombie() {
            return None;
        }

        if self.zombies.delete(&target).is_err() {
            invariant("zombie missing from zombie queue");
        }
        let code = self.free(target);
        log::debug!("[SCHED] collected thread {} (exit code {})", target, code);
        Some(code)
    }

    /// Decide what `stop` does next
    pub fn drain_step(&self) -> Drain {
        if self.ready.is_empty() {
            return Drain::Done;
        }

        let unclaimed = self.ready.iter().find(|tid| {
            self.threads
                .get(tid)
                .map_or(false, |tcb| tcb.joiner.is_none())
        });
        match unclaimed {
            Some(&tid) => Drain::Join(tid),
            None => Drain::Wait,
        }
    }

    /// Free every remaining thread and hand back the preemption timer
    ///
    /// Only valid once [`Self::drain_step`] reports [`Drain::Done`].
    pub fn teardown(mut self) -> Option<Preemption> {
        while let Ok(tid) = self.zombies.dequeue() {
            let code = self.free(tid);
            log::trace!("[SCHED] reclaimed unjoined thread {} (exit code {})", tid, code);
        }

        let Scheduler {
            ready,
            zombies,
            mut threads,
            preemption,
            ..
        } = self;

        if ready.destroy().is_err() || zombies.destroy().is_err() {
            invariant("scheduler torn down with queued threads");
        }
        threads.remove(&MAIN_TID);
        if !threads.is_empty() {
            invariant("scheduler torn down with live threads");
        }

        preemption
    }

    fn tcb_mut(&mut self, tid: Tid) -> &mut Tcb {
        match self.threads.get_mut(&tid) {
            Some(tcb) => tcb,
            None => invariant("scheduled thread has no TCB"),
        }
    }

    fn switch_between(&mut self, prev: Tid, next: Tid) -> Switch {
        let prev: *mut ExecutionContext = &mut self.tcb_mut(prev).context;
        let next: *const ExecutionContext = &self.tcb_mut(next).context;
        Switch { prev, next }
    }

    /// Drop a zombie's TCB and stack, returning its exit code
    fn free(&mut self, tid: Tid) -> i32 {
        let mut tcb = match self.threads.remove(&tid) {
            Some(tcb) => tcb,
            None => invariant("zombie has no TCB"),
        };
        if let Some(stack) = tcb.stack.take() {
            destroy_stack(stack);
        }
        match tcb.exit_code {
            Some(code) => code,
            None => invariant("zombie without exit code"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
