// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread control blocks
//!
//! Defines the TCB and the TID allocator.

use core::fmt;

use super::state::ThreadState;
use crate::context::{ExecutionContext, Stack};
use crate::error::{invariant, Result};

/// Thread ID type
pub type Tid = u16;

/// TID of the thread that started the scheduler
pub const MAIN_TID: Tid = 0;

/// Thread entry function, run once on the thread's own stack
///
/// Called through `&mut` so the box outlives the call and can be freed
/// with the tick masked.
pub(crate) type ThreadEntry = Box<dyn FnMut() -> i32 + 'static>;

/// Box a one-shot entry function
pub(crate) fn boxed_entry<F>(entry: F) -> ThreadEntry
where
    F: FnOnce() -> i32 + 'static,
{
    let mut entry = Some(entry);
    Box::new(move || match entry.take() {
        Some(entry) => entry(),
        None => invariant("thread entry ran twice"),
    })
}

/// Monotonic TID allocator
///
/// Hands out 1, 2, ... up to `Tid::MAX`, never reusing a value.
#[derive(Debug, Clone)]
pub(crate) struct TidAllocator {
    next: Option<Tid>,
}

impl TidAllocator {
    /// Create an allocator whose first TID is 1
    pub const fn new() -> Self {
        Self {
            next: Some(MAIN_TID + 1),
        }
    }

    /// Create an allocator whose next TID is `next`
    #[cfg(test)]
    pub const fn starting_at(next: Tid) -> Self {
        Self { next: Some(next) }
    }

    /// The TID the next `allocate` will return, if any is left
    pub fn peek(&self) -> Option<Tid> {
        self.next
    }

    /// Take the next TID
    pub fn allocate(&mut self) -> Option<Tid> {
        let tid = self.next?;
        self.next = tid.checked_add(1);
        Some(tid)
    }
}

impl Default for TidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread control block
pub(crate) struct Tcb {
    /// Unique thread ID
    pub(crate) tid: Tid,
    /// Lifecycle state
    pub(crate) state: ThreadState,
    /// Saved registers while not running
    pub(crate) context: ExecutionContext,
    /// Owned stack (`None` for the main thread, which runs on its OS stack)
    pub(crate) stack: Option<Stack>,
    /// Entry function, taken by the bootstrap on first run
    pub(crate) entry: Option<ThreadEntry>,
    /// Exit code, set once on exit
    pub(crate) exit_code: Option<i32>,
    /// Thread waiting to collect this one
    pub(crate) joiner: Option<Tid>,
}

impl Tcb {
    /// Create the TCB of the thread that starts the scheduler
    pub fn main() -> Box<Self> {
        Box::new(Self {
            tid: MAIN_TID,
            state: ThreadState::Ready,
            context: ExecutionContext::new(),
            stack: None,
            entry: None,
            exit_code: None,
            joiner: None,
        })
    }

    /// Create a TCB that runs `entry` on `stack` when first scheduled
    pub fn new(tid: Tid, mut stack: Stack, entry: ThreadEntry) -> Result<Box<Self>> {
        let mut context = ExecutionContext::new();
        context.init(&mut stack, tid)?;

        Ok(Box::new(Self {
            tid,
            state: ThreadState::Ready,
            context,
            stack: Some(stack),
            entry: Some(entry),
            exit_code: None,
            joiner: None,
        }))
    }

    /// Record the exit code and turn the thread into a zombie
    pub fn mark_zombie(&mut self, code: i32) {
        if self.exit_code.is_some() {
            invariant("thread exited twice");
        }
        self.state = ThreadState::Zombie;
        self.exit_code = Some(code);
    }

    /// Check if the thread has exited
    pub fn is_zombie(&self) -> bool {
        self.state == ThreadState::Zombie
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("tid", &self.tid)
            .field("state", &self.state)
            .field("stack", &self.stack)
            .field("started", &self.entry.is_none())
            .field("exit_code", &self.exit_code)
            .field("joiner", &self.joiner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STACK_SIZE;
    use crate::context::alloc_stack;

    #[test]
    fn test_tid_allocator_sequence() {
        let mut tids = TidAllocator::new();
        assert_eq!(tids.peek(), Some(1));
        assert_eq!(tids.allocate(), Some(1));
        assert_eq!(tids.allocate(), Some(2));
        assert_eq!(tids.peek(), Some(3));
    }

    #[test]
    fn test_tid_allocator_exhaustion() {
        let mut tids = TidAllocator::starting_at(Tid::MAX);
        assert_eq!(tids.allocate(), Some(Tid::MAX));
        assert_eq!(tids.peek(), None);
        assert_eq!(tids.allocate(), None);
    }

    #[test]
    fn test_main_tcb() {
        let main = Tcb::main();
        assert_eq!(main.tid, MAIN_TID);
        assert!(main.stack.is_none());
        assert!(main.state.is_runnable());
    }

    #[test]
    fn test_boxed_entry_runs_in_place() {
        let witness = std::rc::Rc::new(());
        let held = witness.clone();
        let mut entry = boxed_entry(move || std::rc::Rc::strong_count(&held) as i32);

        assert_eq!(entry(), 2);
        // The closure's captures went with the call, the box is still ours
        assert_eq!(std::rc::Rc::strong_count(&witness), 1);
        drop(entry);
    }

    #[test]
    fn test_tcb_zombie() {
        let stack = alloc_stack(STACK_SIZE).unwrap();
        let mut tcb = Tcb::new(5, stack, Box::new(|| 0)).unwrap();
        assert!(!tcb.is_zombie());

        tcb.mark_zombie(9);
        assert!(tcb.is_zombie());
        assert_eq!(tcb.exit_code, Some(9));
    }
}
