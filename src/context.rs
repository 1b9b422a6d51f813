// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Execution contexts
//!
//! A green thread is a guarded stack plus a saved register file. This module
//! is the only place that maps stacks or transfers control between them.
//!
//! # Design
//!
//! - **Stacks**: anonymous private mappings with a `PROT_NONE` guard page at
//!   the low end, so running off the bottom faults instead of scribbling
//!   over a neighbor
//! - **First entry**: a fresh context resumes into the architecture
//!   trampoline, which calls [`bootstrap`] with the thread's TID
//! - **Switching**: [`switch`] is the single suspension point of the whole
//!   library; every caller holds the preemption mask across it

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};

use crate::arch::{self, SavedRegisters};
use crate::config::{MIN_STACK_SIZE, PANIC_EXIT_CODE};
use crate::error::{invariant, Result, ThreadError};
use crate::preempt;
use crate::sched::{self, Tid};

/// Page size used when the system refuses to report one
const FALLBACK_PAGE_SIZE: usize = 4096;

/// ============================================================================
/// Stacks
/// ============================================================================

/// A thread stack mapped with a guard page below it
///
/// ```text
/// map                     map + guard              map + guard + size
/// | guard (PROT_NONE)      | usable (RW)            |
///                          ^ bottom                 ^ top
/// ```
#[derive(Debug)]
pub struct Stack {
    /// Start of the whole mapping (the guard page)
    map: NonNull<u8>,
    /// Guard bytes at the bottom of the mapping
    guard: usize,
    /// Usable bytes above the guard
    size: usize,
}

impl Stack {
    /// Map a stack with at least `size` usable bytes
    pub fn new(size: usize) -> io::Result<Self> {
        let page = page_size();
        let size = size.checked_next_multiple_of(page).ok_or_else(too_large)?;
        let guard = page;
        let len = size.checked_add(guard).ok_or_else(too_large)?;

        // SAFETY: anonymous mapping, no existing memory is touched
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: the first page belongs to the mapping created above
        if unsafe { libc::mprotect(raw, guard, libc::PROT_NONE) } != 0 {
            let err = io::Error::last_os_error();
            // SAFETY: unmapping exactly what was mapped
            unsafe { libc::munmap(raw, len) };
            return Err(err);
        }

        let map = NonNull::new(raw.cast::<u8>()).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;
        Ok(Self { map, guard, size })
    }

    /// Lowest usable address
    pub fn bottom(&self) -> usize {
        self.map.as_ptr() as usize + self.guard
    }

    /// One past the highest usable address (stacks grow down)
    pub fn top(&self) -> usize {
        self.bottom() + self.size
    }

    /// Usable bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Guard bytes below the usable region
    pub fn guard_size(&self) -> usize {
        self.guard
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let len = self.guard + self.size;
        // SAFETY: the mapping is owned by this stack and no context runs on it
        if unsafe { libc::munmap(self.map.as_ptr().cast(), len) } != 0 {
            log::warn!("[STACK] munmap failed: {}", io::Error::last_os_error());
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => FALLBACK_PAGE_SIZE,
    }
}

fn too_large() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "stack size overflows the address space")
}

/// Allocate a thread stack with `size` usable bytes
pub fn alloc_stack(size: usize) -> Result<Stack> {
    Stack::new(size).map_err(ThreadError::StackAlloc)
}

/// Release a thread stack
///
/// The stack must no longer be in use by any context.
pub fn destroy_stack(stack: Stack) {
    drop(stack);
}

/// ============================================================================
/// Execution Context
/// ============================================================================

/// Saved machine state of a suspended thread
#[repr(transparent)]
#[derive(Debug, Default)]
pub struct ExecutionContext {
    regs: SavedRegisters,
}

impl ExecutionContext {
    /// Create an empty context
    ///
    /// The main thread uses one as is: its registers are captured by the
    /// first switch away from it.
    pub const fn new() -> Self {
        Self {
            regs: SavedRegisters::new(),
        }
    }

    /// Bind this context to `stack` so that its first resume runs the
    /// bootstrap routine of thread `tid`
    pub fn init(&mut self, stack: &mut Stack, tid: Tid) -> Result<()> {
        if stack.size() < MIN_STACK_SIZE {
            return Err(ThreadError::ContextInit);
        }

        // SAFETY: `top` is the end of the writable part of a live mapping,
        // and the mapping outlives the context (both belong to one TCB)
        self.regs = unsafe { SavedRegisters::for_entry(stack.top(), bootstrap, usize::from(tid)) };
        Ok(())
    }

    /// Saved stack pointer
    pub fn stack_pointer(&self) -> usize {
        self.regs.stack_pointer()
    }
}

/// Save the running thread into `prev` and resume `next`
///
/// Returns when another thread switches back into `prev`.
///
/// # Safety
///
/// - Both contexts must stay valid and unmoved until the switch completes
/// - `next` must have been initialized with [`ExecutionContext::init`] or
///   saved by an earlier switch, and its stack must still be mapped
/// - The preemption tick must be masked
pub unsafe fn switch(prev: *mut ExecutionContext, next: *const ExecutionContext) {
    debug_assert!(preempt::is_masked());

    // SAFETY: ExecutionContext is a transparent wrapper around the register
    // file, the rest is forwarded to the caller
    unsafe { arch::switch_context(prev.cast::<SavedRegisters>(), next.cast::<SavedRegisters>()) }
}

/// First Rust frame of every created thread
///
/// Entered from the trampoline with the tick still masked by the switch
/// that scheduled this thread for the first time.
extern "C" fn bootstrap(arg: usize) -> ! {
    let tid = match Tid::try_from(arg) {
        Ok(tid) => tid,
        Err(_) => invariant("bootstrap received an out-of-range TID"),
    };

    let mut entry = match sched::take_entry(tid) {
        Some(entry) => entry,
        None => invariant("thread started without an entry function"),
    };

    preempt::enable();
    log::trace!("[SCHED] thread {} running", tid);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry()));

    // Library frees happen with the tick masked, `exit` unmasks on switch
    preempt::disable();
    drop(entry);

    let code = match outcome {
        Ok(code) => code,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("<non-string panic payload>");
            log::error!("[SCHED] thread {} panicked: {}", tid, message);
            PANIC_EXIT_CODE
        }
    };

    sched::exit(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::STACK_ALIGN;
    use crate::config::STACK_SIZE;

    #[test]
    fn test_stack_geometry() {
        let stack = alloc_stack(STACK_SIZE).unwrap();
        assert_eq!(stack.size(), STACK_SIZE);
        assert_eq!(stack.guard_size(), page_size());
        assert_eq!(stack.top() - stack.bottom(), STACK_SIZE);
        assert_eq!(stack.bottom() % page_size(), 0);
        destroy_stack(stack);
    }

    #[test]
    fn test_stack_rounds_up_to_pages() {
        let stack = Stack::new(MIN_STACK_SIZE + 1).unwrap();
        assert!(stack.size() > MIN_STACK_SIZE);
        assert_eq!(stack.size() % page_size(), 0);
    }

    #[test]
    fn test_stack_is_writable() {
        let stack = Stack::new(MIN_STACK_SIZE).unwrap();
        let word = (stack.top() - 8) as *mut u64;
        unsafe {
            word.write(0x1234);
            assert_eq!(word.read(), 0x1234);
        }
    }

    #[test]
    fn test_stack_size_overflow() {
        assert!(Stack::new(usize::MAX).is_err());
    }

    #[test]
    fn test_context_init_points_into_stack() {
        let mut stack = alloc_stack(STACK_SIZE).unwrap();
        let mut context = ExecutionContext::new();
        context.init(&mut stack, 1).unwrap();

        let sp = context.stack_pointer();
        assert!(sp > stack.bottom() && sp <= stack.top());
        assert!(stack.top() - sp < STACK_ALIGN);
    }

    #[test]
    fn test_context_init_rejects_small_stack() {
        let mut stack = Stack::new(page_size()).unwrap();
        let mut context = ExecutionContext::new();
        if stack.size() < MIN_STACK_SIZE {
            assert!(matches!(context.init(&mut stack, 1), Err(ThreadError::ContextInit)));
        }
    }
}
