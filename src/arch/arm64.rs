// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! ARM64 context switch
//!
//! AAPCS64 callee-saved state: x19-x28, the frame pointer (x29), the link
//! register (x30), sp, and the low halves of v8-v15 (d8-d15).

use core::arch::global_asm;

use super::{BootstrapFn, STACK_ALIGN};

/// Saved callee-saved registers (AAPCS64)
///
/// Offsets are fixed by the assembly below:
/// 0..72 x19-x28, 80 x29, 88 x30, 96 sp, 104..160 d8-d15.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedRegisters {
    /// x19 through x28
    pub x: [u64; 10],
    /// Frame pointer (x29)
    pub fp: u64,
    /// Link register (x30), the resume address
    pub lr: u64,
    /// Stack pointer
    pub sp: u64,
    /// d8 through d15
    pub d: [u64; 8],
}

impl SavedRegisters {
    /// Create a zeroed register file, filled in by the first switch away
    pub const fn new() -> Self {
        Self {
            x: [0; 10],
            fp: 0,
            lr: 0,
            sp: 0,
            d: [0; 8],
        }
    }

    /// Build the register file of a thread that has never run
    ///
    /// `ret` in the switch routine jumps to the trampoline through lr; the
    /// trampoline calls `bootstrap(arg)` with x19 and x20 as its operands.
    ///
    /// # Safety
    ///
    /// `stack_top` must be one past the end of a writable region that stays
    /// mapped for as long as the context can run.
    pub unsafe fn for_entry(stack_top: usize, bootstrap: BootstrapFn, arg: usize) -> Self {
        let mut regs = Self::new();
        regs.x[0] = arg as u64;
        regs.x[1] = bootstrap as usize as u64;
        regs.lr = uthread_context_trampoline as usize as u64;
        regs.sp = (stack_top & !(STACK_ALIGN - 1)) as u64;
        regs
    }

    /// Saved stack pointer
    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
    }
}

global_asm!(
    r#"
    .text
    .global uthread_switch_context
    .type uthread_switch_context,%function
    .p2align 2
uthread_switch_context:
    // x0 = prev (save into), x1 = next (restore from)
    stp x19, x20, [x0, #0]
    stp x21, x22, [x0, #16]
    stp x23, x24, [x0, #32]
    stp x25, x26, [x0, #48]
    stp x27, x28, [x0, #64]
    stp x29, x30, [x0, #80]
    mov x9, sp
    str x9, [x0, #96]
    stp d8, d9, [x0, #104]
    stp d10, d11, [x0, #120]
    stp d12, d13, [x0, #136]
    stp d14, d15, [x0, #152]

    ldp x19, x20, [x1, #0]
    ldp x21, x22, [x1, #16]
    ldp x23, x24, [x1, #32]
    ldp x25, x26, [x1, #48]
    ldp x27, x28, [x1, #64]
    ldp x29, x30, [x1, #80]
    ldr x9, [x1, #96]
    mov sp, x9
    ldp d8, d9, [x1, #104]
    ldp d10, d11, [x1, #120]
    ldp d12, d13, [x1, #136]
    ldp d14, d15, [x1, #152]

    ret
    .size uthread_switch_context, .-uthread_switch_context

    .global uthread_context_trampoline
    .type uthread_context_trampoline,%function
    .p2align 2
uthread_context_trampoline:
    .cfi_startproc
    // Outermost frame: unwinders stop here
    .cfi_undefined x30
    mov x0, x19
    blr x20
    brk #1
    .cfi_endproc
    .size uthread_context_trampoline, .-uthread_context_trampoline
"#
);

extern "C" {
    fn uthread_switch_context(prev: *mut SavedRegisters, next: *const SavedRegisters);
    fn uthread_context_trampoline();
}

/// Save the running registers into `prev` and resume `next`
///
/// # Safety
///
/// Same contract as the x86_64 routine: both files valid for the call, and
/// `next` either saved by this function or built by
/// [`SavedRegisters::for_entry`] over a still-mapped stack.
pub unsafe fn switch_context(prev: *mut SavedRegisters, next: *const SavedRegisters) {
    // SAFETY: forwarded to the caller
    unsafe { uthread_switch_context(prev, next) }
}
