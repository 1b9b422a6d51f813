// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! x86_64 context switch
//!
//! Only the registers the System V ABI declares callee-saved are switched:
//! everything else is already spilled by the compiler around the call to
//! [`switch_context`].

use core::arch::global_asm;

use super::{BootstrapFn, STACK_ALIGN};

/// MXCSR at reset: all SSE exceptions masked, round to nearest
const MXCSR_DEFAULT: u32 = 0x1F80;

/// x87 control word at reset: extended precision, exceptions masked
const FPU_CW_DEFAULT: u16 = 0x037F;

/// Saved callee-saved registers (x86_64 System V ABI)
///
/// Field offsets are fixed by the assembly below:
/// 0x00 rsp, 0x08 rbp, 0x10 rbx, 0x18 r12, 0x20 r13, 0x28 r14, 0x30 r15,
/// 0x38 mxcsr, 0x3c x87 control word.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedRegisters {
    /// Stack pointer, pointing at the resume address
    pub rsp: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    /// SSE control/status (control bits are callee-saved)
    pub mxcsr: u32,
    /// x87 control word
    pub fpu_cw: u16,
    _pad: u16,
}

impl SavedRegisters {
    /// Create a zeroed register file, filled in by the first switch away
    pub const fn new() -> Self {
        Self {
            rsp: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            mxcsr: 0,
            fpu_cw: 0,
            _pad: 0,
        }
    }

    /// Build the register file of a thread that has never run
    ///
    /// Stack layout at `stack_top` (grows down):
    ///
    /// ```text
    /// top (16-aligned)
    /// [top - 8]  trampoline address   <- rsp, consumed by `ret`
    /// ```
    ///
    /// The trampoline receives `arg` in r12 and `bootstrap` in r13 and
    /// calls `bootstrap(arg)` with a correctly aligned stack.
    ///
    /// # Safety
    ///
    /// `stack_top` must be one past the end of a writable region of at least
    /// 16 bytes that stays mapped for as long as the context can run.
    pub unsafe fn for_entry(stack_top: usize, bootstrap: BootstrapFn, arg: usize) -> Self {
        let top = stack_top & !(STACK_ALIGN - 1);
        let rsp = top - 8;

        // SAFETY: rsp lies inside the caller's writable stack region
        unsafe {
            (rsp as *mut u64).write(uthread_context_trampoline as usize as u64);
        }

        Self {
            rsp: rsp as u64,
            rbp: 0,
            rbx: 0,
            r12: arg as u64,
            r13: bootstrap as usize as u64,
            r14: 0,
            r15: 0,
            mxcsr: MXCSR_DEFAULT,
            fpu_cw: FPU_CW_DEFAULT,
            _pad: 0,
        }
    }

    /// Saved stack pointer
    pub fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }
}

// uthread_switch_context(prev = rdi, next = rsi): the final `ret` resumes
// where `next` called us, or enters the trampoline for a fresh context.
//
// uthread_context_trampoline is the outermost frame of every thread: its
// return address (DWARF register 16) is undefined, so unwinders stop there.
global_asm!(
    r#"
    .text
    .global uthread_switch_context
    .type uthread_switch_context,@function
    .p2align 4
uthread_switch_context:
    mov [rdi + 0x00], rsp
    mov [rdi + 0x08], rbp
    mov [rdi + 0x10], rbx
    mov [rdi + 0x18], r12
    mov [rdi + 0x20], r13
    mov [rdi + 0x28], r14
    mov [rdi + 0x30], r15
    stmxcsr dword ptr [rdi + 0x38]
    fnstcw word ptr [rdi + 0x3c]

    mov rsp, [rsi + 0x00]
    mov rbp, [rsi + 0x08]
    mov rbx, [rsi + 0x10]
    mov r12, [rsi + 0x18]
    mov r13, [rsi + 0x20]
    mov r14, [rsi + 0x28]
    mov r15, [rsi + 0x30]
    ldmxcsr dword ptr [rsi + 0x38]
    fldcw word ptr [rsi + 0x3c]

    ret
    .size uthread_switch_context, .-uthread_switch_context

    .global uthread_context_trampoline
    .type uthread_context_trampoline,@function
    .p2align 4
uthread_context_trampoline:
    .cfi_startproc
    .cfi_undefined 16
    mov rdi, r12
    call r13
    ud2
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
/// Returns only when some other thread switches back into `prev`.
///
/// # Safety
///
/// Both pointers must be valid for the duration of the call, `next` must
/// hold either a register file saved by this function or one built by
/// [`SavedRegisters::for_entry`], and the stack `next` refers to must still
/// be mapped.
pub unsafe fn switch_context(prev: *mut SavedRegisters, next: *const SavedRegisters) {
    // SAFETY: forwarded to the caller
    unsafe { uthread_switch_context(prev, next) }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn never_called(_arg: usize) -> ! {
        unreachable!()
    }

    #[test]
    fn test_saved_registers_layout() {
        assert_eq!(core::mem::size_of::<SavedRegisters>(), 0x40);
        assert_eq!(core::mem::offset_of!(SavedRegisters, r15), 0x30);
        assert_eq!(core::mem::offset_of!(SavedRegisters, mxcsr), 0x38);
        assert_eq!(core::mem::offset_of!(SavedRegisters, fpu_cw), 0x3c);
    }

    #[test]
    fn test_for_entry_frame() {
        let mut stack = [0u64; 64];
        let top = stack.as_mut_ptr() as usize + core::mem::size_of_val(&stack);

        let regs = unsafe { SavedRegisters::for_entry(top, never_called, 0xdead) };

        // `ret` pops the trampoline and leaves rsp 16-aligned for the call
        assert_eq!(regs.stack_pointer() % 16, 8);
        assert!(regs.stack_pointer() < top);
        let slot = unsafe { *(regs.stack_pointer() as *const u64) };
        assert_eq!(slot, uthread_context_trampoline as usize as u64);

        assert_eq!(regs.r12, 0xdead);
        assert_eq!(regs.r13, never_called as usize as u64);
        assert_eq!(regs.rbp, 0);
        assert_eq!(regs.mxcsr, MXCSR_DEFAULT);
        assert_eq!(regs.fpu_cw, FPU_CW_DEFAULT);
    }
}
