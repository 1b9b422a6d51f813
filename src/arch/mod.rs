// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Architecture-specific modules
//!
//! Each architecture provides the same three items:
//!
//! - `SavedRegisters`: the callee-saved register file of a suspended thread
//! - `SavedRegisters::for_entry`: a register file that, once switched to,
//!   enters the bootstrap routine on a fresh stack
//! - `switch_context`: save the running registers into one file and resume
//!   another
//!
//! Everything else in the crate is architecture-neutral.

#[cfg(not(target_os = "linux"))]
compile_error!("uthread requires Linux (POSIX timers with SIGEV_THREAD_ID)");

#[cfg(target_arch = "x86_64")]
mod amd64;
#[cfg(target_arch = "x86_64")]
pub use amd64::{switch_context, SavedRegisters};

#[cfg(target_arch = "aarch64")]
mod arm64;
#[cfg(target_arch = "aarch64")]
pub use arm64::{switch_context, SavedRegisters};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("uthread supports only x86_64 and aarch64");

/// Signature of the routine a fresh context enters through the trampoline
///
/// The single argument is the opaque word passed to
/// `SavedRegisters::for_entry`.
pub type BootstrapFn = extern "C" fn(usize) -> !;

/// Stack alignment required at a call boundary on both architectures
pub const STACK_ALIGN: usize = 16;
