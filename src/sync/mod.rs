// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Synchronization primitives
//!
//! Green threads never run in parallel, so the only thing that can interrupt
//! a critical section is the preemption tick. The single primitive here
//! therefore pairs a lock with masking that tick.
//!
//! # Primitives
//!
//! - **MaskedMutex**: spin mutex that masks preemption while held

pub mod masked;

pub use masked::{MaskedGuard, MaskedMutex};
