// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Preemption-masking mutex
//!
//! Holding the guard means the tick is masked on this OS thread, so no
//! green thread switch can happen inside the critical section. A lock that
//! is found already held can only mean the section was re-entered on the
//! same executor, which would deadlock forever, so it is treated as fatal
//! instead of spinning.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use crate::error::invariant;
use crate::preempt;

/// A spin mutex taken with the preemption tick masked
pub struct MaskedMutex<T> {
    inner: spin::Mutex<T>,
}

impl<T> MaskedMutex<T> {
    /// Create a new unlocked mutex
    pub const fn new(data: T) -> Self {
        Self {
            inner: spin::Mutex::new(data),
        }
    }

    /// Mask the tick and acquire the lock
    ///
    /// If the tick was unmasked on entry, dropping the guard unmasks it
    /// again. A caller that already masked it stays masked.
    pub fn lock(&self) -> MaskedGuard<'_, T> {
        let restore = !preempt::is_masked();
        preempt::disable();

        match self.inner.try_lock() {
            Some(guard) => MaskedGuard {
                guard: ManuallyDrop::new(guard),
                restore,
            },
            None => invariant("scheduler critical section re-entered"),
        }
    }

    /// Check if the mutex is currently locked
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

/// RAII guard for a [`MaskedMutex`]
pub struct MaskedGuard<'a, T> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    restore: bool,
}

impl<T> MaskedGuard<'_, T> {
    /// Release the lock but leave the tick masked
    ///
    /// Used right before a context switch: the thread that resumes on the
    /// other side unmasks.
    pub fn unlock_masked(mut self) {
        self.restore = false;
    }
}

impl<T> Drop for MaskedGuard<'_, T> {
    fn drop(&mut self) {
        // Release before unmasking, or a pending tick would find the lock held
        // SAFETY: the inner guard is dropped exactly once, here
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        if self.restore {
            preempt::enable();
        }
    }
}

impl<T> Deref for MaskedGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for MaskedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

// ============================================================================
// Tests
// ============================================================================
