//! Scoped critical section.
//!
//! The port supplies the actual masking through the `critical-section`
//! crate (PRIMASK, BASEPRI ceiling, a host mutex for tests). [`CriticalGuard`]
//! enters on construction and restores the previous state when dropped, so
//! early returns cannot leave interrupts masked. Guards nest.

#![allow(unsafe_code)]

use core::marker::PhantomData;

use critical_section::{CriticalSection, RestoreState};

/// RAII critical section
#[must_use = "the critical section ends when the guard is dropped"]
pub struct CriticalGuard {
    restore: RestoreState,
    // Restore state belongs to the context that acquired it.
    _not_send: PhantomData<*mut ()>,
}

impl CriticalGuard {
    /// Enter the critical section
    #[inline]
    pub fn enter() -> Self {
        // SAFETY: the matching release happens exactly once, in `Drop`, with
        // the state returned here. The guard is `!Send`, so release runs on
        // the context that acquired.
        let restore = unsafe { critical_section::acquire() };
        Self {
            restore,
            _not_send: PhantomData,
        }
    }

    /// Token proving the critical section is held, for `*_i` APIs
    #[inline]
    pub fn token(&self) -> CriticalSection<'_> {
        // SAFETY: the token cannot outlive the guard that holds the section.
        unsafe { CriticalSection::new() }
    }
}

impl Drop for CriticalGuard {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: `restore` came from the `acquire` in `enter`.
        unsafe { critical_section::release(self.restore) }
    }
}
