//! Process-wide networking subsystem lifecycle.
//!
//! The subsystem is reference counted: the first `acquire` runs the
//! platform startup step and the last dropped guard runs the cleanup step.
//! Endpoints hold a guard for as long as they own a socket.
//!
//! ## Platform behavior
//!
//! - Unix: writes to a peer that already went away must come back as
//!   `EPIPE` rather than terminating the process, so startup sets `SIGPIPE`
//!   to ignored and cleanup restores whatever disposition was there before.
//! - Everything else: the socket layer initializes itself lazily, so only
//!   the reference count is tracked.

use std::io;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::error::EndpointError;

/// Startup and cleanup steps run on the 0→1 and 1→0 transitions.
pub trait Platform: Sync {
    /// State handed from startup to cleanup.
    type Saved: Send;

    fn startup(&self) -> io::Result<Self::Saved>;

    fn cleanup(&self, saved: Self::Saved);
}

struct RefState<S> {
    users: usize,
    saved: Option<S>,
}

/// Reference-counted owner of a platform's startup state.
pub struct Subsystem<P: Platform> {
    platform: P,
    state: Mutex<RefState<P::Saved>>,
}

impl<P: Platform> Subsystem<P> {
    pub const fn new(platform: P) -> Self {
        Self {
            platform,
            state: Mutex::new(RefState {
                users: 0,
                saved: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefState<P::Saved>> {
        // Counter stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new user, starting the platform on the first one.
    ///
    /// A failed startup leaves the count untouched.
    pub fn acquire(&'static self) -> Result<SubsystemGuard, EndpointError>
    where
        P: 'static,
    {
        let mut state = self.lock();

        if state.users == 0 {
            let saved = self
                .platform
                .startup()
                .map_err(EndpointError::Initialization)?;
            state.saved = Some(saved);
            debug!("Networking subsystem started");
        }

        state.users += 1;
        trace!(users = state.users, "Subsystem acquired");

        Ok(SubsystemGuard { owner: self })
    }

    /// Number of live guards.
    pub fn active_users(&self) -> usize {
        self.lock().users
    }
}

trait Release: Sync {
    fn release(&self);
}

impl<P: Platform> Release for Subsystem<P> {
    fn release(&self) {
        let mut state = self.lock();
        state.users = state.users.saturating_sub(1);
        trace!(users = state.users, "Subsystem released");

        if state.users == 0 {
            if let Some(saved) = state.saved.take() {
                self.platform.cleanup(saved);
                debug!("Networking subsystem cleaned up");
            }
        }
    }
}

/// Keeps a subsystem alive until dropped.
pub struct SubsystemGuard {
    owner: &'static dyn Release,
}

impl Drop for SubsystemGuard {
    fn drop(&mut self) {
        self.owner.release();
    }
}

impl std::fmt::Debug for SubsystemGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsystemGuard").finish_non_exhaustive()
    }
}

/// Ignores one signal while held, restoring the previous disposition after.
#[cfg(unix)]
pub struct IgnoreSignal(libc::c_int);

/// Nothing to start; the socket layer initializes itself on first use.
#[cfg(not(unix))]
pub struct LazyPlatform;

#[cfg(unix)]
static SUBSYSTEM: Subsystem<IgnoreSignal> = Subsystem::new(IgnoreSignal(libc::SIGPIPE));

#[cfg(not(unix))]
static SUBSYSTEM: Subsystem<LazyPlatform> = Subsystem::new(LazyPlatform);

/// Entry point for the shared, process-wide networking subsystem.
pub struct NetworkSubsystem;

impl NetworkSubsystem {
    /// Register a new user, starting the subsystem on the first one.
    pub fn acquire() -> Result<SubsystemGuard, EndpointError> {
        SUBSYSTEM.acquire()
    }

    /// Number of live guards.
    pub fn active_users() -> usize {
        SUBSYSTEM.active_users()
    }
}

#[cfg(unix)]
impl Platform for IgnoreSignal {
    type Saved = libc::sighandler_t;

    fn startup(&self) -> io::Result<Self::Saved> {
        // SAFETY: installs a predefined disposition, no handler code runs.
        let previous = unsafe { libc::signal(self.0, libc::SIG_IGN) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
        Ok(previous)
    }

    fn cleanup(&self, previous: Self::Saved) {
        // SAFETY: restores the disposition returned by `startup`.
        unsafe {
            libc::signal(self.0, previous);
        }
    }
}

#[cfg(not(unix))]
impl Platform for LazyPlatform {
    type Saved = ();

    fn startup(&self) -> io::Result<Self::Saved> {
        Ok(())
    }

    fn cleanup(&self, _saved: Self::Saved) {}
}

/// Platform that counts transitions and can be told to fail startup.
#[cfg(test)]
pub(crate) mod testing {
    use super::Platform;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub(crate) struct CountingPlatform {
        startups: AtomicUsize,
        cleanups: AtomicUsize,
        fail_startup: AtomicBool,
    }

    impl CountingPlatform {
        pub(crate) const fn new() -> Self {
            Self {
                startups: AtomicUsize::new(0),
                cleanups: AtomicUsize::new(0),
                fail_startup: AtomicBool::new(false),
            }
        }

        pub(crate) fn startups(&self) -> usize {
            self.startups.load(Ordering::SeqCst)
        }

        pub(crate) fn cleanups(&self) -> usize {
            self.cleanups.load(Ordering::SeqCst)
        }

        pub(crate) fn set_fail_startup(&self, fail: bool) {
            self.fail_startup.store(fail, Ordering::SeqCst);
        }
    }

    impl Platform for CountingPlatform {
        type Saved = usize;

        fn startup(&self) -> io::Result<usize> {
            if self.fail_startup.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "startup refused"));
            }
            Ok(self.startups.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn cleanup(&self, generation: usize) {
            assert_eq!(generation, self.startups(), "cleanup of a stale startup");
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
impl<P: Platform> Subsystem<P> {
    pub(crate) fn platform(&self) -> &P {
        &self.platform
    }
}

#[cfg(test)]
mod tests {
    use super::testing::CountingPlatform;
    use super::*;

    #[test]
    fn test_startup_once_per_first_user() {
        static SUB: Subsystem<CountingPlatform> = Subsystem::new(CountingPlatform::new());

        let first = SUB.acquire().unwrap();
        let second = SUB.acquire().unwrap();
        assert_eq!(SUB.active_users(), 2);
        assert_eq!(SUB.platform().startups(), 1);
        assert_eq!(SUB.platform().cleanups(), 0);

        drop(first);
        assert_eq!(SUB.active_users(), 1);
        assert_eq!(SUB.platform().cleanups(), 0);

        drop(second);
        assert_eq!(SUB.active_users(), 0);
        assert_eq!(SUB.platform().startups(), 1);
        assert_eq!(SUB.platform().cleanups(), 1);
    }

    #[test]
    fn test_restart_after_full_release() {
        static SUB: Subsystem<CountingPlatform> = Subsystem::new(CountingPlatform::new());

        drop(SUB.acquire().unwrap());
        drop(SUB.acquire().unwrap());

        assert_eq!(SUB.active_users(), 0);
        assert_eq!(SUB.platform().startups(), 2);
        assert_eq!(SUB.platform().cleanups(), 2);
    }

    #[test]
    fn test_failed_startup_leaves_no_user() {
        static SUB: Subsystem<CountingPlatform> = Subsystem::new(CountingPlatform::new());

        SUB.platform().set_fail_startup(true);
        let err = SUB.acquire().unwrap_err();
        assert!(matches!(err, EndpointError::Initialization(_)));
        assert!(err.is_fatal());
        assert_eq!(SUB.active_users(), 0);
        assert_eq!(SUB.platform().startups(), 0);
        assert_eq!(SUB.platform().cleanups(), 0);

        SUB.platform().set_fail_startup(false);
        let guard = SUB.acquire().unwrap();
        assert_eq!(SUB.active_users(), 1);
        drop(guard);
        assert_eq!(SUB.platform().cleanups(), 1);
    }

    // SIGUSR2 stands in for SIGPIPE so the process-wide subsystem used by
    // socket tests is never disturbed.
    #[cfg(unix)]
    #[test]
    fn test_ignore_signal_restores_previous() {
        static SUB: Subsystem<IgnoreSignal> = Subsystem::new(IgnoreSignal(libc::SIGUSR2));

        // SAFETY: predefined dispositions only.
        let query = || unsafe {
            let current = libc::signal(libc::SIGUSR2, libc::SIG_DFL);
            libc::signal(libc::SIGUSR2, current);
            current
        };
        // SAFETY: predefined disposition.
        unsafe { libc::signal(libc::SIGUSR2, libc::SIG_DFL) };

        let first = SUB.acquire().unwrap();
        assert_eq!(query(), libc::SIG_IGN);
        let second = SUB.acquire().unwrap();

        drop(first);
        assert_eq!(query(), libc::SIG_IGN);

        drop(second);
        assert_eq!(query(), libc::SIG_DFL);
    }
}
