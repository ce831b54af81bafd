//! Bounded pool of exclusive rendering sessions
//!
//! Checkout is a [`SessionGuard`]: the session goes back to the pool when the
//! guard is dropped, whether the work finished, failed, panicked or its task
//! was aborted.

use super::{Session, SessionFactory};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Errors raised by the session pool
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Could not create any of the {requested} requested sessions")]
    Empty { requested: usize },

    #[error("Session pool is closed")]
    Closed,
}

/// Pool of `capacity` sessions handed out one caller at a time
///
/// The semaphore holds one permit per free session. A permit is only ever
/// released after its session is back on the free list, so a successful
/// permit acquisition always finds a session to pop.
pub struct SessionPool {
    free: Mutex<Vec<Box<dyn Session>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    busy: AtomicUsize,
    peak_busy: AtomicUsize,
}

impl SessionPool {
    /// Builds a pool by creating up to `capacity` sessions
    ///
    /// Sessions that fail to start are logged and skipped; the pool then runs
    /// at reduced capacity. Only a pool with no session at all is an error.
    ///
    /// # Arguments
    ///
    /// * `factory` - Creates one session per slot
    /// * `capacity` - Requested number of sessions
    ///
    /// # Returns
    ///
    /// * `Ok(Arc<SessionPool>)` - Pool with at least one session
    /// * `Err(PoolError::Empty)` - No session could be created
    pub async fn build(
        factory: &dyn SessionFactory,
        capacity: usize,
    ) -> Result<Arc<Self>, PoolError> {
        let mut sessions = Vec::with_capacity(capacity);

        for slot in 0..capacity {
            match factory.create(slot).await {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!("Failed to start session {}: {}", slot, e),
            }
        }

        if sessions.is_empty() {
            return Err(PoolError::Empty {
                requested: capacity,
            });
        }

        if sessions.len() < capacity {
            tracing::warn!(
                "Session pool running at reduced capacity: {} of {} sessions",
                sessions.len(),
                capacity
            );
        } else {
            tracing::info!("Session pool ready: {} sessions", sessions.len());
        }

        Ok(Arc::new(Self::from_sessions(sessions)))
    }

    /// Wraps already-created sessions into a pool
    pub fn from_sessions(sessions: Vec<Box<dyn Session>>) -> Self {
        let capacity = sessions.len();
        Self {
            free: Mutex::new(sessions),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            busy: AtomicUsize::new(0),
            peak_busy: AtomicUsize::new(0),
        }
    }

    /// Waits for a free session and checks it out
    ///
    /// This is the pool's only backpressure: when every session is busy the
    /// caller is suspended until one is released.
    pub async fn acquire(self: &Arc<Self>) -> Result<SessionGuard, PoolError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let session = self.free_list().pop().ok_or(PoolError::Closed)?;

        let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_busy.fetch_max(busy, Ordering::SeqCst);
        tracing::trace!("Session {} acquired ({} busy)", session.id(), busy);

        Ok(SessionGuard {
            session: Some(session),
            pool: Arc::clone(self),
            permit: Some(permit),
        })
    }

    /// Returns a session to the pool; equivalent to dropping the guard
    pub fn release(&self, guard: SessionGuard) {
        drop(guard);
    }

    /// Number of sessions the pool was built with
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of sessions currently checked out
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously checked-out sessions seen so far
    pub fn peak_busy(&self) -> usize {
        self.peak_busy.load(Ordering::SeqCst)
    }

    /// Tears down every session, best effort
    ///
    /// Waits up to `timeout` for busy sessions to be released, then closes all
    /// sessions the pool holds. Teardown errors are logged, not propagated.
    /// After this call `acquire` fails with [`PoolError::Closed`].
    ///
    /// # Returns
    ///
    /// The number of sessions whose teardown failed
    pub async fn close_all(&self, timeout: Duration) -> usize {
        let all_free = tokio::time::timeout(
            timeout,
            self.permits.acquire_many(self.capacity as u32),
        )
        .await;

        match &all_free {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => tracing::debug!("Session pool already closed"),
            Err(_) => tracing::warn!(
                "{} sessions still busy after {:?}; closing the free ones only",
                self.busy(),
                timeout
            ),
        }
        self.permits.close();

        let sessions: Vec<Box<dyn Session>> = self.free_list().drain(..).collect();
        let mut failures = 0;
        for mut session in sessions {
            if let Err(e) = session.close().await {
                failures += 1;
                tracing::warn!("Failed to close session {}: {}", session.id(), e);
            }
        }

        if let Ok(Ok(permit)) = all_free {
            permit.forget();
        }

        failures
    }

    fn free_list(&self) -> MutexGuard<'_, Vec<Box<dyn Session>>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out session; returns itself to the pool on drop
pub struct SessionGuard {
    session: Option<Box<dyn Session>>,
    pool: Arc<SessionPool>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Deref for SessionGuard {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        // Only `drop` takes the session out.
        self.session.as_deref().expect("guard holds its session until dropped")
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_deref_mut()
            .expect("guard holds its session until dropped")
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::trace!("Session {} released", session.id());
            self.pool.free_list().push(session);
            self.pool.busy.fetch_sub(1, Ordering::SeqCst);
        }
        // Permit last: it must never be visible before the session is.
        drop(self.permit.take());
    }
}
