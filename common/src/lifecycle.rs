//! Managed unit lifecycle contract.
//!
//! Probe units and subscription units share the same shape
//! (init / run / healthcheck / shutdown) so that they can be orchestrated
//! and tested uniformly. Any unit can also be exposed to a probe as a
//! [`HealthContributor`] through [`UnitContributor`].

use crate::error::UnitError;
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio_util::sync::CancellationToken;

/// Something that can report its current health.
///
/// Contributors are called on every probe request, including after another
/// contributor already reported unhealthy, so implementations must be cheap
/// and free of side effects the caller would notice.
#[async_trait]
pub trait HealthContributor: Send + Sync {
    /// Returns true when healthy. `ctx` is cancelled when the request goes away.
    async fn is_healthy(&self, ctx: &CancellationToken) -> bool;
}

/// Lifecycle shared by every managed unit.
#[async_trait]
pub trait ManagedUnit: Send + Sync {
    /// Unit name used in logs.
    fn name(&self) -> &str;

    /// Construction-time checks. Must not perform network I/O.
    async fn init(&self, ctx: &CancellationToken) -> Result<(), UnitError>;

    /// Connect and start doing work.
    async fn run(&self, ctx: &CancellationToken) -> Result<(), UnitError>;

    /// Current health, possibly attempting recovery first.
    async fn healthcheck(&self, ctx: &CancellationToken) -> bool;

    /// Release resources owned by the unit.
    async fn shutdown(&self, ctx: &CancellationToken) -> Result<(), UnitError>;
}

/// Exposes a [`ManagedUnit`]'s healthcheck as a [`HealthContributor`].
pub struct UnitContributor<U: ?Sized> {
    unit: Arc<U>,
}

impl<U: ManagedUnit + ?Sized> UnitContributor<U> {
    /// Wrap a shared unit.
    pub fn new(unit: Arc<U>) -> Self {
        Self { unit }
    }
}

#[async_trait]
impl<U: ManagedUnit + ?Sized> HealthContributor for UnitContributor<U> {
    async fn is_healthy(&self, ctx: &CancellationToken) -> bool {
        self.unit.healthcheck(ctx).await
    }
}

/// Health flag flipped by the service itself.
///
/// Typical use: a startup probe contributor that turns healthy once
/// initialization has finished.
#[derive(Clone, Debug, Default)]
pub struct HealthFlag {
    inner: Arc<AtomicBool>,
}

impl HealthFlag {
    /// Create a flag with the given initial state.
    pub fn new(healthy: bool) -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(healthy)),
        }
    }

    /// Update the flag.
    pub fn set_healthy(&self, healthy: bool) {
        self.inner.store(healthy, Ordering::SeqCst);
    }

    /// Current state of the flag.
    pub fn get(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthContributor for HealthFlag {
    async fn is_healthy(&self, _ctx: &CancellationToken) -> bool {
        self.get()
    }
}
