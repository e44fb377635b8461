//! Device location with a bounded wait and a fixed fallback.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use nearby_core::Coordinates;

/// Why a position request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    Denied,

    #[error("position unavailable")]
    Unavailable,
}

/// Why a [`LocationFix`] holds the fallback position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    Denied,
    Unavailable,
    Timeout,
}

impl From<LocationError> for FallbackReason {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::Denied => FallbackReason::Denied,
            LocationError::Unavailable => FallbackReason::Unavailable,
        }
    }
}

/// Source of the device's position.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates, LocationError>;
}

/// A device without positioning support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::Unavailable)
    }
}

/// Always reports the same position.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinates);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Ok(self.0)
    }
}

/// Outcome of [`acquire_location`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub at: Coordinates,
    /// Set when `at` is the fallback rather than the device's position.
    pub fallback: Option<FallbackReason>,
}

impl LocationFix {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Ask `provider` for a position, giving up after `timeout`.
///
/// Never fails: a denied, unavailable or slow provider yields `fallback`
/// together with the reason.
pub async fn acquire_location(
    provider: &dyn LocationProvider,
    timeout: Duration,
    fallback: Coordinates,
) -> LocationFix {
    let reason = match tokio::time::timeout(timeout, provider.current_position()).await {
        Ok(Ok(at)) => {
            debug!(latitude = at.latitude, longitude = at.longitude, "device located");
            return LocationFix { at, fallback: None };
        }
        Ok(Err(e)) => FallbackReason::from(e),
        Err(_) => FallbackReason::Timeout,
    };

    warn!(?reason, "using fallback location");
    LocationFix {
        at: fallback,
        fallback: Some(reason),
    }
}
