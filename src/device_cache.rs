use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::controller::{DeviceController, DeviceIdentity, Error, Unit, UnitIdentity, UnitProfile};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Bound on one full refresh cycle. An elapsed timeout is handled as a
    /// connectivity failure.
    pub refresh_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { refresh_timeout: Duration::from_secs(10) }
    }
}

/// The cached view of the appliance that every entity adapter reads from.
///
/// Holds the last successfully fetched [`Snapshot`] together with derived
/// flags, and owns the controller handle used for both polling and commands.
/// [`StatusCache::refresh`] is the only writer of the cached state; failures
/// never escape it, they only flip availability and log.
pub struct StatusCache<C> {
    controller: C,
    config: CacheConfig,
    state: Mutex<CacheState>,
    // Fetching unit identities costs extra round-trips; hold the lock across
    // the fetch so concurrent readers cannot duplicate it.
    unit_identities: tokio::sync::Mutex<BTreeMap<Unit, UnitIdentity>>,
}

struct CacheState {
    snapshot: Snapshot,
    available: bool,
    climate_control_on: bool,
    installer_state: bool,
    profiles: BTreeMap<Unit, UnitProfile>,
    connectivity_failures: u32,
    decode_failures: u32,
}

struct RefreshCycle {
    snapshot: Snapshot,
    climate_control_on: bool,
    installer_state: bool,
    profiles: Option<BTreeMap<Unit, UnitProfile>>,
}

impl<C: DeviceController> StatusCache<C> {
    /// Fetches the initial snapshot, the climate power flag and the unit
    /// profiles, then closes the appliance link.
    ///
    /// Unlike [`StatusCache::refresh`], construction propagates errors: there
    /// is no previous snapshot to fall back to.
    pub async fn initialize(controller: C, config: CacheConfig) -> Result<Self, Error> {
        let cycle = async {
            let snapshot = controller.fetch_status().await?;
            let climate_control_on = if controller.has_unit(Unit::ClimateControl) {
                controller.is_turned_on(Unit::ClimateControl).await?
            } else {
                false
            };
            let mut profiles = BTreeMap::new();
            for unit in Unit::ALL {
                if controller.has_unit(unit) && snapshot.has_unit(unit) {
                    profiles.insert(unit, controller.profile(unit).await?);
                }
            }
            Ok::<_, Error>((snapshot, climate_control_on, profiles))
        };
        let (snapshot, climate_control_on, profiles) =
            tokio::time::timeout(config.refresh_timeout, cycle)
                .await
                .map_err(|_| Error::Timeout)??;
        controller.close().await?;
        let installer_state = snapshot.installer_state();
        Ok(Self {
            controller,
            config,
            state: Mutex::new(CacheState {
                snapshot,
                available: true,
                climate_control_on,
                installer_state,
                profiles,
                connectivity_failures: 0,
                decode_failures: 0,
            }),
            unit_identities: tokio::sync::Mutex::new(BTreeMap::new()),
        })
    }

    /// Pull the latest snapshot from the appliance.
    ///
    /// Never fails: connectivity-class problems (including timeouts and
    /// cancellation) clear availability, malformed responses are counted
    /// separately and leave availability alone. The previous snapshot is
    /// retained in both cases. Log noise is limited to the first occurrence
    /// of a connectivity streak, the first two occurrences of decode
    /// trouble, and a single recovery line.
    pub async fn refresh(&self) {
        let outcome = tokio::time::timeout(self.config.refresh_timeout, self.refresh_cycle()).await;
        match outcome {
            Ok(Ok(cycle)) => self.apply_success(cycle),
            Ok(Err(error)) => self.apply_failure(error),
            Err(_elapsed) => self.apply_failure(Error::Timeout),
        }
        self.close_link().await;
    }

    async fn refresh_cycle(&self) -> Result<RefreshCycle, Error> {
        let snapshot = self.controller.fetch_status().await?;
        let climate_control_on = if self.controller.has_unit(Unit::ClimateControl) {
            self.controller.is_turned_on(Unit::ClimateControl).await?
        } else {
            false
        };
        let was_installer = self.lock_state().installer_state;
        let installer_state = snapshot.installer_state();
        let mut profiles = None;
        if was_installer && !installer_state {
            // Leaving installer mode can change which operations are settable
            // (e.g. fixed vs. weather-compensated leaving water control), so
            // the cached profiles cannot be trusted any more.
            tracing::info!("installer mode exited, re-deriving capability profiles");
            self.controller.reload_profiles().await?;
            let mut reloaded = BTreeMap::new();
            for unit in Unit::ALL {
                if self.controller.has_unit(unit) && snapshot.has_unit(unit) {
                    reloaded.insert(unit, self.controller.profile(unit).await?);
                }
            }
            profiles = Some(reloaded);
        }
        Ok(RefreshCycle { snapshot, climate_control_on, installer_state, profiles })
    }

    fn apply_success(&self, cycle: RefreshCycle) {
        let mut state = self.lock_state();
        if !state.available {
            tracing::info!(
                failures = state.connectivity_failures,
                "appliance is reachable again"
            );
        }
        state.snapshot = cycle.snapshot;
        state.available = true;
        state.climate_control_on = cycle.climate_control_on;
        state.installer_state = cycle.installer_state;
        if let Some(profiles) = cycle.profiles {
            state.profiles = profiles;
        }
        state.connectivity_failures = 0;
        state.decode_failures = 0;
    }

    fn apply_failure(&self, error: Error) {
        let mut state = self.lock_state();
        if error.is_connectivity() {
            state.available = false;
            state.connectivity_failures += 1;
            if state.connectivity_failures == 1 {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "appliance became unreachable"
                );
            }
        } else {
            // A malformed field should not hide an otherwise live device, so
            // availability stays as it was.
            state.decode_failures += 1;
            if state.decode_failures <= 2 {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "could not interpret the appliance status"
                );
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The last known snapshot. Never triggers I/O.
    pub fn status(&self) -> Snapshot {
        self.lock_state().snapshot.clone()
    }

    pub fn available(&self) -> bool {
        self.lock_state().available
    }

    pub fn is_climate_control_on(&self) -> bool {
        self.lock_state().climate_control_on
    }

    /// Whether the unit was both discovered by the controller and present in
    /// the last snapshot. Entity construction is gated on this.
    pub fn has_unit(&self, unit: Unit) -> bool {
        self.controller.has_unit(unit) && self.lock_state().snapshot.has_unit(unit)
    }

    pub fn profile(&self, unit: Unit) -> Option<UnitProfile> {
        self.lock_state().profiles.get(&unit).cloned()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        self.controller.identity()
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Diagnostic counters for the current failure streaks.
    pub fn failure_counters(&self) -> (u32, u32) {
        let state = self.lock_state();
        (state.connectivity_failures, state.decode_failures)
    }

    /// Per-unit display identity, fetched at most once.
    pub async fn unit_identity(&self, unit: Unit) -> Result<UnitIdentity, Error> {
        let mut memo = self.unit_identities.lock().await;
        if let Some(identity) = memo.get(&unit) {
            return Ok(identity.clone());
        }
        let identity = self.controller.unit_identity(unit).await?;
        self.close_link().await;
        memo.insert(unit, identity.clone());
        Ok(identity)
    }

    /// Close the appliance link after a logical operation. A close failure is
    /// not interesting beyond debugging: the next operation reconnects.
    pub async fn close_link(&self) {
        if let Err(error) = self.controller.close().await {
            tracing::debug!(
                error = &error as &dyn std::error::Error,
                "could not close the appliance link"
            );
        }
    }
}
