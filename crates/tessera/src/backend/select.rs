//! Backend selection
//!
//! Runs once per [`Server`](crate::Server). The result is fixed for the
//! server's lifetime; call sites never branch on it.

use super::regionized::RegionizedBackend;
use super::tick::TickBackend;
use super::{BackendKind, ServerBackend};
use crate::config::{BackendPreference, SchedulerConfig};
use crate::error::SchedulerError;
use crate::host::{Feature, Host};
use crate::world::Owner;
use std::sync::Arc;
use tracing::info;

/// Decide which family `host` should be driven through
fn resolve(host: &dyn Host, preference: BackendPreference) -> BackendKind {
    match preference {
        BackendPreference::Tick => BackendKind::Tick,
        BackendPreference::Regionized => BackendKind::Regionized,
        BackendPreference::Auto if host.has_feature(Feature::RegionThreading) => {
            BackendKind::Regionized
        }
        BackendPreference::Auto => BackendKind::Tick,
    }
}

pub(crate) fn select(
    host: &dyn Host,
    owner: &Owner,
    config: &SchedulerConfig,
) -> Result<Arc<dyn ServerBackend>, SchedulerError> {
    let kind = resolve(host, config.backend);
    let forced = config.backend != BackendPreference::Auto;

    let backend: Arc<dyn ServerBackend> = match kind {
        BackendKind::Regionized => match host.regionized_host() {
            Some(regionized) => Arc::new(RegionizedBackend::new(regionized, owner.clone())),
            None if forced => {
                return Err(SchedulerError::BackendUnavailable {
                    requested: kind.name(),
                })
            }
            None => {
                return Err(SchedulerError::Misconfigured(
                    "host advertises region threading but provides no regionized scheduler"
                        .to_string(),
                ))
            }
        },
        BackendKind::Tick => match host.tick_host() {
            Some(tick) => Arc::new(TickBackend::new(tick, owner.clone(), config.clone())),
            None if forced => {
                return Err(SchedulerError::BackendUnavailable {
                    requested: kind.name(),
                })
            }
            None => {
                return Err(SchedulerError::Misconfigured(
                    "host provides no tick scheduler and does not advertise region threading"
                        .to_string(),
                ))
            }
        },
    };

    info!(owner = %owner, backend = kind.name(), "scheduler backend selected");
    Ok(backend)
}
