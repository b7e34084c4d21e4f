//! Registration verifier
//!
//! Asks the monitoring server whether a device's host object exists and
//! whether it has reported data recently. Used for reporting after a run;
//! it never gates the orchestrator.

use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::storage::settings::ZabbixSettings;
use crate::utils::{retry_with_backoff, CooldownOptions, RetryOutcome};
use crate::zabbix::client::ZabbixClient;
use crate::zabbix::hosts::Host;

/// Verifier options
#[derive(Debug, Clone)]
pub struct VerifierOptions {
    /// Host lookups before giving up
    pub attempts: u32,

    pub cooldown: CooldownOptions,

    /// Latest data older than this is stale
    pub freshness: Duration,
}

impl VerifierOptions {
    pub fn from_settings(settings: &ZabbixSettings) -> Self {
        let interval = Duration::from_secs(settings.verify_interval_secs);
        Self {
            attempts: settings.verify_attempts,
            cooldown: CooldownOptions {
                base_delay: interval,
                max_delay: interval * 6,
                multiplier: 1.5,
            },
            freshness: Duration::from_secs(settings.freshness_secs),
        }
    }
}

/// Whether a device is known to the monitoring server
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrationStatus {
    pub registered: bool,
    pub host_id: Option<String>,

    /// Time since the newest collected value; `None` if nothing arrived yet
    pub last_data_age: Option<Duration>,

    /// Data arrived inside the freshness window
    pub fresh: bool,

    /// Host lookups made
    pub lookups: u32,
}

impl RegistrationStatus {
    /// Registered and reporting
    pub fn is_healthy(&self) -> bool {
        self.registered && self.fresh
    }
}

enum LookupError {
    NotFound,
    Failed(DeployError),
}

/// Registration verifier
pub struct Verifier {
    client: ZabbixClient,
    options: VerifierOptions,
}

impl Verifier {
    pub fn new(client: ZabbixClient, options: VerifierOptions) -> Self {
        Self { client, options }
    }

    /// Check one device. Lookups are retried with backoff until the host
    /// appears or attempts run out; API errors after the last attempt are
    /// returned as errors, a host that never appears as unregistered.
    pub async fn check(&self, device_name: &str) -> Result<RegistrationStatus, DeployError> {
        let client = &self.client;
        let outcome = retry_with_backoff(
            self.options.attempts,
            &self.options.cooldown,
            tokio::time::sleep,
            move |attempt| async move {
                debug!("Looking up host {} (attempt {})", device_name, attempt);
                match client.find_host(device_name).await {
                    Ok(Some(host)) => Ok(host),
                    Ok(None) => Err(LookupError::NotFound),
                    Err(e) => {
                        warn!("Host lookup for {} failed: {}", device_name, e);
                        Err(LookupError::Failed(e))
                    }
                }
            },
        )
        .await;

        let (host, lookups): (Host, u32) = match outcome {
            RetryOutcome::Succeeded { value, attempts } => (value, attempts),
            RetryOutcome::Exhausted {
                attempts,
                last_error: LookupError::NotFound,
            } => {
                info!("{} not registered after {} lookups", device_name, attempts);
                return Ok(RegistrationStatus {
                    lookups: attempts,
                    ..Default::default()
                });
            }
            RetryOutcome::Exhausted {
                last_error: LookupError::Failed(e),
                ..
            } => return Err(e),
        };

        let last_data_age = self
            .client
            .last_data(&host.hostid)
            .await?
            .map(|clock| (Utc::now() - clock).to_std().unwrap_or(Duration::ZERO));
        let fresh = last_data_age.is_some_and(|age| age <= self.options.freshness);

        Ok(RegistrationStatus {
            registered: true,
            host_id: Some(host.hostid),
            last_data_age,
            fresh,
            lookups,
        })
    }

    /// Check several devices concurrently, keeping input order
    pub async fn check_all(
        &self,
        device_names: &[String],
    ) -> Vec<(String, Result<RegistrationStatus, DeployError>)> {
        let checks = device_names.iter().map(|name| async move {
            (name.clone(), self.check(name).await)
        });
        join_all(checks).await
    }
}
