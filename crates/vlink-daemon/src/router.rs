//! Command router: signed vs unsigned dispatch.
//!
//! A single lookup table plus an internal branch on `requires_signing`
//! replaces any runtime wrapper polymorphism: commands missing from the
//! table or marked broadcast POST to the unsigned REST path; the rest
//! build a domain payload and go through the session signer.

use serde_json::Value;
use std::sync::Arc;

use crate::config::Tier;
use crate::fleet::{CommandResponse, FleetClient};
use crate::registry::{self, CommandDomain};
use crate::session::SessionManager;
use vlink_core::cache::ResponseCache;
use vlink_core::error::{VlinkError, VlinkResult};

pub struct CommandRouter {
    fleet: FleetClient,
    sessions: Arc<SessionManager>,
    cache: Arc<ResponseCache>,
    tier: Tier,
}

impl CommandRouter {
    #[must_use]
    pub fn new(
        fleet: FleetClient,
        sessions: Arc<SessionManager>,
        cache: Arc<ResponseCache>,
        tier: Tier,
    ) -> Self {
        CommandRouter {
            fleet,
            sessions,
            cache,
            tier,
        }
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// True when the named command could be dispatched under the current
    /// policy; used by the dispatcher to fail before any I/O.
    pub fn check_policy(&self, name: &str) -> VlinkResult<()> {
        if self.tier == Tier::Readonly {
            return Err(VlinkError::TierBlocked);
        }
        if let Some(spec) = registry::lookup(name) {
            if spec.requires_signing && !self.sessions.has_key() {
                return Err(VlinkError::KeyNotEnrolled);
            }
        }
        Ok(())
    }

    /// Route one write command to the signed or unsigned REST path.
    pub async fn execute(
        &self,
        vin: &str,
        name: &str,
        params: Value,
    ) -> VlinkResult<CommandResponse> {
        self.check_policy(name)?;

        let response = match registry::lookup(name) {
            None
            | Some(registry::CommandSpec {
                domain: CommandDomain::Broadcast,
                ..
            }) => self.fleet.command(vin, name, params).await?,
            Some(spec) => {
                let payload = registry::build_payload(name, &params);
                let CommandDomain::Domain(domain) = spec.domain else {
                    return Err(VlinkError::Internal("broadcast handled above".into()));
                };
                self.sessions.execute(vin, domain, &payload).await?
            }
        };

        let invalidated = self.cache.invalidate("vin", vin);
        tracing::debug!(%vin, %name, result=%response.result, invalidated, "command dispatched");
        Ok(response)
    }
}
