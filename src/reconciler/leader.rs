use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LEASE_NAME: &str = "deploywatch-leader";
const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Leadership as observed by the rest of the process. `generation` counts
/// lease transitions, so consumers can tell re-acquisition apart from an
/// uninterrupted hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeadershipStatus {
    pub is_leader: bool,
    pub generation: u64,
}

pub type LeadershipWatch = watch::Receiver<LeadershipStatus>;

/// A receiver that permanently reads leader, for deployments that run a
/// single replica with leader election disabled.
pub fn always_leader() -> LeadershipWatch {
    let (tx, rx) = watch::channel(LeadershipStatus {
        is_leader: true,
        generation: 0,
    });
    // Dropping the sender freezes the value; readers keep seeing it.
    drop(tx);
    rx
}

/// Claims and renews a coordination.k8s.io/v1 Lease, publishing the outcome
/// on a watch channel. Candidates with an expired or unheld lease race on
/// the lease's resourceVersion; the API server arbitrates.
pub struct LeaseElector {
    api: Api<Lease>,
    identity: String,
    status_tx: watch::Sender<LeadershipStatus>,
}

impl LeaseElector {
    pub fn new(client: Client, namespace: &str) -> (Self, LeadershipWatch) {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "deploywatch".to_string());
        let identity = format!("{host}-{}", Uuid::new_v4());
        let (status_tx, status_rx) = watch::channel(LeadershipStatus::default());
        (
            Self {
                api: Api::namespaced(client, namespace),
                identity,
                status_tx,
            },
            status_rx,
        )
    }

    /// Runs until `shutdown` fires, then releases the lease if held.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(identity = %self.identity, lease = LEASE_NAME, "leader election started");
        let mut ticker = tokio::time::interval(RENEW_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            match self.try_acquire().await {
                Ok(status) => {
                    let was_leader = self.status_tx.borrow().is_leader;
                    if was_leader != status.is_leader {
                        if status.is_leader {
                            info!(identity = %self.identity, generation = status.generation, "acquired leadership");
                        } else {
                            warn!(identity = %self.identity, "lost leadership");
                        }
                    }
                    self.status_tx.send_if_modified(|current| {
                        if *current != status {
                            *current = status;
                            true
                        } else {
                            false
                        }
                    });
                }
                Err(err) => debug!(error = %err, "lease renewal attempt failed"),
            }
        }

        let held = self.status_tx.borrow().is_leader;
        if held {
            if let Err(err) = self.release().await {
                warn!(error = %err, "failed to release leadership lease");
            }
        }
        let generation = self.status_tx.borrow().generation;
        let _ = self.status_tx.send(LeadershipStatus {
            is_leader: false,
            generation,
        });
    }

    async fn try_acquire(&self) -> Result<LeadershipStatus, kube::Error> {
        let now = Utc::now();
        match self.api.get_opt(LEASE_NAME).await? {
            None => {
                let lease = self.desired_lease(None, now);
                match self.api.create(&PostParams::default(), &lease).await {
                    Ok(created) => Ok(status_for(&created, &self.identity)),
                    // Another candidate created it first.
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(LeadershipStatus::default()),
                    Err(err) => Err(err),
                }
            }
            Some(existing) => {
                if holder_is(&existing, &self.identity) || lease_expired(&existing, now) {
                    let lease = self.desired_lease(Some(&existing), now);
                    match self.api.replace(LEASE_NAME, &PostParams::default(), &lease).await {
                        Ok(updated) => Ok(status_for(&updated, &self.identity)),
                        // Conflict: someone else renewed or took it in between.
                        Err(kube::Error::Api(e)) if e.code == 409 => {
                            Ok(LeadershipStatus {
                                is_leader: false,
                                generation: transitions(&existing),
                            })
                        }
                        Err(err) => Err(err),
                    }
                } else {
                    Ok(LeadershipStatus {
                        is_leader: false,
                        generation: transitions(&existing),
                    })
                }
            }
        }
    }

    async fn release(&self) -> Result<(), kube::Error> {
        if let Some(mut lease) = self.api.get_opt(LEASE_NAME).await? {
            if !holder_is(&lease, &self.identity) {
                return Ok(());
            }
            if let Some(spec) = lease.spec.as_mut() {
                spec.holder_identity = None;
                spec.acquire_time = None;
                spec.renew_time = None;
            }
            self.api
                .replace(LEASE_NAME, &PostParams::default(), &lease)
                .await?;
            info!(identity = %self.identity, "released leadership lease");
        }
        Ok(())
    }

    fn desired_lease(&self, existing: Option<&Lease>, now: DateTime<Utc>) -> Lease {
        desired_lease(&self.identity, existing, now)
    }
}

fn holder_identity(lease: &Lease) -> Option<&str> {
    lease
        .spec
        .as_ref()
        .and_then(|spec| spec.holder_identity.as_deref())
}

fn holder_is(lease: &Lease, identity: &str) -> bool {
    holder_identity(lease) == Some(identity)
}

/// A lease with no holder or no renew time counts as expired.
fn lease_expired(lease: &Lease, now: DateTime<Utc>) -> bool {
    let Some(spec) = lease.spec.as_ref() else {
        return true;
    };
    if spec.holder_identity.is_none() {
        return true;
    }
    let Some(renew_time) = spec.renew_time.as_ref() else {
        return true;
    };
    let duration = spec
        .lease_duration_seconds
        .unwrap_or(LEASE_DURATION.as_secs() as i32);
    renew_time.0 + chrono::Duration::seconds(i64::from(duration)) < now
}

fn transitions(lease: &Lease) -> u64 {
    lease
        .spec
        .as_ref()
        .and_then(|spec| spec.lease_transitions)
        .map(|t| t.max(0) as u64)
        .unwrap_or(0)
}

fn status_for(lease: &Lease, identity: &str) -> LeadershipStatus {
    LeadershipStatus {
        is_leader: holder_is(lease, identity),
        generation: transitions(lease),
    }
}

fn desired_lease(identity: &str, existing: Option<&Lease>, now: DateTime<Utc>) -> Lease {
    let renewing = existing.map(|l| holder_is(l, identity)).unwrap_or(false);
    let transitions_count = match existing {
        Some(lease) if !renewing => transitions(lease) + 1,
        Some(lease) => transitions(lease),
        None => 0,
    };
    let acquire_time = if renewing {
        existing
            .and_then(|l| l.spec.as_ref())
            .and_then(|spec| spec.acquire_time.clone())
    } else {
        Some(MicroTime(now))
    };

    Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            resource_version: existing.and_then(|l| l.metadata.resource_version.clone()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(identity.to_string()),
            lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
            acquire_time,
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions_count as i32),
            ..Default::default()
        }),
    }
}
