//! ---
//! dr_section: "06-testing-qa"
//! dr_subsection: "tests"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Scriptable broker fake and fixtures for orchestration tests."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kits_broker::{
    BrokerAbout, BrokerError, BrokerInfo, MateStatusProbe, RoleMutator, VpnRoleDirectory,
};
use kits_common::{DnsConfig, FailoverPolicies};
use kits_dns::StaticResolver;
use kits_model::{
    BasicAuth, Datacenter, DatacenterPair, Endpoint, Kit, MateId, MateResult, MateStatus,
    ReplicationRole,
};
use kits_orchestrator::{DnsChangeDetector, FailoverSaga, KitDrController, WatchRegistry};
use kits_resilience::RetryPolicy;
use parking_lot::Mutex;

pub fn auth() -> BasicAuth {
    BasicAuth::new("admin", "secret")
}

pub fn kit(name: &str) -> Kit {
    let endpoint = |suffix: &str| Endpoint::new(format!("{name}-{suffix}"), 943);
    Kit {
        name: name.to_owned(),
        dc1: DatacenterPair {
            mate1: endpoint("1a"),
            mate2: endpoint("1b"),
        },
        dc2: DatacenterPair {
            mate1: endpoint("2a"),
            mate2: endpoint("2b"),
        },
    }
}

pub fn host(kit: &str, dc: Datacenter, mate: MateId) -> String {
    let slot = match (dc, mate) {
        (Datacenter::Dc1, MateId::Mate1) => "1a",
        (Datacenter::Dc1, MateId::Mate2) => "1b",
        (Datacenter::Dc2, MateId::Mate1) => "2a",
        (Datacenter::Dc2, MateId::Mate2) => "2b",
    };
    format!("{kit}-{slot}")
}

pub fn mate_result(kit: &str, dc: Datacenter, mate: MateId, status: MateStatus) -> MateResult {
    MateResult {
        kit: kit.to_owned(),
        dc,
        mate,
        host: host(kit, dc, mate),
        port: 943,
        status,
    }
}

pub fn transport(host: &str) -> BrokerError {
    BrokerError::Transport {
        url: format!("http://{host}:943/SEMP"),
        reason: "connection refused".into(),
    }
}

pub fn decode(host: &str) -> BrokerError {
    BrokerError::Decode {
        url: format!("http://{host}:943/SEMP"),
        reason: "unexpected body".into(),
    }
}

#[derive(Debug)]
struct Injected {
    remaining: u32,
    detail: Option<String>,
    error: BrokerError,
}

/// In-memory broker fleet keyed by host.
#[derive(Debug, Default)]
pub struct FakeBroker {
    statuses: Mutex<HashMap<String, MateStatus>>,
    listings: Mutex<HashMap<(String, ReplicationRole), Vec<String>>>,
    roles: Mutex<HashMap<(String, String), ReplicationRole>>,
    backlogs: Mutex<HashMap<(String, String), VecDeque<Vec<String>>>>,
    failures: Mutex<HashMap<(String, String), Injected>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hosts without a status fail to probe.
    pub fn set_status(&self, host: &str, status: MateStatus) {
        self.statuses.lock().insert(host.to_owned(), status);
    }

    /// Vpns listed by `host` for `role`; also records the role for `has_role`.
    pub fn set_vpns(&self, host: &str, role: ReplicationRole, vpns: &[&str]) {
        self.listings.lock().insert(
            (host.to_owned(), role),
            vpns.iter().map(|vpn| vpn.to_string()).collect(),
        );
        let mut roles = self.roles.lock();
        for vpn in vpns {
            roles.insert((host.to_owned(), vpn.to_string()), role);
        }
    }

    pub fn set_role_state(&self, host: &str, vpn: &str, role: ReplicationRole) {
        self.roles
            .lock()
            .insert((host.to_owned(), vpn.to_owned()), role);
    }

    pub fn role_of(&self, host: &str, vpn: &str) -> Option<ReplicationRole> {
        self.roles
            .lock()
            .get(&(host.to_owned(), vpn.to_owned()))
            .copied()
    }

    /// Successive backlog answers; empty once the script runs out.
    pub fn script_backlog(&self, host: &str, vpn: &str, answers: Vec<Vec<&str>>) {
        self.backlogs.lock().insert(
            (host.to_owned(), vpn.to_owned()),
            answers
                .into_iter()
                .map(|queues| queues.into_iter().map(str::to_owned).collect())
                .collect(),
        );
    }

    /// Fail the next `times` calls of `op` against `host`.
    pub fn fail(&self, op: &str, host: &str, times: u32, error: BrokerError) {
        self.failures.lock().insert(
            (op.to_owned(), host.to_owned()),
            Injected {
                remaining: times,
                detail: None,
                error,
            },
        );
    }

    /// Like [`FakeBroker::fail`], limited to calls whose detail equals `detail`.
    pub fn fail_detail(&self, op: &str, host: &str, detail: &str, times: u32, error: BrokerError) {
        self.failures.lock().insert(
            (op.to_owned(), host.to_owned()),
            Injected {
                remaining: times,
                detail: Some(detail.to_owned()),
                error,
            },
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    fn enter(&self, op: &str, host: &str, detail: &str) -> Result<(), BrokerError> {
        let entry = if detail.is_empty() {
            format!("{op} {host}")
        } else {
            format!("{op} {host} {detail}")
        };
        self.calls.lock().push(entry);
        let mut failures = self.failures.lock();
        if let Some(injected) = failures.get_mut(&(op.to_owned(), host.to_owned())) {
            let applies = injected.detail.as_deref().map_or(true, |wanted| wanted == detail);
            if applies && injected.remaining > 0 {
                injected.remaining -= 1;
                return Err(injected.error.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MateStatusProbe for FakeBroker {
    async fn probe(&self, endpoint: &Endpoint, _auth: &BasicAuth) -> Result<MateStatus, BrokerError> {
        self.enter("probe", &endpoint.host, "")?;
        self.statuses
            .lock()
            .get(&endpoint.host)
            .copied()
            .ok_or_else(|| transport(&endpoint.host))
    }
}

#[async_trait]
impl VpnRoleDirectory for FakeBroker {
    async fn list_vpns(
        &self,
        endpoint: &Endpoint,
        role: ReplicationRole,
        _auth: &BasicAuth,
    ) -> Result<Vec<String>, BrokerError> {
        self.enter("list", &endpoint.host, role.as_str())?;
        Ok(self
            .listings
            .lock()
            .get(&(endpoint.host.clone(), role))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl RoleMutator for FakeBroker {
    async fn set_role(
        &self,
        endpoint: &Endpoint,
        vpn: &str,
        role: ReplicationRole,
        _auth: &BasicAuth,
    ) -> Result<(), BrokerError> {
        self.enter("set_role", &endpoint.host, &format!("{vpn} {role}"))?;
        self.set_role_state(&endpoint.host, vpn, role);
        Ok(())
    }

    async fn replication_backlog(
        &self,
        endpoint: &Endpoint,
        vpn: &str,
        _auth: &BasicAuth,
    ) -> Result<Vec<String>, BrokerError> {
        self.enter("backlog", &endpoint.host, vpn)?;
        Ok(self
            .backlogs
            .lock()
            .get_mut(&(endpoint.host.clone(), vpn.to_owned()))
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }

    async fn has_role(
        &self,
        endpoint: &Endpoint,
        vpn: &str,
        role: ReplicationRole,
        _auth: &BasicAuth,
    ) -> Result<bool, BrokerError> {
        self.enter("has_role", &endpoint.host, &format!("{vpn} {role}"))?;
        Ok(self.role_of(&endpoint.host, vpn) == Some(role))
    }
}

#[async_trait]
impl BrokerAbout for FakeBroker {
    async fn about(&self, endpoint: &Endpoint, _auth: &BasicAuth) -> Result<BrokerInfo, BrokerError> {
        self.enter("about", &endpoint.host, "")?;
        Ok(BrokerInfo {
            platform: "VMR".into(),
            semp_version: "2.36".into(),
        })
    }
}

/// Step policies with short timeouts and the standard attempt counts.
pub fn policies() -> FailoverPolicies {
    FailoverPolicies {
        demote: RetryPolicy::flat(3, Duration::from_secs(1), Duration::from_secs(30)),
        drain: RetryPolicy::flat(12, Duration::from_secs(5), Duration::from_secs(70)),
        verify_standby: RetryPolicy::standard(3, Duration::from_secs(30)),
        promote: RetryPolicy::standard(3, Duration::from_secs(30)),
        validate: RetryPolicy::standard(3, Duration::from_secs(30)),
    }
}

pub fn discovery_policy() -> RetryPolicy {
    RetryPolicy::exponential(
        5,
        Duration::from_secs(5),
        2.0,
        Duration::from_secs(60),
        Duration::from_secs(60),
    )
}

pub struct Harness {
    pub broker: Arc<FakeBroker>,
    pub resolver: Arc<StaticResolver>,
    pub saga: Arc<FailoverSaga>,
    pub detector: Arc<DnsChangeDetector>,
    pub registry: WatchRegistry,
    pub controller: Arc<KitDrController>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_dns(DnsConfig::default())
    }

    pub fn with_dns(dns: DnsConfig) -> Self {
        let broker = FakeBroker::new();
        let resolver = Arc::new(StaticResolver::new());
        let saga = Arc::new(FailoverSaga::new(broker.clone(), policies()));
        let detector = Arc::new(DnsChangeDetector::new(
            resolver.clone(),
            saga.clone(),
            dns,
        ));
        let registry = WatchRegistry::new();
        let controller = Arc::new(KitDrController::new(
            broker.clone(),
            detector.clone(),
            registry.clone(),
            discovery_policy(),
        ));
        Self {
            broker,
            resolver,
            saga,
            detector,
            registry,
            controller,
        }
    }
}
