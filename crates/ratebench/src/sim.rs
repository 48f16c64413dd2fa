//! In-memory access-control backend with a logical clock.
//!
//! Models the contracts the built-in suite exercises: a role registry, expiring
//! access grants and record storage whose cost grows with payload size. Every
//! call sleeps for a seeded, jittered latency and mutating calls may revert
//! with a configured probability.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::SimulatorConfig,
    error::BenchError,
    outcome::{OperationOutput, Payload},
    scenario::Backend,
};

const GAS_ASSIGN_ROLE: u64 = 48_000;
const GAS_GRANT_ACCESS: u64 = 65_000;
const GAS_TX_BASE: u64 = 21_000;
/// One storage slot per 32-byte word.
const GAS_PER_WORD: u64 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Provider,
    Patient,
    Auditor,
}

impl Role {
    pub const ALL: [Self; 4] = [Self::Admin, Self::Provider, Self::Patient, Self::Auditor];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::Provider => write!(f, "provider"),
            Self::Patient => write!(f, "patient"),
            Self::Auditor => write!(f, "auditor"),
        }
    }
}

/// Account address on the simulated ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrincipalId(String);

impl PrincipalId {
    fn from_index(index: u64) -> Self {
        Self(format!("0x{index:040x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One principal per role, fixed at setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principals(BTreeMap<Role, PrincipalId>);

impl Principals {
    /// Creates an account for every role, using the deployer as admin.
    pub fn enroll(backend: &SimBackend) -> Result<Self, BenchError> {
        let mut state = backend.lock_state();
        let admin = state.deployer.clone();
        let mut principals = BTreeMap::from([(Role::Admin, admin.clone())]);

        for role in Role::ALL.into_iter().filter(|r| *r != Role::Admin) {
            let id = state.new_principal();
            state.apply_role(&admin, &id, role).map_err(|e| BenchError::Setup(e.to_string()))?;
            principals.insert(role, id);
        }
        info!(principals = principals.len(), "Enrolled principals");
        Ok(Self(principals))
    }

    /// Principal holding `role`. Every role is enrolled, so this always succeeds
    /// for values built by [`Principals::enroll`].
    pub fn get(&self, role: Role) -> anyhow::Result<&PrincipalId> {
        self.0.get(&role).ok_or_else(|| anyhow::anyhow!("no principal enrolled for role {role}"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Role, &PrincipalId)> {
        self.0.iter()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("{principal} is not authorized to {action}")]
    Unauthorized { principal: PrincipalId, action: &'static str },
    #[error("record {0} not found")]
    NotFound(String),
    #[error("transaction reverted: {0}")]
    Reverted(String),
}

/// Receipt of a mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub gas_used: u64,
    pub block_time: u64,
}

impl OperationOutput for Receipt {
    fn resource_cost(&self) -> Option<f64> {
        Some(self.gas_used as f64)
    }

    fn into_payload(self) -> Payload {
        Payload::from([
            ("gasUsed".to_string(), json!(self.gas_used)),
            ("blockTime".to_string(), json!(self.block_time)),
        ])
    }
}

#[derive(Debug)]
struct LedgerState {
    now: u64,
    next_index: u64,
    deployer: PrincipalId,
    roles: BTreeMap<PrincipalId, BTreeSet<Role>>,
    /// (grantee, record) -> expiry timestamp
    grants: HashMap<(PrincipalId, String), u64>,
    /// record -> size in bytes
    records: HashMap<String, usize>,
}

impl LedgerState {
    fn new() -> Self {
        let deployer = PrincipalId::from_index(1);
        Self {
            now: 1_700_000_000,
            next_index: 2,
            roles: BTreeMap::from([(deployer.clone(), BTreeSet::from([Role::Admin]))]),
            deployer,
            grants: HashMap::new(),
            records: HashMap::new(),
        }
    }

    fn new_principal(&mut self) -> PrincipalId {
        let id = PrincipalId::from_index(self.next_index);
        self.next_index += 1;
        id
    }

    fn has_role(&self, who: &PrincipalId, role: Role) -> bool {
        self.roles.get(who).is_some_and(|roles| roles.contains(&role))
    }

    fn require(&self, who: &PrincipalId, roles: &[Role], action: &'static str) -> Result<(), SimError> {
        if roles.iter().any(|r| self.has_role(who, *r)) {
            Ok(())
        } else {
            Err(SimError::Unauthorized { principal: who.clone(), action })
        }
    }

    fn apply_role(&mut self, caller: &PrincipalId, who: &PrincipalId, role: Role) -> Result<(), SimError> {
        self.require(caller, &[Role::Admin], "assign roles")?;
        self.roles.entry(who.clone()).or_default().insert(role);
        Ok(())
    }

    fn receipt(&self, gas_used: u64) -> Receipt {
        Receipt { gas_used, block_time: self.now }
    }
}

fn storage_gas(bytes: usize) -> u64 {
    GAS_TX_BASE + (bytes as u64).div_ceil(32) * GAS_PER_WORD
}

/// The simulated backend.
#[derive(Debug)]
pub struct SimBackend {
    state: Mutex<LedgerState>,
    rng: Mutex<StdRng>,
    base_latency: Duration,
    jitter: Duration,
    failure_rate: f64,
}

impl SimBackend {
    pub fn new(config: &SimulatorConfig) -> Result<Self, BenchError> {
        let base_latency = config.parse_base_latency().map_err(|e| BenchError::Setup(format!("{e:#}")))?;
        let jitter = config.parse_jitter().map_err(|e| BenchError::Setup(format!("{e:#}")))?;
        if !(0.0..=1.0).contains(&config.failure_rate) {
            return Err(BenchError::Setup(format!(
                "failure rate must be within [0, 1], got {}",
                config.failure_rate
            )));
        }
        Ok(Self {
            state: Mutex::new(LedgerState::new()),
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            base_latency,
            jitter,
            failure_rate: config.failure_rate,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current ledger timestamp in seconds.
    pub fn now(&self) -> u64 {
        self.lock_state().now
    }

    async fn network_delay(&self) {
        let jitter_us = self.jitter.as_micros() as u64;
        let extra = if jitter_us == 0 {
            0
        } else {
            self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen_range(0..=jitter_us)
        };
        let delay = self.base_latency + Duration::from_micros(extra);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn injected_failure(&self, action: &str) -> Result<(), SimError> {
        if self.failure_rate <= 0.0 {
            return Ok(());
        }
        let fail = self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen_bool(self.failure_rate);
        if fail {
            debug!(action, "Injecting revert");
            return Err(SimError::Reverted(format!("{action} rejected by backend")));
        }
        Ok(())
    }

    pub async fn assign_role(&self, caller: &PrincipalId, who: &PrincipalId, role: Role) -> Result<Receipt, SimError> {
        self.network_delay().await;
        self.injected_failure("assignRole")?;
        let mut state = self.lock_state();
        state.apply_role(caller, who, role)?;
        Ok(state.receipt(GAS_ASSIGN_ROLE))
    }

    pub async fn has_role(&self, who: &PrincipalId, role: Role) -> Result<bool, SimError> {
        self.network_delay().await;
        Ok(self.lock_state().has_role(who, role))
    }

    /// Lets `grantee` read `record` until `ttl` has passed on the ledger clock.
    pub async fn grant_access(
        &self,
        owner: &PrincipalId,
        grantee: &PrincipalId,
        record: &str,
        ttl: Duration,
    ) -> Result<Receipt, SimError> {
        self.network_delay().await;
        self.injected_failure("grantAccess")?;
        let mut state = self.lock_state();
        state.require(owner, &[Role::Patient, Role::Admin], "grant access")?;
        let expiry = state.now + ttl.as_secs();
        state.grants.insert((grantee.clone(), record.to_string()), expiry);
        Ok(state.receipt(GAS_GRANT_ACCESS))
    }

    pub async fn check_access(&self, who: &PrincipalId, record: &str) -> Result<bool, SimError> {
        self.network_delay().await;
        let state = self.lock_state();
        let valid = state
            .grants
            .get(&(who.clone(), record.to_string()))
            .is_some_and(|expiry| state.now < *expiry);
        Ok(valid)
    }

    pub async fn store_record(&self, caller: &PrincipalId, record: &str, data: &[u8]) -> Result<Receipt, SimError> {
        self.network_delay().await;
        self.injected_failure("storeRecord")?;
        let mut state = self.lock_state();
        state.require(caller, &[Role::Provider, Role::Admin], "store records")?;
        state.records.insert(record.to_string(), data.len());
        Ok(state.receipt(storage_gas(data.len())))
    }

    /// Size of `record` in bytes, if `caller` may read it.
    pub async fn read_record(&self, caller: &PrincipalId, record: &str) -> Result<usize, SimError> {
        self.network_delay().await;
        let state = self.lock_state();
        let granted = state
            .grants
            .get(&(caller.clone(), record.to_string()))
            .is_some_and(|expiry| state.now < *expiry);
        if !granted {
            state.require(caller, &[Role::Provider, Role::Admin, Role::Auditor], "read records")?;
        }
        state.records.get(record).copied().ok_or_else(|| SimError::NotFound(record.to_string()))
    }
}

#[async_trait]
impl Backend for SimBackend {
    async fn advance_time(&self, by: Duration) -> anyhow::Result<()> {
        let mut state = self.lock_state();
        state.now += by.as_secs();
        debug!(now = state.now, "Advanced ledger clock");
        Ok(())
    }
}

/// A freshly deployed backend with its enrolled principals.
#[derive(Debug)]
pub struct Deployment {
    pub backend: SimBackend,
    pub principals: Principals,
}

impl Deployment {
    pub fn deploy(config: &SimulatorConfig) -> Result<Self, BenchError> {
        let backend = SimBackend::new(config)?;
        let principals = Principals::enroll(&backend)?;
        Ok(Self { backend, principals })
    }
}

#[async_trait]
impl Backend for Deployment {
    async fn advance_time(&self, by: Duration) -> anyhow::Result<()> {
        self.backend.advance_time(by).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> SimulatorConfig {
        SimulatorConfig { base_latency: "0ms".into(), jitter: "0ms".into(), ..Default::default() }
    }

    #[test]
    fn test_storage_gas_grows_with_size() {
        assert_eq!(storage_gas(0), 21_000);
        assert_eq!(storage_gas(1), 41_000);
        assert_eq!(storage_gas(32), 41_000);
        assert_eq!(storage_gas(33), 61_000);
    }

    #[test]
    fn test_deploy_enrolls_every_role() {
        let deployment = Deployment::deploy(&quiet()).unwrap();
        let state = deployment.backend.lock_state();
        for (role, id) in deployment.principals.iter() {
            assert!(state.has_role(id, *role), "{id} should hold {role}");
        }
        assert_eq!(deployment.principals.iter().count(), Role::ALL.len());
    }

    #[test]
    fn test_deploy_rejects_bad_config() {
        let config = SimulatorConfig { failure_rate: 2.0, ..quiet() };
        assert!(Deployment::deploy(&config).unwrap_err().is_setup());
        let config = SimulatorConfig { base_latency: "later".into(), ..quiet() };
        assert!(Deployment::deploy(&config).unwrap_err().is_setup());
    }

    #[tokio::test]
    async fn test_only_admin_assigns_roles() {
        let Deployment { backend, principals } = Deployment::deploy(&quiet()).unwrap();
        let admin = principals.get(Role::Admin).unwrap();
        let patient = principals.get(Role::Patient).unwrap();

        let receipt = backend.assign_role(admin, patient, Role::Auditor).await.unwrap();
        assert_eq!(receipt.gas_used, GAS_ASSIGN_ROLE);
        assert!(backend.has_role(patient, Role::Auditor).await.unwrap());

        let err = backend.assign_role(patient, patient, Role::Admin).await.unwrap_err();
        assert!(matches!(err, SimError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_grants_expire_with_ledger_time() {
        let Deployment { backend, principals } = Deployment::deploy(&quiet()).unwrap();
        let patient = principals.get(Role::Patient).unwrap();
        let provider = principals.get(Role::Provider).unwrap();

        backend.grant_access(patient, provider, "rec-1", Duration::from_secs(3600)).await.unwrap();
        assert!(backend.check_access(provider, "rec-1").await.unwrap());

        backend.advance_time(Duration::from_secs(3599)).await.unwrap();
        assert!(backend.check_access(provider, "rec-1").await.unwrap());
        backend.advance_time(Duration::from_secs(1)).await.unwrap();
        assert!(!backend.check_access(provider, "rec-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_and_read_record() {
        let Deployment { backend, principals } = Deployment::deploy(&quiet()).unwrap();
        let provider = principals.get(Role::Provider).unwrap();
        let patient = principals.get(Role::Patient).unwrap();

        let receipt = backend.store_record(provider, "rec-2", &[7u8; 1024]).await.unwrap();
        assert_eq!(receipt.resource_cost(), Some(storage_gas(1024) as f64));
        assert_eq!(backend.read_record(provider, "rec-2").await.unwrap(), 1024);

        let err = backend.read_record(patient, "rec-2").await.unwrap_err();
        assert!(matches!(err, SimError::Unauthorized { .. }));
        let err = backend.read_record(provider, "missing").await.unwrap_err();
        assert_eq!(err, SimError::NotFound("missing".into()));
    }

    #[tokio::test]
    async fn test_seeded_failures_are_deterministic() {
        let config = SimulatorConfig { failure_rate: 0.5, seed: 11, ..quiet() };
        let mut runs = Vec::new();
        for _ in 0..2 {
            let Deployment { backend, principals } = Deployment::deploy(&config).unwrap();
            let provider = principals.get(Role::Provider).unwrap();
            let mut pattern = Vec::new();
            for i in 0..32 {
                pattern.push(backend.store_record(provider, &format!("r{i}"), b"x").await.is_ok());
            }
            runs.push(pattern);
        }
        assert_eq!(runs[0], runs[1]);
        assert!(runs[0].contains(&true) && runs[0].contains(&false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_take_simulated_latency() {
        let config = SimulatorConfig { base_latency: "20ms".into(), jitter: "5ms".into(), ..quiet() };
        let Deployment { backend, principals } = Deployment::deploy(&config).unwrap();
        let admin = principals.get(Role::Admin).unwrap();

        let start = tokio::time::Instant::now();
        backend.has_role(admin, Role::Admin).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed <= Duration::from_millis(26));
    }
}
