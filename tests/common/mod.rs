//! Common test utilities
//!
//! In-memory IAM and Secrets Manager backends that enforce the AWS rules the
//! provider relies on (version cap, delete conflicts, not-found errors), a
//! stub provider for registry tests, and resource fixtures.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use secret_access_controller::crd::{
    AccessSubject, ExternalSecret, ExternalSecretAccess, ExternalSecretAccessSpec,
    ExternalSecretProvider, ExternalSecretProviderSpec, ExternalSecretSpec, RandomSpec,
};
use secret_access_controller::provider::aws::policy::OidcProvider;
use secret_access_controller::provider::aws::{
    AccessSettings, AwsProvider, IamApi, PolicyVersion, SecretDescription, SecretsApi,
    MAX_POLICY_VERSIONS,
};
use secret_access_controller::provider::registry::{ProviderCatalog, RegistryError};
use secret_access_controller::provider::{BackendHandles, Provider, ProviderError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ACCOUNT: &str = "123456789012";
pub const NAMESPACE: &str = "payments";
pub const OIDC_ARN: &str =
    "arn:aws:iam::123456789012:oidc-provider/oidc.eks.eu-west-1.amazonaws.com/id/ABC123";
const ARN_SUFFIX: &str = "Ab12Cd";

/// How long a stalled call hangs; far beyond any test deadline
const STALL: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Secrets Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSecret {
    pub name: String,
    pub arn: String,
    pub value: String,
    pub kms_key: Option<String>,
    pub last_changed: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InMemorySecrets {
    secrets: Mutex<BTreeMap<String, StoredSecret>>,
    calls: Mutex<Vec<String>>,
    stalled: Mutex<BTreeSet<String>>,
}

impl InMemorySecrets {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn arn_for(name: &str) -> String {
        format!("arn:aws:secretsmanager:eu-west-1:{ACCOUNT}:secret:{name}-{ARN_SUFFIX}")
    }

    pub fn get(&self, name: &str) -> Option<StoredSecret> {
        self.secrets.lock().unwrap().get(name).cloned()
    }

    /// Seed a secret that exists before the controller touches it
    pub fn seed(&self, name: &str, value: &str) {
        self.secrets.lock().unwrap().insert(
            name.to_string(),
            StoredSecret {
                name: name.to_string(),
                arn: Self::arn_for(name),
                value: value.to_string(),
                kms_key: None,
                last_changed: Utc::now(),
            },
        );
    }

    /// Simulate an edit made outside the controller
    pub fn edit_out_of_band(&self, name: &str, value: &str, at: DateTime<Utc>) {
        let mut secrets = self.secrets.lock().unwrap();
        let stored = secrets.get_mut(name).expect("secret exists");
        stored.value = value.to_string();
        stored.last_changed = at;
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == operation)
            .count()
    }

    pub fn total_writes(&self) -> usize {
        self.calls("CreateSecret") + self.calls("PutSecretValue")
    }

    /// Make later calls of `operation` hang until [`Self::resume`]
    pub fn stall(&self, operation: &str) {
        self.stalled.lock().unwrap().insert(operation.to_string());
    }

    pub fn resume(&self, operation: &str) {
        self.stalled.lock().unwrap().remove(operation);
    }

    async fn record(&self, operation: &str) {
        self.calls.lock().unwrap().push(operation.to_string());
        let stalled = self.stalled.lock().unwrap().contains(operation);
        if stalled {
            tokio::time::sleep(STALL).await;
        }
    }

    fn resolve(secrets: &BTreeMap<String, StoredSecret>, id: &str) -> Option<String> {
        if secrets.contains_key(id) {
            return Some(id.to_string());
        }
        secrets
            .values()
            .find(|s| s.arn == id)
            .map(|s| s.name.clone())
    }
}

#[async_trait]
impl SecretsApi for InMemorySecrets {
    async fn create_secret(
        &self,
        name: &str,
        value: &str,
        kms_key_id: Option<&str>,
    ) -> Result<String, ProviderError> {
        self.record("CreateSecret").await;
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(name) {
            return Err(ProviderError::AlreadyExists(name.to_string()));
        }
        let arn = Self::arn_for(name);
        secrets.insert(
            name.to_string(),
            StoredSecret {
                name: name.to_string(),
                arn: arn.clone(),
                value: value.to_string(),
                kms_key: kms_key_id.map(ToString::to_string),
                last_changed: Utc::now(),
            },
        );
        Ok(arn)
    }

    async fn put_secret_value(&self, secret_id: &str, value: &str) -> Result<String, ProviderError> {
        self.record("PutSecretValue").await;
        let mut secrets = self.secrets.lock().unwrap();
        let name = Self::resolve(&secrets, secret_id)
            .ok_or_else(|| ProviderError::NotFound(secret_id.to_string()))?;
        let stored = secrets.get_mut(&name).expect("resolved");
        stored.value = value.to_string();
        stored.last_changed = Utc::now();
        Ok(stored.arn.clone())
    }

    async fn describe_secret(&self, secret_id: &str) -> Result<SecretDescription, ProviderError> {
        self.record("DescribeSecret").await;
        let secrets = self.secrets.lock().unwrap();
        let name = Self::resolve(&secrets, secret_id)
            .ok_or_else(|| ProviderError::NotFound(secret_id.to_string()))?;
        let stored = &secrets[&name];
        Ok(SecretDescription {
            arn: stored.arn.clone(),
            last_changed: Some(stored.last_changed),
        })
    }

    async fn delete_secret(
        &self,
        secret_id: &str,
        recovery_window_days: Option<i64>,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        self.record("DeleteSecret").await;
        let mut secrets = self.secrets.lock().unwrap();
        let name = Self::resolve(&secrets, secret_id)
            .ok_or_else(|| ProviderError::NotFound(secret_id.to_string()))?;
        secrets.remove(&name);
        Ok(recovery_window_days.map(|days| Utc::now() + TimeDelta::days(days)))
    }
}

// ---------------------------------------------------------------------------
// IAM
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredVersion {
    pub id: String,
    pub document: String,
    pub is_default: bool,
    pub create_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredPolicy {
    pub name: String,
    pub versions: Vec<StoredVersion>,
    next_version: u32,
}

impl StoredPolicy {
    pub fn default_document(&self) -> &str {
        self.versions
            .iter()
            .find(|v| v.is_default)
            .map(|v| v.document.as_str())
            .expect("a policy always has a default version")
    }

    pub fn non_default_versions(&self) -> usize {
        self.versions.iter().filter(|v| !v.is_default).count()
    }
}

#[derive(Debug, Clone)]
pub struct StoredRole {
    pub arn: String,
    pub trust: String,
    pub attached: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct IamState {
    policies: BTreeMap<String, StoredPolicy>,
    roles: BTreeMap<String, StoredRole>,
    calls: Vec<String>,
    failures: HashMap<String, usize>,
    stalled: BTreeSet<String>,
    clock: i64,
}

impl IamState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        DateTime::from_timestamp(1_700_000_000 + self.clock, 0).expect("valid timestamp")
    }
}

#[derive(Debug, Default)]
pub struct InMemoryIam {
    state: Mutex<IamState>,
}

impl InMemoryIam {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `times` calls of `operation` with a backend error
    pub fn fail_next(&self, operation: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(operation.to_string(), times);
    }

    /// Make later calls of `operation` hang until [`Self::resume`]
    pub fn stall(&self, operation: &str) {
        self.state.lock().unwrap().stalled.insert(operation.to_string());
    }

    pub fn resume(&self, operation: &str) {
        self.state.lock().unwrap().stalled.remove(operation);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| *c == operation)
            .count()
    }

    pub fn policies(&self) -> Vec<StoredPolicy> {
        self.state.lock().unwrap().policies.values().cloned().collect()
    }

    pub fn policy(&self, arn: &str) -> Option<StoredPolicy> {
        self.state.lock().unwrap().policies.get(arn).cloned()
    }

    pub fn role(&self, name: &str) -> Option<StoredRole> {
        self.state.lock().unwrap().roles.get(name).cloned()
    }

    pub fn role_count(&self) -> usize {
        self.state.lock().unwrap().roles.len()
    }

    /// Add versions behind the controller's back
    pub fn add_foreign_versions(&self, arn: &str, count: usize) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            let created = state.tick();
            let policy = state.policies.get_mut(arn).expect("policy exists");
            policy.next_version += 1;
            policy.versions.push(StoredVersion {
                id: format!("v{}", policy.next_version),
                document: "{}".to_string(),
                is_default: false,
                create_date: created,
            });
        }
    }

    async fn wait_if_stalled(&self, operation: &str) {
        let stalled = self.state.lock().unwrap().stalled.contains(operation);
        if stalled {
            tokio::time::sleep(STALL).await;
        }
    }

    fn enter(&self, operation: &str) -> Result<std::sync::MutexGuard<'_, IamState>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(operation.to_string());
        if let Some(remaining) = state.failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::backend(operation, "injected failure"));
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl IamApi for InMemoryIam {
    async fn create_policy(&self, name: &str, document: &str) -> Result<String, ProviderError> {
        self.wait_if_stalled("CreatePolicy").await;
        let mut state = self.enter("CreatePolicy")?;
        let arn = format!("arn:aws:iam::{ACCOUNT}:policy/{name}");
        if state.policies.contains_key(&arn) {
            return Err(ProviderError::AlreadyExists(arn));
        }
        let created = state.tick();
        state.policies.insert(
            arn.clone(),
            StoredPolicy {
                name: name.to_string(),
                versions: vec![StoredVersion {
                    id: "v1".to_string(),
                    document: document.to_string(),
                    is_default: true,
                    create_date: created,
                }],
                next_version: 1,
            },
        );
        Ok(arn)
    }

    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> Result<String, ProviderError> {
        self.wait_if_stalled("CreatePolicyVersion").await;
        let mut state = self.enter("CreatePolicyVersion")?;
        let created = state.tick();
        let policy = state
            .policies
            .get_mut(policy_arn)
            .ok_or_else(|| ProviderError::NotFound(policy_arn.to_string()))?;
        if policy.versions.len() >= MAX_POLICY_VERSIONS {
            return Err(ProviderError::backend(
                "CreatePolicyVersion",
                "LimitExceeded: cannot exceed quota for PolicyVersionsPerPolicy: 5",
            ));
        }
        policy.next_version += 1;
        let id = format!("v{}", policy.next_version);
        if set_as_default {
            for v in &mut policy.versions {
                v.is_default = false;
            }
        }
        policy.versions.push(StoredVersion {
            id: id.clone(),
            document: document.to_string(),
            is_default: set_as_default,
            create_date: created,
        });
        Ok(id)
    }

    async fn list_policy_versions(
        &self,
        policy_arn: &str,
    ) -> Result<Vec<PolicyVersion>, ProviderError> {
        self.wait_if_stalled("ListPolicyVersions").await;
        let state = self.enter("ListPolicyVersions")?;
        let policy = state
            .policies
            .get(policy_arn)
            .ok_or_else(|| ProviderError::NotFound(policy_arn.to_string()))?;
        Ok(policy
            .versions
            .iter()
            .map(|v| PolicyVersion {
                version_id: v.id.clone(),
                is_default: v.is_default,
                create_date: Some(v.create_date),
            })
            .collect())
    }

    async fn delete_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> Result<(), ProviderError> {
        self.wait_if_stalled("DeletePolicyVersion").await;
        let mut state = self.enter("DeletePolicyVersion")?;
        let policy = state
            .policies
            .get_mut(policy_arn)
            .ok_or_else(|| ProviderError::NotFound(policy_arn.to_string()))?;
        let index = policy
            .versions
            .iter()
            .position(|v| v.id == version_id)
            .ok_or_else(|| ProviderError::NotFound(format!("{policy_arn}:{version_id}")))?;
        if policy.versions[index].is_default {
            return Err(ProviderError::backend(
                "DeletePolicyVersion",
                "DeleteConflict: cannot delete the default version",
            ));
        }
        policy.versions.remove(index);
        Ok(())
    }

    async fn delete_policy(&self, policy_arn: &str) -> Result<(), ProviderError> {
        self.wait_if_stalled("DeletePolicy").await;
        let mut state = self.enter("DeletePolicy")?;
        let policy = state
            .policies
            .get(policy_arn)
            .ok_or_else(|| ProviderError::NotFound(policy_arn.to_string()))?;
        if policy.non_default_versions() > 0 {
            return Err(ProviderError::backend(
                "DeletePolicy",
                "DeleteConflict: delete non-default versions first",
            ));
        }
        if state.roles.values().any(|r| r.attached.contains(policy_arn)) {
            return Err(ProviderError::backend(
                "DeletePolicy",
                "DeleteConflict: policy is attached",
            ));
        }
        state.policies.remove(policy_arn);
        Ok(())
    }

    async fn create_role(&self, name: &str, trust_document: &str) -> Result<String, ProviderError> {
        self.wait_if_stalled("CreateRole").await;
        let mut state = self.enter("CreateRole")?;
        if state.roles.contains_key(name) {
            return Err(ProviderError::AlreadyExists(name.to_string()));
        }
        let arn = format!("arn:aws:iam::{ACCOUNT}:role/{name}");
        state.roles.insert(
            name.to_string(),
            StoredRole {
                arn: arn.clone(),
                trust: trust_document.to_string(),
                attached: BTreeSet::new(),
            },
        );
        Ok(arn)
    }

    async fn get_role_arn(&self, name: &str) -> Result<String, ProviderError> {
        self.wait_if_stalled("GetRole").await;
        let state = self.enter("GetRole")?;
        state
            .roles
            .get(name)
            .map(|r| r.arn.clone())
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn update_assume_role_policy(
        &self,
        role_name: &str,
        trust_document: &str,
    ) -> Result<(), ProviderError> {
        self.wait_if_stalled("UpdateAssumeRolePolicy").await;
        let mut state = self.enter("UpdateAssumeRolePolicy")?;
        let role = state
            .roles
            .get_mut(role_name)
            .ok_or_else(|| ProviderError::NotFound(role_name.to_string()))?;
        role.trust = trust_document.to_string();
        Ok(())
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), ProviderError> {
        self.wait_if_stalled("AttachRolePolicy").await;
        let mut state = self.enter("AttachRolePolicy")?;
        if !state.policies.contains_key(policy_arn) {
            return Err(ProviderError::NotFound(policy_arn.to_string()));
        }
        let role = state
            .roles
            .get_mut(role_name)
            .ok_or_else(|| ProviderError::NotFound(role_name.to_string()))?;
        role.attached.insert(policy_arn.to_string());
        Ok(())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), ProviderError> {
        self.wait_if_stalled("DetachRolePolicy").await;
        let mut state = self.enter("DetachRolePolicy")?;
        let role = state
            .roles
            .get_mut(role_name)
            .ok_or_else(|| ProviderError::NotFound(role_name.to_string()))?;
        if !role.attached.remove(policy_arn) {
            return Err(ProviderError::NotFound(policy_arn.to_string()));
        }
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> Result<(), ProviderError> {
        self.wait_if_stalled("DeleteRole").await;
        let mut state = self.enter("DeleteRole")?;
        let role = state
            .roles
            .get(role_name)
            .ok_or_else(|| ProviderError::NotFound(role_name.to_string()))?;
        if !role.attached.is_empty() {
            return Err(ProviderError::backend(
                "DeleteRole",
                "DeleteConflict: role has attached policies",
            ));
        }
        state.roles.remove(role_name);
        Ok(())
    }
}

/// AWS provider over the in-memory backends
pub fn aws_provider(iam: &Arc<InMemoryIam>, secrets: &Arc<InMemorySecrets>) -> AwsProvider {
    AwsProvider::with_clients(
        Arc::clone(iam) as Arc<dyn IamApi>,
        Arc::clone(secrets) as Arc<dyn SecretsApi>,
        AccessSettings {
            resource_prefix: "sac".to_string(),
            oidc: Some(OidcProvider::from_arn(OIDC_ARN).expect("valid OIDC ARN")),
        },
    )
}

// ---------------------------------------------------------------------------
// Registry doubles
// ---------------------------------------------------------------------------

/// Provider that only reports its name; registry tests never call the backend
#[derive(Debug)]
pub struct StubProvider {
    pub name: String,
}

#[async_trait]
impl Provider for StubProvider {
    fn kind(&self) -> &'static str {
        "stub"
    }

    async fn create_secret(
        &self,
        _secret: &ExternalSecret,
        _value: &str,
        handles: &mut BackendHandles,
    ) -> Result<(), ProviderError> {
        handles.insert("Provider".to_string(), self.name.clone());
        Ok(())
    }

    async fn update_secret(
        &self,
        _secret: &ExternalSecret,
        _value: &str,
        _handles: &mut BackendHandles,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn delete_secret(
        &self,
        _secret: &ExternalSecret,
        _handles: &BackendHandles,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        Ok(None)
    }

    async fn last_changed(
        &self,
        _secret: &ExternalSecret,
        _handles: &BackendHandles,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        Ok(None)
    }

    async fn create_access(
        &self,
        _secret: &ExternalSecret,
        _access: &ExternalSecretAccess,
        _handles: &mut BackendHandles,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn update_access(
        &self,
        _secret: &ExternalSecret,
        _access: &ExternalSecretAccess,
        _handles: &mut BackendHandles,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn delete_access(&self, _handles: &BackendHandles) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Catalog over a fixed list of declarations
///
/// Declarations whose `provider` tag is `broken` fail to instantiate.
#[derive(Debug, Default)]
pub struct FakeCatalog {
    pub declared: Mutex<Vec<ExternalSecretProvider>>,
    pub list_calls: AtomicUsize,
    pub instantiations: AtomicUsize,
    pub list_delay: Duration,
}

impl FakeCatalog {
    pub fn with(declared: Vec<ExternalSecretProvider>) -> Self {
        Self {
            declared: Mutex::new(declared),
            ..Self::default()
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderCatalog for FakeCatalog {
    async fn list_declared(&self) -> Result<Vec<ExternalSecretProvider>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        Ok(self.declared.lock().unwrap().clone())
    }

    async fn instantiate(
        &self,
        declared: &ExternalSecretProvider,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        if declared.spec.provider == "broken" {
            return Err(ProviderError::Config("missing region".to_string()));
        }
        Ok(Arc::new(StubProvider {
            name: declared.metadata.name.clone().unwrap_or_default(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn secret_spec() -> ExternalSecretSpec {
    ExternalSecretSpec {
        secret_string: None,
        external_name: None,
        overwrite: false,
        random: None,
        external: false,
        recovery_window: 0,
        provider: "aws-main".to_string(),
        provider_spec: BTreeMap::new(),
    }
}

fn with_meta(mut secret: ExternalSecret) -> ExternalSecret {
    secret.metadata.namespace = Some(NAMESPACE.to_string());
    secret.metadata.generation = Some(1);
    secret
}

pub fn literal_secret(name: &str, value: &str) -> ExternalSecret {
    let mut spec = secret_spec();
    spec.secret_string = Some(value.to_string());
    with_meta(ExternalSecret::new(name, spec))
}

pub fn random_secret(name: &str, regex: &str, size: u32, rotate: Option<&str>) -> ExternalSecret {
    let mut spec = secret_spec();
    spec.random = Some(RandomSpec {
        size,
        regex: regex.to_string(),
        rotate: rotate.map(ToString::to_string),
    });
    with_meta(ExternalSecret::new(name, spec))
}

pub fn external_secret(name: &str) -> ExternalSecret {
    let mut spec = secret_spec();
    spec.external = true;
    with_meta(ExternalSecret::new(name, spec))
}

pub fn access(name: &str, secret_name: &str, subjects: Vec<AccessSubject>) -> ExternalSecretAccess {
    let mut access = ExternalSecretAccess::new(
        name,
        ExternalSecretAccessSpec {
            subjects,
            secret_name: secret_name.to_string(),
        },
    );
    access.metadata.namespace = Some(NAMESPACE.to_string());
    access
}

pub fn declared_provider(name: &str, kind: &str) -> ExternalSecretProvider {
    ExternalSecretProvider::new(
        name,
        ExternalSecretProviderSpec {
            provider: kind.to_string(),
            config: BTreeMap::new(),
        },
    )
}
