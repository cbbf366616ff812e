//! Common test utilities
//!
//! In-memory stand-ins for the cluster, the secret store, the clock and the
//! event recorder, so the reconciler can be driven step by step without a
//! Kubernetes API server or Vault.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::ByteString;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use secrets_broker::controller::reconciler::{
    reconcile, Clock, ClusterApi, ClusterError, EventSink, ObjectKey, Reconciler,
    ReconcilerError, ReconcilerSettings,
};
use secrets_broker::crd::{SecretKind, VaultSecret, VaultSecretSpec, VaultSecretStatus};
use secrets_broker::provider::{FetchedFields, ProviderError, SecretProvider};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NAMESPACE: &str = "payments";
pub const NAME: &str = "db";
pub const SOURCE_UID: &str = "3f1c2a9e-0000-4000-8000-000000000001";
pub const STORE: &str = "https://vault.internal:8200";
pub const PATH: &str = "secret/data/payments/db";

#[derive(Default)]
struct ClusterState {
    sources: HashMap<String, VaultSecret>,
    secrets: HashMap<String, Secret>,
    next_version: u64,
    secret_writes: usize,
    status_writes: usize,
    pending_status_conflicts: usize,
    pending_secret_conflicts: usize,
    create_race: Option<Secret>,
}

impl ClusterState {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

fn key_of<K: ResourceExt>(obj: &K) -> String {
    ObjectKey::of(obj).to_string()
}

/// API server holding VaultSecrets and Secrets in memory
///
/// Every write bumps a global resourceVersion and guarded writes are
/// rejected with `Conflict` when the caller's version is stale, as the API
/// server does.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_source(&self, mut source: VaultSecret) {
        let mut state = self.state.lock().unwrap();
        source.metadata.resource_version = Some(state.bump());
        state.sources.insert(key_of(&source), source);
    }

    pub fn source(&self) -> VaultSecret {
        self.state.lock().unwrap().sources[&format!("{NAMESPACE}/{NAME}")].clone()
    }

    pub fn status(&self) -> VaultSecretStatus {
        self.source().status.unwrap_or_default()
    }

    pub fn phase(&self) -> Option<String> {
        self.status().phase
    }

    /// Edit the spec the way `kubectl apply` would: new generation and version
    pub fn update_spec(&self, edit: impl FnOnce(&mut VaultSecretSpec)) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let source = state
            .sources
            .get_mut(&format!("{NAMESPACE}/{NAME}"))
            .unwrap();
        edit(&mut source.spec);
        source.metadata.generation = Some(source.metadata.generation.unwrap_or(1) + 1);
        source.metadata.resource_version = Some(version);
    }

    /// Overwrite `status.phase` directly, as a user with status access could
    pub fn set_raw_phase(&self, phase: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let source = state
            .sources
            .get_mut(&format!("{NAMESPACE}/{NAME}"))
            .unwrap();
        source
            .status
            .get_or_insert_with(VaultSecretStatus::default)
            .phase = Some(phase.to_string());
        source.metadata.resource_version = Some(version);
    }

    pub fn secret(&self) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&format!("{NAMESPACE}/{NAME}"))
            .cloned()
    }

    /// Store a Secret as if written by someone other than the controller
    pub fn put_secret(&self, mut secret: Secret) {
        let mut state = self.state.lock().unwrap();
        secret.metadata.resource_version = Some(state.bump());
        state.secrets.insert(key_of(&secret), secret);
    }

    pub fn remove_secret(&self) {
        self.state
            .lock()
            .unwrap()
            .secrets
            .remove(&format!("{NAMESPACE}/{NAME}"));
    }

    /// Secret creates and replaces performed through `ClusterApi`
    pub fn secret_writes(&self) -> usize {
        self.state.lock().unwrap().secret_writes
    }

    /// Status patches accepted through `ClusterApi`
    pub fn status_writes(&self) -> usize {
        self.state.lock().unwrap().status_writes
    }

    pub fn writes(&self) -> usize {
        self.secret_writes() + self.status_writes()
    }

    /// Make the next status patch lose a race against another writer
    pub fn conflict_next_status_write(&self) {
        self.state.lock().unwrap().pending_status_conflicts += 1;
    }

    /// Make the next Secret replace lose a race against another writer
    pub fn conflict_next_secret_replace(&self) {
        self.state.lock().unwrap().pending_secret_conflicts += 1;
    }

    /// Have `racer` appear right before the next Secret create lands
    pub fn race_next_create(&self, racer: Secret) {
        self.state.lock().unwrap().create_race = Some(racer);
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_source(&self, key: &ObjectKey) -> Result<Option<VaultSecret>, ClusterError> {
        Ok(self.state.lock().unwrap().sources.get(&key.to_string()).cloned())
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<Secret>, ClusterError> {
        Ok(self.state.lock().unwrap().secrets.get(&key.to_string()).cloned())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let key = key_of(secret);

        if let Some(mut racer) = state.create_race.take() {
            racer.metadata.resource_version = Some(state.bump());
            state.secrets.insert(key.clone(), racer);
        }
        if state.secrets.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(key));
        }

        let mut created = secret.clone();
        created.metadata.resource_version = Some(state.bump());
        state.secrets.insert(key, created.clone());
        state.secret_writes += 1;
        Ok(created)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let key = key_of(secret);

        if state.pending_secret_conflicts > 0 {
            state.pending_secret_conflicts -= 1;
            let version = state.bump();
            if let Some(current) = state.secrets.get_mut(&key) {
                current.metadata.resource_version = Some(version);
            }
            return Err(ClusterError::Conflict(key));
        }
        let Some(current) = state.secrets.get(&key) else {
            return Err(ClusterError::NotFound(key));
        };
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(ClusterError::Conflict(key));
        }

        let mut replaced = secret.clone();
        replaced.metadata.resource_version = Some(state.bump());
        state.secrets.insert(key, replaced.clone());
        state.secret_writes += 1;
        Ok(replaced)
    }

    async fn patch_status(
        &self,
        source: &VaultSecret,
        status: &VaultSecretStatus,
    ) -> Result<VaultSecret, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let key = key_of(source);

        if state.pending_status_conflicts > 0 {
            // Another writer got in first
            state.pending_status_conflicts -= 1;
            let version = state.bump();
            if let Some(current) = state.sources.get_mut(&key) {
                current.metadata.resource_version = Some(version);
            }
            return Err(ClusterError::Conflict(key));
        }
        let version = state.bump();
        let Some(current) = state.sources.get_mut(&key) else {
            return Err(ClusterError::NotFound(key));
        };
        if current.metadata.resource_version != source.metadata.resource_version {
            return Err(ClusterError::Conflict(key));
        }

        current.status = Some(status.clone());
        current.metadata.resource_version = Some(version);
        let written = current.clone();
        state.status_writes += 1;
        Ok(written)
    }
}

/// Secret store returning a configurable answer
pub struct FakeProvider {
    response: Mutex<Result<FetchedFields, ProviderError>>,
    fetches: Mutex<Vec<(String, String)>>,
    stall: Mutex<Option<Duration>>,
}

impl FakeProvider {
    pub fn with_fields(fields: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(fields_of(fields))),
            fetches: Mutex::new(Vec::new()),
            stall: Mutex::new(None),
        })
    }

    pub fn set_fields(&self, fields: &[(&str, &str)]) {
        *self.response.lock().unwrap() = Ok(fields_of(fields));
    }

    pub fn fail_with(&self, error: ProviderError) {
        *self.response.lock().unwrap() = Err(error);
    }

    /// Make every fetch hang for `by` before answering
    pub fn stall_for(&self, by: Duration) {
        *self.stall.lock().unwrap() = Some(by);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn last_fetch(&self) -> Option<(String, String)> {
        self.fetches.lock().unwrap().last().cloned()
    }
}

fn fields_of(fields: &[(&str, &str)]) -> FetchedFields {
    fields
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.as_bytes().to_vec()))
        .collect()
}

#[async_trait]
impl SecretProvider for FakeProvider {
    async fn fetch(
        &self,
        store_location: &str,
        source_path: &str,
    ) -> Result<FetchedFields, ProviderError> {
        self.fetches
            .lock()
            .unwrap()
            .push((store_location.to_string(), source_path.to_string()));
        let stall = *self.stall.lock().unwrap();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        self.response.lock().unwrap().clone()
    }
}

/// Clock that only moves when told to
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += ChronoDuration::from_std(by).unwrap();
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
}

/// Event sink that keeps everything it is given
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}

/// Everything wired together around one VaultSecret
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub provider: Arc<FakeProvider>,
    pub clock: Arc<FixedClock>,
    pub events: Arc<RecordingEvents>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new(spec: VaultSecretSpec, fields: &[(&str, &str)]) -> Self {
        Self::with_settings(spec, fields, ReconcilerSettings::default())
    }

    pub fn with_settings(
        spec: VaultSecretSpec,
        fields: &[(&str, &str)],
        settings: ReconcilerSettings,
    ) -> Self {
        let cluster = FakeCluster::new();
        cluster.insert_source(vault_secret(spec));
        let provider = FakeProvider::with_fields(fields);
        let clock = FixedClock::new();
        let events = Arc::new(RecordingEvents::default());
        let reconciler = Arc::new(Reconciler::new(
            cluster.clone(),
            provider.clone(),
            clock.clone(),
            events.clone(),
            settings,
        ));
        Self {
            cluster,
            provider,
            clock,
            events,
            reconciler,
        }
    }

    /// Run one reconcile invocation, as the dispatcher would
    pub async fn reconcile(&self) -> Result<Action, ReconcilerError> {
        reconcile(Arc::new(self.cluster.source()), self.reconciler.clone()).await
    }

    /// Reconcile until the phase stops changing or `max` invocations ran
    pub async fn settle(&self, max: usize) -> Option<String> {
        for _ in 0..max {
            let before = self.cluster.phase();
            let _ = self.reconcile().await;
            if self.cluster.phase() == before {
                break;
            }
        }
        self.cluster.phase()
    }
}

pub fn spec(mappings: &[(&str, &str)]) -> VaultSecretSpec {
    VaultSecretSpec {
        store_location: STORE.to_string(),
        source_path: PATH.to_string(),
        secret_kind: SecretKind::Opaque,
        field_mappings: mappings
            .iter()
            .map(|(dst, src)| ((*dst).to_string(), (*src).to_string()))
            .collect(),
    }
}

pub fn vault_secret(spec: VaultSecretSpec) -> VaultSecret {
    let mut source = VaultSecret::new(NAME, spec);
    source.metadata.namespace = Some(NAMESPACE.to_string());
    source.metadata.uid = Some(SOURCE_UID.to_string());
    source.metadata.generation = Some(1);
    source
}

pub fn data(entries: &[(&str, &str)]) -> BTreeMap<String, ByteString> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
        .collect()
}

/// Secret with the managed name, written by someone else
pub fn foreign_secret(type_: &str, entries: &[(&str, &str)]) -> Secret {
    let mut secret = Secret {
        type_: Some(type_.to_string()),
        data: Some(data(entries)),
        ..Default::default()
    };
    secret.metadata.name = Some(NAME.to_string());
    secret.metadata.namespace = Some(NAMESPACE.to_string());
    secret
}

static RUSTLS_INIT: std::sync::Once = std::sync::Once::new();

/// Install the ring crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        // Another test may already have installed one
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
