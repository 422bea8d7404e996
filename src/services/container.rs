//! Service container.
//!
//! Builds the long-lived client handles once (vector backend, identity store,
//! command channel) and hands out workflow services that share them. Nothing
//! here is global; callers own the container and drop it to tear down.

use super::{
    AttendanceService, DeviceService, EnrollmentService, ReconcileService, SimilarityMatcher,
    TemplateStore,
};
use crate::channel::{CommandChannel, DisabledCommandChannel, MemoryCommandChannel};
use crate::config::{FingerlinkConfig, VectorBackendKind};
use crate::models::{Scheme, SchemeId};
use crate::storage::{IdentityBackend, MemoryVectorBackend, SqliteIdentityStore, VectorBackend};
use crate::Result;
use std::sync::Arc;

/// Shared handles plus the configuration they were built from.
#[derive(Clone)]
pub struct ServiceContainer {
    config: FingerlinkConfig,
    store: TemplateStore,
    identity: Arc<dyn IdentityBackend>,
    channel: Arc<dyn CommandChannel>,
}

impl ServiceContainer {
    /// Assembles a container from pre-built handles.
    #[must_use]
    pub fn new(
        config: FingerlinkConfig,
        vectors: Arc<dyn VectorBackend>,
        identity: Arc<dyn IdentityBackend>,
        channel: Arc<dyn CommandChannel>,
    ) -> Self {
        Self {
            config,
            store: TemplateStore::new(vectors),
            identity,
            channel,
        }
    }

    /// Connects every backend named by `config` and creates the scheme
    /// indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend cannot be created or reached, or if the
    /// configuration names a backend whose cargo feature is disabled.
    pub fn from_config(config: &FingerlinkConfig) -> Result<Self> {
        let vectors = create_vector_backend(config)?;
        let sqlite_path = config.sqlite_path()?;
        let identity = SqliteIdentityStore::new(&sqlite_path)?;
        tracing::debug!(path = %sqlite_path.display(), "Opened SQLite identity store");
        let channel = create_command_channel(config)?;

        let container = Self::new(config.clone(), vectors, Arc::new(identity), channel);
        container.store.bootstrap()?;
        Ok(container)
    }

    /// Container with in-memory vectors, an in-memory identity database and
    /// a recording command channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be opened.
    pub fn in_memory() -> Result<Self> {
        let config = FingerlinkConfig::default().with_vector_backend(VectorBackendKind::Memory);
        Ok(Self::new(
            config,
            Arc::new(MemoryVectorBackend::new()),
            Arc::new(SqliteIdentityStore::in_memory()?),
            Arc::new(MemoryCommandChannel::new()),
        ))
    }

    /// Configuration the container was built from.
    #[must_use]
    pub const fn config(&self) -> &FingerlinkConfig {
        &self.config
    }

    /// Scheme used when the caller does not pick one.
    #[must_use]
    pub fn active_scheme(&self) -> &'static Scheme {
        self.config.active_scheme.scheme()
    }

    /// Scheme selected by an API version segment (`v1`, `normalized-512`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownScheme`](crate::Error::UnknownScheme) for an
    /// unregistered version.
    pub fn scheme_for(&self, version: &str) -> Result<&'static Scheme> {
        SchemeId::parse(version).map(SchemeId::scheme)
    }

    /// Template store adapter.
    #[must_use]
    pub const fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Identity store handle.
    #[must_use]
    pub fn identity(&self) -> Arc<dyn IdentityBackend> {
        Arc::clone(&self.identity)
    }

    /// Similarity matcher.
    #[must_use]
    pub fn matcher(&self) -> SimilarityMatcher {
        SimilarityMatcher::new(self.store.clone())
    }

    /// Enrollment workflow.
    #[must_use]
    pub fn enrollment(&self) -> EnrollmentService {
        EnrollmentService::new(self.store.clone(), self.identity())
    }

    /// Attendance workflow.
    #[must_use]
    pub fn attendance(&self) -> AttendanceService {
        AttendanceService::new(self.matcher(), self.identity())
    }

    /// Device command service.
    #[must_use]
    pub fn devices(&self) -> DeviceService {
        DeviceService::new(
            Arc::clone(&self.channel),
            self.config.mqtt.topic_prefix.clone(),
        )
    }

    /// Reconciliation service.
    #[must_use]
    pub fn reconcile(&self) -> ReconcileService {
        ReconcileService::new(self.store.clone(), self.identity())
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("active_scheme", &self.config.active_scheme)
            .field("vectors", &self.store.backend_name())
            .field("channel", &self.channel.name())
            .finish_non_exhaustive()
    }
}

fn create_vector_backend(config: &FingerlinkConfig) -> Result<Arc<dyn VectorBackend>> {
    match config.storage.vector_backend {
        VectorBackendKind::Memory => {
            tracing::warn!("Using in-memory vector backend; enrolled vectors are lost on exit");
            Ok(Arc::new(MemoryVectorBackend::new()))
        },
        #[cfg(feature = "redis")]
        VectorBackendKind::Redis => {
            let backend = crate::storage::RedisVectorBackend::new(
                config.storage.redis_url.clone(),
                config.storage.redis_timeout,
            )?;
            tracing::debug!("Created Redis vector backend");
            Ok(Arc::new(backend))
        },
        #[cfg(not(feature = "redis"))]
        VectorBackendKind::Redis => Err(crate::Error::FeatureNotEnabled("redis".to_string())),
    }
}

fn create_command_channel(config: &FingerlinkConfig) -> Result<Arc<dyn CommandChannel>> {
    let Some(broker_url) = config.mqtt.broker_url.as_deref() else {
        tracing::debug!("No MQTT broker configured; device commands are disabled");
        return Ok(Arc::new(DisabledCommandChannel));
    };

    #[cfg(feature = "mqtt")]
    {
        let channel = crate::channel::MqttCommandChannel::connect(
            broker_url,
            config.mqtt.username.as_deref(),
            config.mqtt.password.as_ref(),
        )?;
        tracing::debug!(broker = channel.broker(), "Created MQTT command channel");
        Ok(Arc::new(channel))
    }

    #[cfg(not(feature = "mqtt"))]
    {
        let _ = broker_url;
        Err(crate::Error::FeatureNotEnabled("mqtt".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceId, UserId};

    #[test]
    fn test_in_memory_container_wires_shared_handles() {
        let services = ServiceContainer::in_memory().unwrap();
        let scheme = services.active_scheme();
        assert_eq!(scheme.id, SchemeId::Normalized16);

        services
            .enrollment()
            .enroll(&UserId::new("3"), &[40u8; 16], scheme)
            .unwrap();
        assert_eq!(services.store().count(scheme.id).unwrap(), 1);
        assert_eq!(services.reconcile().reconcile(scheme, false).unwrap().scanned, 1);
    }

    #[test]
    fn test_from_config_with_memory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = FingerlinkConfig::default()
            .with_vector_backend(VectorBackendKind::Memory)
            .with_sqlite_path(dir.path().join("identity.db"));

        let services = ServiceContainer::from_config(&config).unwrap();
        assert_eq!(services.store().backend_name(), "memory");
        assert!(dir.path().join("identity.db").exists());
        let published = services
            .devices()
            .request_enroll_mode(&UserId::new("1"), &DeviceId::new("d"));
        assert!(published.is_err());
    }

    #[test]
    fn test_scheme_for_version() {
        let services = ServiceContainer::in_memory().unwrap();
        assert_eq!(services.scheme_for("v2").unwrap().dimension, 512);
        assert!(services.scheme_for("v7").is_err());
    }
}
