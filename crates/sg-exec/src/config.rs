use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sg_driver::{ConnectionSpec, Credential, Driver};
use sg_types::SgError;

use crate::manager::ConnectionManager;
use crate::resilience::ResilienceSection;
use crate::shard_set::{ShardId, ShardInstance, ShardSet};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub user_name: String,
    pub password: String,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One connection target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub connection_string: String,
    /// Name of an entry in `credentials`.
    #[serde(default)]
    pub security_key: Option<String>,
    /// Name of an entry in `resilience.strategies`.
    #[serde(default)]
    pub resilience_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig<S> {
    pub shard_id: S,
    #[serde(default)]
    pub read: Option<EndpointConfig>,
    #[serde(default)]
    pub write: Option<EndpointConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSetConfig<S> {
    #[serde(default)]
    pub default_shard: Option<S>,
    pub shards: Vec<ShardConfig<S>>,
}

/// The data-access section of the application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataConfig<S> {
    #[serde(default)]
    pub resilience: ResilienceSection,
    #[serde(default)]
    pub credentials: HashMap<String, CredentialConfig>,
    #[serde(default)]
    pub databases: HashMap<String, EndpointConfig>,
    #[serde(default)]
    pub shard_sets: HashMap<String, ShardSetConfig<S>>,
}

impl<S> Default for DataConfig<S> {
    fn default() -> Self {
        DataConfig {
            resilience: ResilienceSection::default(),
            credentials: HashMap::new(),
            databases: HashMap::new(),
            shard_sets: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Connection managers and shard sets built from a [`DataConfig`].
#[derive(Debug)]
pub struct DataServices<S> {
    databases: HashMap<String, Arc<ConnectionManager>>,
    shard_sets: HashMap<String, ShardSet<S>>,
}

impl<S: ShardId> DataServices<S> {
    pub fn build(config: &DataConfig<S>, driver: Arc<dyn Driver>) -> Result<Self, SgError> {
        let mut databases = HashMap::new();
        for (name, endpoint) in &config.databases {
            let manager = endpoint_manager(config, &driver, name, endpoint)?;
            databases.insert(name.clone(), Arc::new(manager));
        }

        let mut shard_sets = HashMap::new();
        for (name, set) in &config.shard_sets {
            let mut shards = Vec::with_capacity(set.shards.len());
            for shard in &set.shards {
                let side = |endpoint: &Option<EndpointConfig>, label: &str| {
                    endpoint
                        .as_ref()
                        .map(|e| {
                            let manager_name = format!("{name}/{:?}/{label}", shard.shard_id);
                            endpoint_manager(config, &driver, &manager_name, e)
                                .map(|m| Arc::new(m.with_shard(&shard.shard_id)))
                        })
                        .transpose()
                };
                let read = side(&shard.read, "read")?;
                let write = side(&shard.write, "write")?;
                shards.push(ShardInstance::new(shard.shard_id.clone(), read, write)?);
            }
            let built = ShardSet::new(name.as_str(), shards, set.default_shard.clone())?;
            tracing::debug!(shard_set = %name, shards = built.len(), "shard set configured");
            shard_sets.insert(name.clone(), built);
        }

        Ok(DataServices { databases, shard_sets })
    }

    pub fn database(&self, name: &str) -> Result<&Arc<ConnectionManager>, SgError> {
        self.databases
            .get(name)
            .ok_or_else(|| SgError::Config(format!("no database named '{name}'")))
    }

    pub fn shard_set(&self, name: &str) -> Result<&ShardSet<S>, SgError> {
        self.shard_sets
            .get(name)
            .ok_or_else(|| SgError::Config(format!("no shard set named '{name}'")))
    }

    pub fn database_names(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    pub fn shard_set_names(&self) -> impl Iterator<Item = &str> {
        self.shard_sets.keys().map(String::as_str)
    }
}

fn endpoint_manager<S>(
    config: &DataConfig<S>,
    driver: &Arc<dyn Driver>,
    name: &str,
    endpoint: &EndpointConfig,
) -> Result<ConnectionManager, SgError> {
    if endpoint.connection_string.trim().is_empty() {
        return Err(SgError::Config(format!("'{name}' has an empty connection string")));
    }
    let mut spec = ConnectionSpec::new(endpoint.connection_string.clone());
    if let Some(key) = &endpoint.security_key {
        let credential = config
            .credentials
            .get(key)
            .ok_or_else(|| SgError::MissingCredential { key: key.clone() })?;
        spec = spec.with_credential(Credential {
            user_name: credential.user_name.clone(),
            password: credential.password.clone(),
        });
    }
    let resilience = config.resilience.resolve(endpoint.resilience_key.as_deref());
    Ok(ConnectionManager::new(name, driver.clone(), spec, resilience))
}

#[cfg(test)]
mod tests {
    use figment::providers::{Format, Toml};
    use figment::Figment;
    use sg_driver::{Execution, MemDriver, Query};
    use sg_types::{Parameters, Value};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::resilience::BackoffShape;

    const CONFIG: &str = r#"
        [resilience.default]
        retry_count = 3

        [resilience.strategies.patient]
        retry_count = 10
        retry_interval_ms = 100
        backoff = "squaring"

        [credentials.app]
        user_name = "app"
        password = "secret"

        [databases.audit]
        connection_string = "mem://audit"
        security_key = "app"

        [shard_sets.orders]
        default_shard = 1

        [[shard_sets.orders.shards]]
        shard_id = 1
        read = { connection_string = "mem://orders/1/read", resilience_key = "patient" }
        write = { connection_string = "mem://orders/1/write", security_key = "app" }

        [[shard_sets.orders.shards]]
        shard_id = 2
        write = { connection_string = "mem://orders/2/write", resilience_key = "missing" }
    "#;

    fn parse(text: &str) -> DataConfig<i16> {
        Figment::from(Toml::string(text)).extract().unwrap()
    }

    #[test]
    fn parses_sections_and_defaults() {
        let config = parse(CONFIG);
        assert_eq!(config.resilience.default.retry_count, 3);
        assert_eq!(config.resilience.default.breaker_failure_count, 20);
        assert_eq!(config.resilience.strategies["patient"].backoff, BackoffShape::Squaring);
        assert_eq!(config.shard_sets["orders"].shards.len(), 2);
        assert!(!format!("{:?}", config.credentials["app"]).contains("secret"));
    }

    #[tokio::test]
    async fn builds_managers_with_fallbacks() {
        let driver = MemDriver::new();
        driver.on("ws.Ping", |_| Ok(Execution::default()));
        let services = DataServices::build(&parse(CONFIG), Arc::new(driver.clone())).unwrap();

        let orders = services.shard_set("orders").unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders.default_shard().map(|s| *s.shard_id()), Some(1));

        let shard1 = orders.shard(&1).unwrap();
        assert_eq!(shard1.read().resilience().retry_count, 10);
        assert_eq!(shard1.write().resilience().retry_count, 3);
        assert_eq!(shard1.read().shard_value(), Some(&Value::I16(1)));

        let shard2 = orders.shard(&2).unwrap();
        assert_eq!(shard2.read().name(), shard2.write().name());
        assert_eq!(shard2.read().resilience().retry_count, 3);

        let audit = services.database("audit").unwrap();
        audit.run(&Query::procedure("ws.Ping"), &Parameters::new(), &CancellationToken::new()).await.unwrap();
        assert_eq!(driver.calls()[0].connection_string, "mem://audit");
        assert!(services.database("missing").is_err());
    }

    #[test]
    fn missing_credential_is_fatal() {
        let config = parse(
            r#"
            [databases.audit]
            connection_string = "mem://audit"
            security_key = "nobody"
            "#,
        );
        let err = DataServices::build(&config, Arc::new(MemDriver::new())).unwrap_err();
        assert!(matches!(err, SgError::MissingCredential { ref key } if key == "nobody"));
    }

    #[test]
    fn shard_without_endpoints_is_rejected() {
        let config = parse(
            r#"
            [[shard_sets.orders.shards]]
            shard_id = 4
            "#,
        );
        let err = DataServices::build(&config, Arc::new(MemDriver::new())).unwrap_err();
        assert!(matches!(err, SgError::Config(_)));
    }

    #[test]
    fn empty_connection_string_is_rejected() {
        let mut config = DataConfig::<i16>::default();
        config.databases.insert(
            "x".into(),
            EndpointConfig { connection_string: " ".into(), security_key: None, resilience_key: None },
        );
        assert!(matches!(
            DataServices::build(&config, Arc::new(MemDriver::new())),
            Err(SgError::Config(_))
        ));
    }
}
