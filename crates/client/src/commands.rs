// Command registry: maps every storage command tag to a handler over the
// persistence facade. A registry missing a handler for any declared tag
// cannot be built.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use mocksmith_common::protocol::commands::CommandTag;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::PersistenceError;
use crate::persistence::Persistence;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no handler registered for `{0}`")]
    MissingHandler(CommandTag),

    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("invalid payload for `{tag}`: {message}")]
    InvalidPayload { tag: CommandTag, message: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RegistryError>> + Send>>;
pub type Handler = Arc<dyn Fn(Arc<Persistence>, Value) -> HandlerFuture + Send + Sync>;

pub struct RegistryBuilder {
    persistence: Arc<Persistence>,
    handlers: HashMap<CommandTag, Handler>,
}

impl RegistryBuilder {
    pub fn register<F, Fut>(mut self, tag: CommandTag, handler: F) -> Self
    where
        F: Fn(Arc<Persistence>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RegistryError>> + Send + 'static,
    {
        let boxed: Handler =
            Arc::new(move |persistence: Arc<Persistence>, payload: Value| -> HandlerFuture {
                Box::pin(handler(persistence, payload))
            });
        self.handlers.insert(tag, boxed);
        self
    }

    /// Fails if any tag in [`CommandTag::ALL`] has no handler.
    pub fn build(self) -> Result<CommandRegistry, RegistryError> {
        if let Some(missing) = CommandTag::ALL.into_iter().find(|tag| !self.handlers.contains_key(tag)) {
            return Err(RegistryError::MissingHandler(missing));
        }
        Ok(CommandRegistry { persistence: self.persistence, handlers: self.handlers })
    }
}

pub struct CommandRegistry {
    persistence: Arc<Persistence>,
    handlers: HashMap<CommandTag, Handler>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.handlers.keys().map(|tag| tag.as_str()).collect();
        tags.sort_unstable();
        f.debug_struct("CommandRegistry").field("commands", &tags).finish()
    }
}

impl CommandRegistry {
    pub fn builder(persistence: Arc<Persistence>) -> RegistryBuilder {
        RegistryBuilder { persistence, handlers: HashMap::new() }
    }

    /// Registry with the standard storage handlers.
    pub fn storage(persistence: Arc<Persistence>) -> Result<Self, RegistryError> {
        Self::builder(persistence)
            .register(CommandTag::ReadEnvironment, read_environment)
            .register(CommandTag::WriteEnvironment, write_environment)
            .register(CommandTag::DeleteEnvironment, delete_environment)
            .register(CommandTag::ReadSettings, read_settings)
            .register(CommandTag::WriteSettings, write_settings)
            .register(CommandTag::Fingerprint, fingerprint)
            .build()
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub async fn dispatch(&self, tag: &str, payload: Value) -> Result<Value, RegistryError> {
        let tag: CommandTag = tag.parse().map_err(|_| RegistryError::UnknownCommand(tag.to_string()))?;
        let handler = self.handlers.get(&tag).ok_or(RegistryError::MissingHandler(tag))?;
        handler(Arc::clone(&self.persistence), payload).await
    }
}

#[derive(Debug, Deserialize)]
struct IdPayload {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WriteEnvironmentPayload {
    id: String,
    environment: Value,
    #[serde(default = "default_pretty")]
    pretty: bool,
}

#[derive(Debug, Deserialize)]
struct WriteSettingsPayload {
    settings: Value,
    #[serde(default = "default_pretty")]
    pretty: bool,
}

#[derive(Debug, Deserialize)]
struct FingerprintPayload {
    document: Value,
}

fn default_pretty() -> bool {
    true
}

fn parse_payload<T: DeserializeOwned>(tag: CommandTag, payload: Value) -> Result<T, RegistryError> {
    serde_json::from_value(payload)
        .map_err(|error| RegistryError::InvalidPayload { tag, message: error.to_string() })
}

async fn read_environment(persistence: Arc<Persistence>, payload: Value) -> Result<Value, RegistryError> {
    let IdPayload { id } = parse_payload(CommandTag::ReadEnvironment, payload)?;
    Ok(persistence.read_environment(&id).await?.unwrap_or(Value::Null))
}

async fn write_environment(persistence: Arc<Persistence>, payload: Value) -> Result<Value, RegistryError> {
    let request: WriteEnvironmentPayload = parse_payload(CommandTag::WriteEnvironment, payload)?;
    persistence.write_environment(&request.id, &request.environment, request.pretty).await?;
    Ok(Value::Null)
}

async fn delete_environment(persistence: Arc<Persistence>, payload: Value) -> Result<Value, RegistryError> {
    let IdPayload { id } = parse_payload(CommandTag::DeleteEnvironment, payload)?;
    let deleted = persistence.delete_environment(&id).await?;
    Ok(json!({ "deleted": deleted }))
}

async fn read_settings(persistence: Arc<Persistence>, _payload: Value) -> Result<Value, RegistryError> {
    Ok(persistence.read_settings().await?.unwrap_or(Value::Null))
}

async fn write_settings(persistence: Arc<Persistence>, payload: Value) -> Result<Value, RegistryError> {
    let request: WriteSettingsPayload = parse_payload(CommandTag::WriteSettings, payload)?;
    persistence.write_settings(&request.settings, request.pretty).await?;
    Ok(Value::Null)
}

async fn fingerprint(persistence: Arc<Persistence>, payload: Value) -> Result<Value, RegistryError> {
    let FingerprintPayload { document } = parse_payload(CommandTag::Fingerprint, payload)?;
    Ok(json!({ "fingerprint": persistence.fingerprint(&document) }))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::backend::LocalBackend;

    async fn local_persistence(tmp: &TempDir) -> Arc<Persistence> {
        Arc::new(Persistence::Local(LocalBackend::open(tmp.path().join("db")).await.unwrap()))
    }

    #[tokio::test]
    async fn incomplete_registry_fails_to_build() {
        let tmp = TempDir::new().unwrap();
        let result = CommandRegistry::builder(local_persistence(&tmp).await)
            .register(CommandTag::ReadEnvironment, read_environment)
            .register(CommandTag::ReadSettings, read_settings)
            .build();

        assert!(matches!(result, Err(RegistryError::MissingHandler(CommandTag::WriteEnvironment))));
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let registry = CommandRegistry::storage(local_persistence(&tmp).await).unwrap();
        let error = registry.dispatch("storage.format_disk", Value::Null).await.unwrap_err();
        assert!(matches!(error, RegistryError::UnknownCommand(ref tag) if tag == "storage.format_disk"));
    }

    #[tokio::test]
    async fn storage_commands_round_through_persistence() {
        let tmp = TempDir::new().unwrap();
        let registry = CommandRegistry::storage(local_persistence(&tmp).await).unwrap();
        let environment = json!({ "uuid": "env-1", "name": "Users" });

        let absent = registry.dispatch("storage.read_environment", json!({ "id": "env-1" })).await.unwrap();
        assert_eq!(absent, Value::Null);

        registry
            .dispatch("storage.write_environment", json!({ "id": "env-1", "environment": environment }))
            .await
            .unwrap();
        let read = registry.dispatch("storage.read_environment", json!({ "id": "env-1" })).await.unwrap();
        assert_eq!(read, environment);

        let deleted = registry.dispatch("storage.delete_environment", json!({ "id": "env-1" })).await.unwrap();
        assert_eq!(deleted, json!({ "deleted": true }));
        let again = registry.dispatch("storage.delete_environment", json!({ "id": "env-1" })).await.unwrap();
        assert_eq!(again, json!({ "deleted": false }));

        registry
            .dispatch("storage.write_settings", json!({ "settings": { "environments": [] }, "pretty": false }))
            .await
            .unwrap();
        let settings = registry.dispatch("storage.read_settings", Value::Null).await.unwrap();
        assert_eq!(settings, json!({ "environments": [] }));

        let digest = registry.dispatch("storage.fingerprint", json!({ "document": { "a": 1 } })).await.unwrap();
        assert_eq!(
            digest["fingerprint"],
            "015abd7f5cc57a2dd94b7590f04ad8084273905ee33ec5cebeae62276a97f862"
        );
    }

    #[tokio::test]
    async fn malformed_payload_names_the_command() {
        let tmp = TempDir::new().unwrap();
        let registry = CommandRegistry::storage(local_persistence(&tmp).await).unwrap();
        let error = registry.dispatch("storage.write_environment", json!({ "id": 7 })).await.unwrap_err();
        assert!(matches!(
            error,
            RegistryError::InvalidPayload { tag: CommandTag::WriteEnvironment, .. }
        ));
    }

    #[tokio::test]
    async fn persistence_errors_are_propagated() {
        let tmp = TempDir::new().unwrap();
        let registry = CommandRegistry::storage(local_persistence(&tmp).await).unwrap();
        let error = registry
            .dispatch("storage.write_environment", json!({ "id": "x", "environment": "not an object" }))
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::Persistence(PersistenceError::InvalidDocument(_))));
    }
}
