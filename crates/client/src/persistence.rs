// Backend-agnostic persistence facade.
//
// The backend is chosen once from the runtime injection: a non-blank
// storage base address selects the storage API, anything else selects the
// embedded database. Call sites never branch on the backend.

use std::path::Path;

use mocksmith_common::digest::{fingerprint_document, Fingerprint};
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::backend::{HttpBackend, LocalBackend};
use crate::error::PersistenceError;
use crate::runtime::RuntimeInjection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Http,
    Local,
}

#[derive(Debug, Clone)]
pub enum Persistence {
    Http(HttpBackend),
    Local(LocalBackend),
}

impl Persistence {
    /// Select a backend from runtime configuration.
    ///
    /// A relative base address (`/api`) is resolved against `origin`, the
    /// address the runtime script was served from.
    pub async fn from_runtime(
        runtime: &RuntimeInjection,
        origin: Option<&Url>,
        local_db_path: impl AsRef<Path>,
    ) -> Result<Self, PersistenceError> {
        match runtime.networked_base_url() {
            Some(base) => {
                let base_url = resolve_base_url(base, origin)?;
                info!(base_url = %base_url, "using networked storage backend");
                Ok(Self::Http(HttpBackend::with_client(reqwest::Client::new(), base_url)?))
            }
            None => {
                let path = local_db_path.as_ref();
                info!(path = %path.display(), "using embedded storage backend");
                Ok(Self::Local(LocalBackend::open(path).await?))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Http(_) => BackendKind::Http,
            Self::Local(_) => BackendKind::Local,
        }
    }

    /// `None` when no settings document exists yet.
    pub async fn read_settings(&self) -> Result<Option<Value>, PersistenceError> {
        match self {
            Self::Http(backend) => backend.read_settings().await,
            Self::Local(backend) => backend.read_settings().await,
        }
    }

    pub async fn write_settings(&self, settings: &Value, pretty: bool) -> Result<(), PersistenceError> {
        match self {
            Self::Http(backend) => backend.write_settings(settings, pretty).await,
            Self::Local(backend) => backend.write_settings(settings, pretty).await,
        }
    }

    /// `None` when no environment is stored under `id`.
    pub async fn read_environment(&self, id: &str) -> Result<Option<Value>, PersistenceError> {
        match self {
            Self::Http(backend) => backend.read_environment(id).await,
            Self::Local(backend) => backend.read_environment(id).await,
        }
    }

    /// Environment documents must be JSON objects.
    pub async fn write_environment(
        &self,
        id: &str,
        environment: &Value,
        pretty: bool,
    ) -> Result<(), PersistenceError> {
        if !environment.is_object() {
            return Err(PersistenceError::InvalidDocument(
                "environment document must be a JSON object".into(),
            ));
        }
        match self {
            Self::Http(backend) => backend.write_environment(id, environment, pretty).await,
            Self::Local(backend) => backend.write_environment(id, environment, pretty).await,
        }
    }

    /// Returns `false` if there was nothing to delete.
    pub async fn delete_environment(&self, id: &str) -> Result<bool, PersistenceError> {
        match self {
            Self::Http(backend) => backend.delete_environment(id).await,
            Self::Local(backend) => backend.delete_environment(id).await,
        }
    }

    /// Content fingerprint for change detection (`lastServerHash`).
    pub fn fingerprint(&self, document: &Value) -> Fingerprint {
        fingerprint_document(document)
    }
}

fn resolve_base_url(base: &str, origin: Option<&Url>) -> Result<Url, PersistenceError> {
    match Url::parse(base) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let origin = origin.ok_or_else(|| PersistenceError::InvalidBaseUrl {
                url: base.to_string(),
                reason: "relative address without an origin".into(),
            })?;
            origin.join(base).map_err(|error| PersistenceError::InvalidBaseUrl {
                url: base.to_string(),
                reason: error.to_string(),
            })
        }
        Err(error) => {
            Err(PersistenceError::InvalidBaseUrl { url: base.to_string(), reason: error.to_string() })
        }
    }
}
