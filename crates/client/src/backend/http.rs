// Networked backend: one storage API request per operation.

use mocksmith_common::storage_key::storage_file_name;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::PersistenceError;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    /// `base_url` is the storage API root, e.g. `http://127.0.0.1:8080/api`.
    pub fn new(base_url: &str) -> Result<Self, PersistenceError> {
        let base = Url::parse(base_url).map_err(|error| PersistenceError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: error.to_string(),
        })?;
        Self::with_client(Client::new(), base)
    }

    pub fn with_client(client: Client, base: Url) -> Result<Self, PersistenceError> {
        if base.cannot_be_a_base() {
            return Err(PersistenceError::InvalidBaseUrl {
                url: base.to_string(),
                reason: "address cannot be used as a base".into(),
            });
        }
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub async fn read_settings(&self) -> Result<Option<Value>, PersistenceError> {
        let response = self.client.get(self.url(&["settings"], None)?).send().await?;
        read_document(response).await
    }

    pub async fn write_settings(&self, settings: &Value, pretty: bool) -> Result<(), PersistenceError> {
        let response =
            self.client.put(self.url(&["settings"], Some(pretty))?).json(settings).send().await?;
        expect_success(response).await
    }

    pub async fn read_environment(&self, id: &str) -> Result<Option<Value>, PersistenceError> {
        let key = storage_file_name(id);
        let response = self.client.get(self.url(&["environments", &key], None)?).send().await?;
        read_document(response).await
    }

    pub async fn write_environment(
        &self,
        id: &str,
        environment: &Value,
        pretty: bool,
    ) -> Result<(), PersistenceError> {
        let key = storage_file_name(id);
        let response = self
            .client
            .put(self.url(&["environments", &key], Some(pretty))?)
            .json(environment)
            .send()
            .await?;
        expect_success(response).await
    }

    /// Returns `false` if there was nothing to delete.
    pub async fn delete_environment(&self, id: &str) -> Result<bool, PersistenceError> {
        let key = storage_file_name(id);
        let response = self.client.delete(self.url(&["environments", &key], None)?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(response).await?;
        Ok(true)
    }

    fn url(&self, segments: &[&str], pretty: Option<bool>) -> Result<Url, PersistenceError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| PersistenceError::InvalidBaseUrl {
                url: self.base.to_string(),
                reason: "address cannot be used as a base".into(),
            })?
            .pop_if_empty()
            .extend(segments);
        if let Some(pretty) = pretty {
            url.query_pairs_mut().append_pair("pretty", if pretty { "1" } else { "0" });
        }
        debug!(%url, "storage request");
        Ok(url)
    }
}

async fn read_document(response: Response) -> Result<Option<Value>, PersistenceError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(transport_error(response).await);
    }
    let body = response.bytes().await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

async fn expect_success(response: Response) -> Result<(), PersistenceError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(transport_error(response).await)
    }
}

async fn transport_error(response: Response) -> PersistenceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(ToOwned::to_owned));
    PersistenceError::transport(status.as_u16(), status.canonical_reason(), detail.as_deref())
}
