use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;

use super::{build_url, process_response, Administration};
use crate::error::AdministrationError;
use crate::sync::SyncConfig;

/// Talks to a live Moneybird administration over HTTPS with a bearer token.
pub struct HttpsAdministration {
    client: Client,
    api_base_url: String,
    administration_id: u64,
    api_token: String,
}

impl HttpsAdministration {
    pub fn new(
        api_base_url: &str,
        administration_id: u64,
        api_token: &str,
        request_timeout: Duration,
    ) -> Result<Self, AdministrationError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            api_base_url: api_base_url.to_string(),
            administration_id,
            api_token: api_token.to_string(),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, AdministrationError> {
        Self::new(
            &config.api_base_url,
            config.administration_id,
            &config.api_token,
            config.request_timeout,
        )
    }

    pub fn administration_id(&self) -> u64 {
        self.administration_id
    }

    fn url(&self, resource_path: &str) -> Result<String, AdministrationError> {
        build_url(&self.api_base_url, self.administration_id, resource_path)
    }

    fn send(&self, method: &str, request: RequestBuilder) -> Result<Value, AdministrationError> {
        let response = request.bearer_auth(&self.api_token).send()?;
        let status = response.status().as_u16();
        let body = response.bytes()?;
        log::debug!("ADMINISTRATION {}: status={}, {} bytes", method, status, body.len());
        process_response(status, &body)
    }
}

impl Administration for HttpsAdministration {
    fn get(&self, resource_path: &str) -> Result<Value, AdministrationError> {
        let url = self.url(resource_path)?;
        log::debug!("ADMINISTRATION GET: path='{}'", resource_path);
        self.send("GET", self.client.get(url))
    }

    fn post(&self, resource_path: &str, data: &Value) -> Result<Value, AdministrationError> {
        let url = self.url(resource_path)?;
        log::debug!("ADMINISTRATION POST: path='{}'", resource_path);
        self.send("POST", self.client.post(url).json(data))
    }

    fn patch(&self, resource_path: &str, data: &Value) -> Result<Value, AdministrationError> {
        let url = self.url(resource_path)?;
        log::debug!("ADMINISTRATION PATCH: path='{}'", resource_path);
        self.send("PATCH", self.client.patch(url).json(data))
    }

    fn delete(&self, resource_path: &str) -> Result<Option<Value>, AdministrationError> {
        let url = self.url(resource_path)?;
        log::debug!("ADMINISTRATION DELETE: path='{}'", resource_path);
        let value = self.send("DELETE", self.client.delete(url))?;
        Ok(if value.is_null() { None } else { Some(value) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_slash_fails_before_any_request() -> anyhow::Result<()> {
        // Nothing listens on port 9; a network attempt would be a transport error.
        let administration =
            HttpsAdministration::new("http://127.0.0.1:9", 1, "token", Duration::from_secs(1))?;
        let result = administration.get("/contacts");
        assert!(matches!(
            result,
            Err(AdministrationError::InvalidResourcePath(_))
        ));
        let result = administration.delete("/contacts/1");
        assert!(matches!(
            result,
            Err(AdministrationError::InvalidResourcePath(_))
        ));
        Ok(())
    }

    #[test]
    fn from_config_uses_configured_administration() -> anyhow::Result<()> {
        let config = SyncConfig {
            administration_id: 123,
            api_token: "secret".to_string(),
            ..Default::default()
        };
        let administration = HttpsAdministration::from_config(&config)?;
        assert_eq!(administration.administration_id(), 123);
        assert_eq!(
            administration.url("contacts")?,
            "https://moneybird.com/api/v2/123/contacts.json"
        );
        Ok(())
    }
}
