//! HashiCorp Vault provider - KV version 2 secret engine over HTTP.

use super::provider::SecretStoreProvider;
use crate::config::VaultConfig;
use crate::error::{Result, SyncError};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Secret store backed by a KV v2 mount.
pub struct HashiCorpVaultProvider {
    client: Client,
    address: String,
    mount: String,
    namespace: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SecretData {
    #[serde(default)]
    data: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct VaultErrors {
    #[serde(default)]
    errors: Vec<String>,
}

impl HashiCorpVaultProvider {
    pub fn new(address: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            address: address.into().trim_end_matches('/').to_string(),
            mount: "secret".to_string(),
            namespace: None,
            token,
        }
    }

    pub fn from_config(config: &VaultConfig, token: Option<String>) -> Self {
        let mut provider = Self::new(config.address.clone().unwrap_or_default(), token)
            .with_mount(config.mount.clone());
        provider.namespace = config.namespace.clone();
        provider
    }

    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into().trim_matches('/').to_string();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn url(&self, kind: &str, path: &str) -> String {
        format!(
            "{}/v1/{}/{}/{}",
            self.address,
            self.mount,
            kind,
            path.trim_matches('/')
        )
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| SyncError::NotConfigured("Vault token".to_string()))?;
        let mut builder = self.client.request(method, url).header("X-Vault-Token", token);
        if let Some(namespace) = &self.namespace {
            builder = builder.header("X-Vault-Namespace", namespace);
        }
        Ok(builder)
    }
}

impl SecretStoreProvider for HashiCorpVaultProvider {
    fn name(&self) -> &'static str {
        "vault"
    }

    fn is_configured(&self) -> bool {
        !self.address.is_empty() && self.token.is_some()
    }

    fn list_secrets(&self, base_path: Option<&str>) -> Result<Vec<String>> {
        let path = base_path.unwrap_or("");
        // GET ?list=true is the HTTP-friendly spelling of LIST
        let response = self
            .request(Method::GET, &self.url("metadata", path))?
            .query(&[("list", "true")])
            .send()?;
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let listing: Envelope<KeyList> = check(response, path)?.json()?;

        // Trailing slash marks a sub-folder
        let mut names: Vec<String> = listing
            .data
            .keys
            .into_iter()
            .filter(|k| !k.ends_with('/'))
            .collect();
        names.sort();
        Ok(names)
    }

    fn get_secrets(&self, path: &str) -> Result<Option<BTreeMap<String, String>>> {
        let response = self.request(Method::GET, &self.url("data", path))?.send()?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let secret: Envelope<SecretData> = check(response, path)?.json()?;

        // Soft-deleted versions come back with data: null
        let Some(data) = secret.data.data else {
            return Ok(None);
        };
        let secrets = data
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();
        Ok(Some(secrets))
    }

    fn put_secrets(&self, path: &str, secrets: &BTreeMap<String, String>) -> Result<()> {
        let response = self
            .request(Method::POST, &self.url("data", path))?
            .json(&json!({ "data": secrets }))
            .send()?;
        check(response, path)?;
        debug!("[Vault] Wrote {} key(s) to {}", secrets.len(), path);
        Ok(())
    }

    fn delete_secrets(&self, path: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &self.url("metadata", path))?
            .send()?;
        check(response, path)?;
        Ok(())
    }

    fn test_connection(&self) -> bool {
        if !self.is_configured() {
            return false;
        }
        let url = format!("{}/v1/auth/token/lookup-self", self.address);
        match self.request(Method::GET, &url).and_then(|r| Ok(r.send()?)) {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("[Vault] Connection test failed: {}", e);
                false
            }
        }
    }
}

fn check(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().unwrap_or_default();
    let message = serde_json::from_str::<VaultErrors>(&text)
        .ok()
        .filter(|e| !e.errors.is_empty())
        .map(|e| e.errors.join("; "))
        .unwrap_or(text);

    Err(match status.as_u16() {
        403 => SyncError::RemoteUnavailable(format!("Vault denied access to {}: {}", path, message)),
        404 => SyncError::NotFound(path.to_string()),
        503 => SyncError::RemoteUnavailable(format!("Vault is sealed or unavailable: {}", message)),
        code => SyncError::Api {
            status: code,
            message,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn provider(server: &Server) -> HashiCorpVaultProvider {
        HashiCorpVaultProvider::new(server.url(), Some("s.test".to_string()))
    }

    #[test]
    fn test_list_skips_folders() -> Result<()> {
        let mut server = Server::new();
        server
            .mock("GET", "/v1/secret/metadata/apisync")
            .match_query(Matcher::UrlEncoded("list".into(), "true".into()))
            .match_header("x-vault-token", "s.test")
            .with_status(200)
            .with_body(r#"{"data":{"keys":["prod","archive/","dev"]}}"#)
            .create();

        let names = provider(&server).list_secrets(Some("apisync"))?;
        assert_eq!(names, vec!["dev".to_string(), "prod".to_string()]);
        Ok(())
    }

    #[test]
    fn test_list_missing_folder_is_empty() -> Result<()> {
        let mut server = Server::new();
        server
            .mock("GET", "/v1/secret/metadata/nothing")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"errors":[]}"#)
            .create();

        assert!(provider(&server).list_secrets(Some("nothing"))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_get_stringifies_values() -> Result<()> {
        let mut server = Server::new();
        server
            .mock("GET", "/v1/secret/data/apisync/dev")
            .with_status(200)
            .with_body(
                r#"{"data":{"data":{"TOKEN":"abc","RETRIES":3,"DEBUG":true},"metadata":{"version":2}}}"#,
            )
            .create();

        let secrets = provider(&server).get_secrets("apisync/dev")?.unwrap();
        assert_eq!(secrets["TOKEN"], "abc");
        assert_eq!(secrets["RETRIES"], "3");
        assert_eq!(secrets["DEBUG"], "true");
        Ok(())
    }

    #[test]
    fn test_get_missing_or_deleted_is_none() -> Result<()> {
        let mut server = Server::new();
        server
            .mock("GET", "/v1/secret/data/apisync/gone")
            .with_status(404)
            .with_body(r#"{"errors":[]}"#)
            .create();
        server
            .mock("GET", "/v1/secret/data/apisync/deleted")
            .with_status(200)
            .with_body(r#"{"data":{"data":null,"metadata":{"deletion_time":"2026-01-01T00:00:00Z"}}}"#)
            .create();

        let vault = provider(&server);
        assert!(vault.get_secrets("apisync/gone")?.is_none());
        assert!(vault.get_secrets("apisync/deleted")?.is_none());
        Ok(())
    }

    #[test]
    fn test_put_sends_namespace_and_data() -> Result<()> {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/v1/kv/data/apisync/dev")
            .match_header("x-vault-namespace", "team-a")
            .match_body(Matcher::Json(json!({"data": {"A": "1"}})))
            .with_status(200)
            .with_body(r#"{"data":{"version":3}}"#)
            .create();

        let vault = provider(&server).with_mount("kv").with_namespace("team-a");
        let mut secrets = BTreeMap::new();
        secrets.insert("A".to_string(), "1".to_string());
        vault.put_secrets("apisync/dev", &secrets)?;
        mock.assert();
        Ok(())
    }

    #[test]
    fn test_permission_denied() {
        let mut server = Server::new();
        server
            .mock("DELETE", "/v1/secret/metadata/apisync/dev")
            .with_status(403)
            .with_body(r#"{"errors":["permission denied"]}"#)
            .create();

        let err = provider(&server).delete_secrets("apisync/dev").unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_connection() {
        let mut server = Server::new();
        server
            .mock("GET", "/v1/auth/token/lookup-self")
            .with_status(200)
            .with_body(r#"{"data":{"ttl":3600}}"#)
            .create();
        assert!(provider(&server).test_connection());

        assert!(!HashiCorpVaultProvider::new(server.url(), None).test_connection());
    }
}
