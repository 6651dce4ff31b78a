//! Source credentials read from provider secrets
//!
//! Controllers read secret `data` (already base64-decoded); the worker reads
//! the same keys from its environment, where the secret is mounted with
//! `envFrom`.

use crate::common::TlsOptions;
use crate::error::InventoryError;
use std::collections::BTreeMap;

/// Credentials for a source endpoint
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SourceCredentials {
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub url: Option<String>,
    pub cacert: Option<String>,
    pub insecure_skip_verify: bool,
    pub domain_name: Option<String>,
    pub project_name: Option<String>,
    pub region_name: Option<String>,
}

impl std::fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("user", &self.user)
            .field("url", &self.url)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("project_name", &self.project_name)
            .finish_non_exhaustive()
    }
}

impl SourceCredentials {
    /// Read from decoded secret data.
    ///
    /// `user` and `username` are both accepted; OpenStack secrets use the latter.
    pub fn from_map(data: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| data.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            user: get("user").or_else(|| get("username")),
            password: get("password"),
            token: get("token"),
            url: get("url"),
            cacert: get("cacert"),
            insecure_skip_verify: get("insecureSkipVerify").is_some_and(|v| parse_bool(&v)),
            domain_name: get("domainName"),
            project_name: get("projectName"),
            region_name: get("regionName"),
        }
    }

    /// Read from the process environment.
    pub fn from_env() -> Self {
        let data: BTreeMap<String, String> = std::env::vars().collect();
        Self::from_map(&data)
    }

    /// Decode raw secret bytes, skipping values that are not UTF-8.
    pub fn from_secret_bytes(data: &BTreeMap<String, Vec<u8>>) -> Self {
        let decoded: BTreeMap<String, String> = data
            .iter()
            .filter_map(|(k, v)| String::from_utf8(v.clone()).ok().map(|v| (k.clone(), v)))
            .collect();
        Self::from_map(&decoded)
    }

    pub fn tls(&self) -> TlsOptions {
        TlsOptions {
            insecure_skip_verify: self.insecure_skip_verify,
            cacert: self.cacert.clone(),
        }
    }

    /// User and password, or `Authentication` naming what is missing.
    pub fn basic(&self) -> Result<(&str, &str), InventoryError> {
        match (self.user.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) => Ok((user, password)),
            (None, _) => Err(InventoryError::Authentication("credentials have no user".to_string())),
            (_, None) => Err(InventoryError::Authentication("credentials have no password".to_string())),
        }
    }
}

pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_from_map_accepts_username_alias() {
        let creds = SourceCredentials::from_map(&data(&[
            ("username", "admin"),
            ("password", "pw"),
            ("url", "https://keystone:5000/v3"),
            ("insecureSkipVerify", "true"),
            ("projectName", "demo"),
        ]));
        assert_eq!(creds.basic().unwrap(), ("admin", "pw"));
        assert!(creds.insecure_skip_verify);
        assert_eq!(creds.project_name.as_deref(), Some("demo"));
    }

    #[test]
    fn test_empty_values_are_absent() {
        let creds = SourceCredentials::from_map(&data(&[("user", "root"), ("password", " ")]));
        let err = creds.basic().unwrap_err();
        assert_eq!(err.reason(), "AuthenticationFailed");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let creds = SourceCredentials::from_map(&data(&[("password", "hunter2"), ("token", "t0k")]));
        let out = format!("{creds:?}");
        assert!(!out.contains("hunter2"));
        assert!(!out.contains("t0k"));
    }
}
