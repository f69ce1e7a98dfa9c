use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("Duplicate tenant id in registry: {0}")]
    DuplicateTenant(String),
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Static per-tenant configuration loaded once at startup.
///
/// `database_url_env` names the environment variable holding the tenant's
/// Postgres URL - the registry file carries a credential *reference*, never
/// the credential itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantDescriptor {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub database_url_env: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub grafana_org_id: i64,
    /// Opaque branding blob passed through to clients untouched.
    #[serde(default)]
    pub branding: serde_json::Value,
}

/// Read-only tenant lookup table. Iteration order matches the order the
/// tenants appear in the registry file.
#[derive(Debug)]
pub struct TenantRegistry {
    tenants: Vec<TenantDescriptor>,
    index: HashMap<String, usize>,
}

impl TenantRegistry {
    pub fn new(tenants: Vec<TenantDescriptor>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(tenants.len());
        for (pos, tenant) in tenants.iter().enumerate() {
            if index.insert(tenant.id.clone(), pos).is_some() {
                return Err(RegistryError::DuplicateTenant(tenant.id.clone()));
            }
        }
        Ok(Self { tenants, index })
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read tenant registry {}: {}", path.display(), e))?;
        let tenants: Vec<TenantDescriptor> = serde_yaml::from_str(&raw)?;
        tracing::info!("Loaded {} tenants from {}", tenants.len(), path.display());
        Ok(Self::new(tenants)?)
    }

    pub fn lookup(&self, id: &str) -> Result<&TenantDescriptor, RegistryError> {
        self.index
            .get(id)
            .map(|&pos| &self.tenants[pos])
            .ok_or_else(|| RegistryError::UnknownTenant(id.to_string()))
    }

    /// Never fails; an empty id is simply not registered.
    pub fn exists(&self, id: &str) -> bool {
        !id.is_empty() && self.index.contains_key(id)
    }

    /// Tenant ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tenants.iter().map(|t| t.id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TenantDescriptor> {
        self.tenants.iter()
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::registry;
    use super::*;

    #[test]
    fn lookup_unknown_tenant_fails() {
        let reg = registry(&["acme"]);
        assert!(matches!(
            reg.lookup("globex"),
            Err(RegistryError::UnknownTenant(id)) if id == "globex"
        ));
    }

    #[test]
    fn exists_is_false_for_empty_and_absent_ids() {
        let reg = registry(&["acme"]);
        assert!(reg.exists("acme"));
        assert!(!reg.exists(""));
        assert!(!reg.exists("globex"));
    }

    #[test]
    fn ids_keep_registration_order() {
        let reg = registry(&["zeta", "acme", "mid"]);
        let ids: Vec<&str> = reg.ids().collect();
        assert_eq!(ids, vec!["zeta", "acme", "mid"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = TenantRegistry::new(vec![
            test_support::descriptor("acme"),
            test_support::descriptor("acme"),
        ]);
        assert!(matches!(result, Err(RegistryError::DuplicateTenant(_))));
    }

    #[test]
    fn parses_yaml_registry() {
        let yaml = r##"
- id: acme
  name: Acme Inc
  domain: acme.example.com
  database_url_env: ACME_DATABASE_URL
  timezone: Europe/Madrid
  grafana_org_id: 2
  branding:
    primary_color: "#ff6600"
- id: globex
  name: Globex
  domain: globex.example.com
  database_url_env: GLOBEX_DATABASE_URL
  grafana_org_id: 3
"##;
        let tenants: Vec<TenantDescriptor> = serde_yaml::from_str(yaml).unwrap();
        let reg = TenantRegistry::new(tenants).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.lookup("acme").unwrap().timezone, "Europe/Madrid");
        // timezone defaults to UTC when omitted
        assert_eq!(reg.lookup("globex").unwrap().timezone, "UTC");
    }
}
