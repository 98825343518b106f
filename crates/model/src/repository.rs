//! In-memory repository of deployed case definitions.

use std::sync::{Arc, RwLock};

use crate::error::ModelError;
use crate::types::CaseDefinition;

/// Deployed definitions, shared read-only with every unit of work.
///
/// Deploying a definition whose key (and tenant) is already known
/// creates the next version; earlier versions stay resolvable by id so
/// running case instances keep their definition.
#[derive(Debug, Default)]
pub struct DefinitionRepository {
    definitions: RwLock<Vec<Arc<CaseDefinition>>>,
}

impl DefinitionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy a parsed definition, assigning its version and id.
    pub fn deploy(&self, mut definition: CaseDefinition) -> Arc<CaseDefinition> {
        let mut defs = self
            .definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let latest = defs
            .iter()
            .filter(|d| d.key == definition.key && d.tenant_id == definition.tenant_id)
            .map(|d| d.version)
            .max()
            .unwrap_or(0);
        definition.version = latest + 1;
        definition.id = CaseDefinition::make_id(
            &definition.key,
            definition.version,
            definition.tenant_id.as_deref(),
        );
        let definition = Arc::new(definition);
        defs.push(definition.clone());
        definition
    }

    /// Parse, validate and deploy a JSON definition.
    pub fn deploy_json(&self, v: &serde_json::Value) -> Result<Arc<CaseDefinition>, ModelError> {
        let definition = CaseDefinition::from_json(v)?;
        Ok(self.deploy(definition))
    }

    pub fn get(&self, id: &str) -> Result<Arc<CaseDefinition>, ModelError> {
        let defs = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        defs.iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| ModelError::DefinitionNotFound(id.to_string()))
    }

    /// Latest version of the definition with this key and tenant.
    pub fn latest_by_key(
        &self,
        key: &str,
        tenant_id: Option<&str>,
    ) -> Result<Arc<CaseDefinition>, ModelError> {
        let defs = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        defs.iter()
            .filter(|d| d.key == key && d.tenant_id.as_deref() == tenant_id)
            .max_by_key(|d| d.version)
            .cloned()
            .ok_or_else(|| ModelError::DefinitionNotFound(key.to_string()))
    }

    pub fn list(&self) -> Vec<Arc<CaseDefinition>> {
        self.definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
