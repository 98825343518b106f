//! Structural validation of parsed case definitions.

use std::collections::BTreeSet;

use crate::error::ModelError;
use crate::types::CaseDefinition;

pub(crate) fn validate(def: &CaseDefinition) -> Result<(), ModelError> {
    let mut item_ids = BTreeSet::new();
    for item in def.all_plan_items() {
        if !item_ids.insert(item.id.as_str()) {
            return Err(ModelError::DuplicateId(item.id.clone()));
        }
    }

    let mut sentry_ids = BTreeSet::new();
    for sentry in &def.sentries {
        if !sentry_ids.insert(sentry.id.as_str()) {
            return Err(ModelError::DuplicateId(sentry.id.clone()));
        }
        for part in &sentry.on_parts {
            if !item_ids.contains(part.source.as_str()) {
                return Err(ModelError::UnknownReference {
                    owner: sentry.id.clone(),
                    kind: "plan item",
                    reference: part.source.clone(),
                });
            }
        }
    }

    if !def.plan_model.entry_criteria.is_empty() {
        return Err(ModelError::InvalidField {
            context: format!("plan model '{}'", def.plan_model.id),
            field: "entry_criteria".to_string(),
            message: "the plan model is activated when the case starts".to_string(),
        });
    }

    for item in &def.plan_items {
        let parent_id = item
            .parent
            .as_deref()
            .ok_or_else(|| ModelError::Unreachable(item.id.clone()))?;
        let parent = def
            .plan_item(parent_id)
            .ok_or_else(|| ModelError::UnknownReference {
                owner: item.id.clone(),
                kind: "parent stage",
                reference: parent_id.to_string(),
            })?;
        if !parent.is_stage() {
            return Err(ModelError::ParentNotAStage {
                item: item.id.clone(),
                parent: parent_id.to_string(),
            });
        }
        check_reaches_root(def, &item.id)?;
    }

    for item in def.all_plan_items() {
        for sid in item.entry_criteria.iter().chain(item.exit_criteria.iter()) {
            if !sentry_ids.contains(sid.as_str()) {
                return Err(ModelError::UnknownReference {
                    owner: item.id.clone(),
                    kind: "sentry",
                    reference: sid.clone(),
                });
            }
        }
        if let Some(sid) = item
            .entry_criteria
            .iter()
            .find(|sid| item.exit_criteria.contains(sid))
        {
            return Err(ModelError::ConflictingCriteria {
                item: item.id.clone(),
                sentry: sid.clone(),
            });
        }
    }

    Ok(())
}

/// Parent links must lead to the root without revisiting a node.
fn check_reaches_root(def: &CaseDefinition, item_id: &str) -> Result<(), ModelError> {
    let mut seen = BTreeSet::new();
    let mut current = item_id;
    loop {
        if !seen.insert(current) {
            return Err(ModelError::Unreachable(item_id.to_string()));
        }
        let item = def
            .plan_item(current)
            .ok_or_else(|| ModelError::Unreachable(item_id.to_string()))?;
        match item.parent.as_deref() {
            None if item.id == def.plan_model.id => return Ok(()),
            None => return Err(ModelError::Unreachable(item_id.to_string())),
            Some(parent) => current = parent,
        }
    }
}
