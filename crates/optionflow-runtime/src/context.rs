use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use optionflow_core::{
    ConnectorDefinition, FieldMeta, GridMeta, LayoutNode, RuntimeState, SectionMeta,
    SHARED_SECTION_ID,
};
use optionflow_graph::FunctionDefinition;

/// Everything a resolution can read: form metadata, table data, the current
/// row snapshot, and the user-defined functions and connectors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveContext {
    /// Caller-maintained version; a content fingerprint is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub grids: Vec<GridMeta>,
    #[serde(default)]
    pub fields: Vec<FieldMeta>,
    /// Table name to rows.
    #[serde(default)]
    pub grid_data: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub layout: Vec<LayoutNode>,
    #[serde(default)]
    pub sections: Vec<SectionMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeState>,
    #[serde(default)]
    pub functions: Vec<Arc<FunctionDefinition>>,
    #[serde(default)]
    pub connectors: Vec<ConnectorDefinition>,
}

impl ResolveContext {
    pub fn function(&self, id: &str) -> Option<&Arc<FunctionDefinition>> {
        self.functions.iter().find(|f| f.id == id)
    }

    pub fn connector(&self, id: &str) -> Option<&ConnectorDefinition> {
        self.connectors.iter().find(|c| c.id == id)
    }

    pub fn connector_ids(&self) -> BTreeSet<String> {
        self.connectors.iter().map(|c| c.id.clone()).collect()
    }

    pub fn grid(&self, id: &str) -> Option<&GridMeta> {
        self.grids.iter().find(|g| g.id == id)
    }

    pub fn field(&self, grid_id: &str, field_id: &str) -> Option<&FieldMeta> {
        self.fields
            .iter()
            .find(|f| f.grid_id == grid_id && f.id == field_id)
    }

    pub fn grid_rows(&self, grid_id: &str) -> Option<&[Value]> {
        self.grid_data.get(grid_id).map(Vec::as_slice)
    }

    /// Whether `section_id` names the reserved shared section or one flagged shared.
    pub fn is_shared_section(&self, section_id: Option<&str>) -> bool {
        match section_id {
            Some(SHARED_SECTION_ID) => true,
            Some(id) => self.sections.iter().any(|s| s.id == id && s.shared),
            None => false,
        }
    }

    /// Cache-key component for this context.
    pub fn version_key(&self) -> String {
        if let Some(version) = &self.version {
            return format!("v:{}", version);
        }
        let mut hasher = DefaultHasher::new();
        hash_json(&self.grids, &mut hasher);
        hash_json(&self.fields, &mut hasher);
        hash_json(&self.grid_data, &mut hasher);
        hash_json(&self.layout, &mut hasher);
        hash_json(&self.sections, &mut hasher);
        hash_json(&self.functions, &mut hasher);
        hash_json(&self.connectors, &mut hasher);
        format!("fp:{:016x}", hasher.finish())
    }
}

/// Cache-key component for the runtime snapshot in effect.
pub fn runtime_version_key(runtime: Option<&RuntimeState>) -> String {
    match runtime {
        None => "none".to_string(),
        Some(RuntimeState {
            version: Some(version),
            ..
        }) => format!("v:{}", version),
        Some(state) => {
            let mut hasher = DefaultHasher::new();
            hash_json(state, &mut hasher);
            format!("fp:{:016x}", hasher.finish())
        }
    }
}

/// The object `context` selectors and `{{context.x}}` tokens read from.
pub fn runtime_scope(runtime: Option<&RuntimeState>) -> Value {
    match runtime {
        Some(state) => json!({
            "gridId": state.grid_id,
            "fieldId": state.field_id,
            "rowIndex": state.row_index,
            "row": state.row_values,
        }),
        None => json!({
            "gridId": null,
            "fieldId": null,
            "rowIndex": null,
            "row": {},
        }),
    }
}

fn hash_json<T: Serialize + ?Sized>(value: &T, hasher: &mut DefaultHasher) {
    serde_json::to_string(value)
        .unwrap_or_default()
        .hash(hasher);
}
