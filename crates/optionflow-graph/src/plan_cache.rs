use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, warn};

use crate::compiler::{compile_definition, CompileIssue, CompiledPlan};
use crate::definition::FunctionDefinition;

const DEFAULT_SIGNATURE_CAPACITY: usize = 256;

struct RefEntry {
    definition: Weak<FunctionDefinition>,
    connectors_key: String,
    plan: Arc<CompiledPlan>,
}

/// Compiled-plan cache.
///
/// Two layers: by definition identity (the same `Arc` handed in again) and by
/// content signature (an equal definition built elsewhere). The signature map
/// is cleared outright once it reaches capacity; entries are derived data, so
/// recompiling is always safe.
pub struct PlanCache {
    by_ref: RwLock<HashMap<usize, RefEntry>>,
    by_signature: RwLock<HashMap<String, Arc<CompiledPlan>>>,
    signature_capacity: usize,
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURE_CAPACITY)
    }
}

impl PlanCache {
    pub fn new(signature_capacity: usize) -> Self {
        Self {
            by_ref: RwLock::new(HashMap::new()),
            by_signature: RwLock::new(HashMap::new()),
            signature_capacity: signature_capacity.max(1),
        }
    }

    /// Return the cached plan for `definition`, compiling it on a miss.
    /// Failed compilations are not cached.
    pub fn get_or_compile(
        &self,
        definition: &Arc<FunctionDefinition>,
        known_connector_ids: &BTreeSet<String>,
    ) -> Result<Arc<CompiledPlan>, Vec<CompileIssue>> {
        let ptr = Arc::as_ptr(definition) as usize;
        let connectors_key = connectors_key(known_connector_ids);

        {
            let by_ref = self.by_ref.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = by_ref.get(&ptr) {
                let same_definition = entry
                    .definition
                    .upgrade()
                    .is_some_and(|live| Arc::ptr_eq(&live, definition));
                if same_definition && entry.connectors_key == connectors_key {
                    return Ok(entry.plan.clone());
                }
            }
        }

        let signature = match signature(definition, &connectors_key) {
            Some(signature) => signature,
            None => {
                warn!(function_id = %definition.id, "Definition could not be fingerprinted");
                return compile_definition(definition, known_connector_ids).map(Arc::new);
            }
        };

        let cached = self
            .by_signature
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&signature)
            .cloned();

        let plan = match cached {
            Some(plan) => {
                debug!(function_id = %definition.id, "Plan signature cache hit");
                plan
            }
            None => {
                let plan = Arc::new(compile_definition(definition, known_connector_ids)?);
                let mut by_signature = self.by_signature.write().unwrap_or_else(|e| e.into_inner());
                if by_signature.len() >= self.signature_capacity {
                    debug!(entries = by_signature.len(), "Plan signature cache full, clearing");
                    by_signature.clear();
                }
                by_signature.insert(signature, plan.clone());
                plan
            }
        };

        let mut by_ref = self.by_ref.write().unwrap_or_else(|e| e.into_inner());
        by_ref.retain(|_, entry| entry.definition.strong_count() > 0);
        by_ref.insert(
            ptr,
            RefEntry {
                definition: Arc::downgrade(definition),
                connectors_key,
                plan: plan.clone(),
            },
        );
        Ok(plan)
    }

    /// Number of signature entries.
    pub fn len(&self) -> usize {
        self.by_signature
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.by_ref
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.by_signature
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

fn connectors_key(ids: &BTreeSet<String>) -> String {
    ids.iter().cloned().collect::<Vec<_>>().join(",")
}

fn signature(definition: &FunctionDefinition, connectors_key: &str) -> Option<String> {
    let body = serde_json::to_string(&definition.body).ok()?;
    Some(format!(
        "{}@{}|{}|{}",
        definition.id, definition.version, connectors_key, body
    ))
}
