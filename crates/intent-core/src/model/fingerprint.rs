use serde::{Deserialize, Serialize};

use super::{Intent, Params};
use crate::constants::ENGINE_VERSION;
use crate::hashing::{hash_str, normalize_value, to_canonical_json};

/// Insumos del fingerprint antes de canonicalizar. NO es el fingerprint final.
#[derive(Serialize)]
pub struct FingerprintInput<'a> {
    pub engine_version: &'a str,
    pub intent_type: &'a str,
    pub params: &'a Params,
    pub tenant_id: &'a str,
    pub scope: Option<&'a str>,
}

/// Hash determinista que identifica invocaciones lógicamente equivalentes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn of(intent: &Intent) -> Self {
        let input = FingerprintInput { engine_version: ENGINE_VERSION,
                                       intent_type: &intent.intent_type,
                                       params: &intent.params,
                                       tenant_id: &intent.context.tenant_id,
                                       scope: intent.context.idempotency_scope() };
        let value = normalize_value(&serde_json::to_value(&input).unwrap_or_default());
        Self(hash_str(&to_canonical_json(&value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
