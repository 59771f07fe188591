use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::IntentHandler;
use crate::errors::IntentError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("intent type '{0}' already registered")]
    Duplicate(String),
    #[error("invalid intent type name '{0}'")]
    InvalidName(String),
    #[error("unknown intent type '{0}'")]
    NotFound(String),
}

impl From<RegistryError> for IntentError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Duplicate(_) => IntentError::Conflict(e.to_string()),
            RegistryError::InvalidName(_) => IntentError::Validation(e.to_string()),
            RegistryError::NotFound(_) => IntentError::NotFound(e.to_string()),
        }
    }
}

/// Tabla intent type -> handler.
///
/// Se llena en el arranque con `&mut self` y luego se comparte como
/// `Arc<HandlerRegistry>`, por lo que no hay re-registro durante la
/// ejecución.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn IntentHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").field("intent_types", &self.intent_types()).finish()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, intent_type: &str, handler: H) -> Result<(), RegistryError>
        where H: IntentHandler + 'static
    {
        self.register_arc(intent_type, Arc::new(handler))
    }

    pub fn register_arc(&mut self, intent_type: &str, handler: Arc<dyn IntentHandler>) -> Result<(), RegistryError> {
        if !valid_name(intent_type) {
            return Err(RegistryError::InvalidName(intent_type.to_string()));
        }
        if self.handlers.contains_key(intent_type) {
            return Err(RegistryError::Duplicate(intent_type.to_string()));
        }
        log::debug!("registered handler for intent type '{}'", intent_type);
        self.handlers.insert(intent_type.to_string(), handler);
        Ok(())
    }

    pub fn resolve(&self, intent_type: &str) -> Result<Arc<dyn IntentHandler>, RegistryError> {
        self.handlers
            .get(intent_type)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(intent_type.to_string()))
    }

    pub fn contains(&self, intent_type: &str) -> bool {
        self.handlers.contains_key(intent_type)
    }

    pub fn intent_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Params;
    use crate::registry::{FnHandler, HandlerContext, HandlerOutput};
    use serde_json::json;

    fn noop() -> Arc<dyn IntentHandler> {
        Arc::new(FnHandler::new(&["x"], |_p: Params, _c: HandlerContext| async { Ok(HandlerOutput::new()) }))
    }

    #[test]
    fn duplicate_registration_is_a_conflict() {
        let mut reg = HandlerRegistry::new();
        reg.register_arc("parse", noop()).unwrap();
        let err = reg.register_arc("parse", noop()).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("parse".into()));
        assert!(matches!(IntentError::from(err), IntentError::Conflict(_)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unknown_type_is_not_found() {
        let reg = HandlerRegistry::new();
        let err = reg.resolve("nope").err().unwrap();
        assert!(matches!(IntentError::from(err), IntentError::NotFound(_)));
    }

    #[test]
    fn names_are_validated() {
        let mut reg = HandlerRegistry::new();
        assert!(matches!(reg.register_arc("", noop()), Err(RegistryError::InvalidName(_))));
        assert!(matches!(reg.register_arc("has space", noop()), Err(RegistryError::InvalidName(_))));
        reg.register_arc("match_source_to_target", noop()).unwrap();
        assert_eq!(reg.intent_types(), vec!["match_source_to_target"]);
    }

    #[test]
    fn default_validation_checks_required_params() {
        let h = noop();
        let ok = json!({"x": 1}).as_object().cloned().unwrap();
        let null = json!({"x": null}).as_object().cloned().unwrap();
        assert!(h.validate(&ok).is_ok());
        assert!(h.validate(&null).is_err());
        assert!(h.validate(&Params::new()).is_err());
    }
}
