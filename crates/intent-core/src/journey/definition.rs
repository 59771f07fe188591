//! Definición de journeys: DAG de steps validado al componer.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::JourneyError;
use crate::hashing::{hash_str, normalize_value, to_canonical_json};
use crate::model::Params;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub intent_type: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Params estáticos; pisan a los params de la journey con la misma clave.
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, intent_type: impl Into<String>) -> Self {
        Self { name: name.into(),
               intent_type: intent_type.into(),
               depends_on: Vec::new(),
               params: Params::new(),
               max_attempts: None }
    }

    pub fn after<I, S>(mut self, deps: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }
}

/// Journey validada. Inmutable una vez construida.
#[derive(Debug, Clone, PartialEq)]
pub struct JourneyDefinition {
    journey_id: String,
    steps: IndexMap<String, StepSpec>,
    topo_order: Vec<String>,
    definition_hash: String,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.chars().any(char::is_whitespace)
}

impl JourneyDefinition {
    /// Valida nombres, dependencias y ausencia de ciclos.
    pub fn new(journey_id: impl Into<String>, specs: Vec<StepSpec>) -> Result<Self, JourneyError> {
        let journey_id = journey_id.into();
        if !valid_name(&journey_id) {
            return Err(JourneyError::InvalidName(journey_id));
        }
        if specs.is_empty() {
            return Err(JourneyError::Empty(journey_id));
        }
        let mut steps = IndexMap::with_capacity(specs.len());
        for spec in specs {
            if !valid_name(&spec.name) {
                return Err(JourneyError::InvalidName(spec.name));
            }
            if steps.contains_key(&spec.name) {
                return Err(JourneyError::DuplicateStep { journey: journey_id,
                                                         step: spec.name });
            }
            steps.insert(spec.name.clone(), spec);
        }
        for spec in steps.values() {
            if let Some(dep) = spec.depends_on.iter().find(|d| !steps.contains_key(*d)) {
                return Err(JourneyError::UnknownDependency { step: spec.name.clone(),
                                                             dependency: dep.clone() });
            }
        }
        let topo_order = topo_sort(&journey_id, &steps)?;
        let definition_hash = hash_definition(&journey_id, &steps);
        Ok(Self { journey_id,
                  steps,
                  topo_order,
                  definition_hash })
    }

    pub fn journey_id(&self) -> &str {
        &self.journey_id
    }

    pub fn definition_hash(&self) -> &str {
        &self.definition_hash
    }

    pub fn step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.get(name)
    }

    /// Steps en orden de declaración.
    pub fn steps(&self) -> impl Iterator<Item = &StepSpec> {
        self.steps.values()
    }

    /// Orden topológico estable (empates por orden de declaración).
    pub fn topo_order(&self) -> &[String] {
        &self.topo_order
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Todos los steps que dependen, directa o indirectamente, de `name`.
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(cur) = queue.pop_front() {
            for spec in self.steps.values() {
                if spec.depends_on.iter().any(|d| *d == cur) && out.insert(spec.name.clone()) {
                    queue.push_back(spec.name.clone());
                }
            }
        }
        out
    }
}

/// Kahn; lo que queda sin procesar forma (o alcanza) un ciclo.
fn topo_sort(journey_id: &str, steps: &IndexMap<String, StepSpec>) -> Result<Vec<String>, JourneyError> {
    let mut indegree: IndexMap<&str, usize> = steps.values()
                                                   .map(|s| {
                                                       let unique: BTreeSet<&String> = s.depends_on.iter().collect();
                                                       (s.name.as_str(), unique.len())
                                                   })
                                                   .collect();
    let mut order = Vec::with_capacity(steps.len());
    loop {
        let ready: Vec<&str> = indegree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| *n).collect();
        if ready.is_empty() {
            break;
        }
        for name in ready {
            indegree.shift_remove(name);
            order.push(name.to_string());
            for spec in steps.values() {
                if spec.depends_on.iter().any(|d| d == name) {
                    if let Some(d) = indegree.get_mut(spec.name.as_str()) {
                        *d -= 1;
                    }
                }
            }
        }
    }
    if !indegree.is_empty() {
        return Err(JourneyError::Cycle { journey: journey_id.to_string(),
                                         steps: indegree.keys().map(|s| s.to_string()).collect() });
    }
    Ok(order)
}

fn hash_definition(journey_id: &str, steps: &IndexMap<String, StepSpec>) -> String {
    let body: BTreeMap<&str, Value> =
        steps.values()
             .map(|s| {
                 let deps: BTreeSet<&String> = s.depends_on.iter().collect();
                 (s.name.as_str(),
                  json!({ "intent_type": s.intent_type,
                          "depends_on": deps,
                          "params": s.params,
                          "max_attempts": s.max_attempts }))
             })
             .collect();
    let value = normalize_value(&json!({ "journey_id": journey_id, "steps": body }));
    hash_str(&to_canonical_json(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_steps() -> Vec<StepSpec> {
        vec![StepSpec::new("parse", "parse_document"),
             StepSpec::new("embed", "embed_document").after(["parse"]),
             StepSpec::new("match", "match_source_to_target").after(["embed"]),
             StepSpec::new("report", "synthesize_report").after(["match", "parse"]),]
    }

    #[test]
    fn topo_order_respects_dependencies() {
        let def = JourneyDefinition::new("onboarding", four_steps()).unwrap();
        assert_eq!(def.topo_order(), ["parse", "embed", "match", "report"]);
        assert_eq!(def.definition_hash().len(), 64);
        let deps = def.transitive_dependents("embed");
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec!["match", "report"]);
    }

    #[test]
    fn cycles_are_rejected_at_composition() {
        let steps = vec![StepSpec::new("a", "x").after(["c"]),
                         StepSpec::new("b", "x").after(["a"]),
                         StepSpec::new("c", "x").after(["b"]),
                         StepSpec::new("d", "x"),];
        match JourneyDefinition::new("j", steps) {
            Err(JourneyError::Cycle { steps, .. }) => assert_eq!(steps, vec!["a", "b", "c"]),
            other => panic!("unexpected {other:?}"),
        }
        let self_loop = vec![StepSpec::new("a", "x").after(["a"])];
        assert!(matches!(JourneyDefinition::new("j", self_loop), Err(JourneyError::Cycle { .. })));
    }

    #[test]
    fn structural_errors() {
        assert!(matches!(JourneyDefinition::new("j", vec![]), Err(JourneyError::Empty(_))));
        let dup = vec![StepSpec::new("a", "x"), StepSpec::new("a", "y")];
        assert!(matches!(JourneyDefinition::new("j", dup), Err(JourneyError::DuplicateStep { .. })));
        let unknown = vec![StepSpec::new("a", "x").after(["ghost"])];
        assert!(matches!(JourneyDefinition::new("j", unknown), Err(JourneyError::UnknownDependency { .. })));
        let bad = vec![StepSpec::new("a/b", "x")];
        assert!(matches!(JourneyDefinition::new("j", bad), Err(JourneyError::InvalidName(_))));
    }

    #[test]
    fn hash_ignores_declaration_order_but_not_content() {
        let a = JourneyDefinition::new("j", four_steps()).unwrap();
        let mut reversed = four_steps();
        reversed.reverse();
        let b = JourneyDefinition::new("j", reversed).unwrap();
        assert_eq!(a.definition_hash(), b.definition_hash());

        let mut changed = four_steps();
        changed[0] = StepSpec::new("parse", "parse_document").with_param("lang", json!("es"));
        let c = JourneyDefinition::new("j", changed).unwrap();
        assert_ne!(a.definition_hash(), c.definition_hash());
    }
}
