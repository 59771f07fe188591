use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{Bool, Text};
use intent_core::artifact::{check_registrable, ArtifactError, ArtifactStore};
use intent_core::model::ProducedBy;
use intent_core::{Artifact, ArtifactId, LifecycleState};
use log::debug;
use serde_json::Value;

use super::{db_time, run_blocking, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::artifact_lineage::dsl as l;
use crate::schema::artifacts::dsl as a;

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::artifacts)]
struct NewArtifactRow<'a> {
    artifact_id: &'a str,
    artifact_type: &'a str,
    tenant_id: &'a str,
    lifecycle_state: &'a str,
    intent_type: &'a str,
    execution_id: &'a str,
    semantic_payload: &'a Value,
    created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::artifact_lineage)]
struct NewLineageRow<'a> {
    child_id: &'a str,
    parent_id: &'a str,
}

#[derive(Queryable, Debug)]
struct ArtifactRow {
    artifact_id: String,
    artifact_type: String,
    tenant_id: String,
    lifecycle_state: String,
    intent_type: String,
    execution_id: String,
    semantic_payload: Value,
    created_at: DateTime<Utc>,
    _reg_seq: i64,
}

impl ArtifactRow {
    fn into_artifact(self, parents: BTreeSet<ArtifactId>) -> Result<Artifact, PersistenceError> {
        let lifecycle_state = self.lifecycle_state.parse::<LifecycleState>().map_err(PersistenceError::CorruptRow)?;
        Ok(Artifact { id: ArtifactId(self.artifact_id),
                      artifact_type: self.artifact_type,
                      tenant_id: self.tenant_id,
                      lifecycle_state,
                      produced_by: ProducedBy { intent_type: self.intent_type,
                                                execution_id: self.execution_id },
                      parent_artifact_ids: parents,
                      semantic_payload: self.semantic_payload,
                      created_at: self.created_at })
    }
}

#[derive(QueryableByName, Debug)]
struct Reach {
    #[diesel(sql_type = Bool)]
    found: bool,
}

// ¿`$2` es `$1` o alguno de sus ancestros? Sigue también padres no registrados.
const REACHES_SQL: &str = "WITH RECURSIVE up(id) AS ( \
                               SELECT $1::text \
                               UNION \
                               SELECT l.parent_id FROM artifact_lineage l JOIN up ON l.child_id = up.id \
                           ) SELECT EXISTS (SELECT 1 FROM up WHERE id = $2) AS found";

/// Carga artifacts completos (con padres) respetando el orden de `ids`; los
/// ids sin fila se omiten.
fn load_artifacts(conn: &mut PgConnection, ids: &[String]) -> Result<Vec<Artifact>, PersistenceError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<ArtifactRow> = a::artifacts.filter(a::artifact_id.eq_any(ids)).load(conn)?;
    let edges: Vec<(String, String)> = l::artifact_lineage.filter(l::child_id.eq_any(ids))
                                                          .select((l::child_id, l::parent_id))
                                                          .load(conn)?;
    let mut parents: HashMap<String, BTreeSet<ArtifactId>> = HashMap::new();
    for (child, parent) in edges {
        parents.entry(child).or_default().insert(ArtifactId(parent));
    }
    let mut by_id: HashMap<String, ArtifactRow> = rows.into_iter().map(|r| (r.artifact_id.clone(), r)).collect();
    ids.iter()
       .filter_map(|id| by_id.remove(id))
       .map(|row| {
           let p = parents.remove(&row.artifact_id).unwrap_or_default();
           row.into_artifact(p)
       })
       .collect()
}

fn exists(conn: &mut PgConnection, id: &str) -> Result<bool, PersistenceError> {
    Ok(diesel::select(diesel::dsl::exists(a::artifacts.find(id))).get_result(conn)?)
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

/// BFS por el grafo de lineage; devuelve ids en orden de visita sin incluir
/// `start`. Padres en orden de id, hijos en orden de registro.
fn walk(conn: &mut PgConnection, start: &str, dir: Direction) -> Result<Vec<String>, PersistenceError> {
    let mut seen = HashSet::from([start.to_string()]);
    let mut queue = VecDeque::from([start.to_string()]);
    let mut out = Vec::new();
    while let Some(cur) = queue.pop_front() {
        let next: Vec<String> = match dir {
            Direction::Up => l::artifact_lineage.filter(l::child_id.eq(&cur))
                                                .select(l::parent_id)
                                                .order(l::parent_id.asc())
                                                .load(conn)?,
            Direction::Down => l::artifact_lineage.inner_join(a::artifacts)
                                                  .filter(l::parent_id.eq(&cur))
                                                  .order(a::reg_seq.asc())
                                                  .select(l::child_id)
                                                  .load(conn)?,
        };
        for id in next {
            if seen.insert(id.clone()) {
                out.push(id.clone());
                queue.push_back(id);
            }
        }
    }
    Ok(out)
}

/// Artifact store en Postgres.
pub struct PgArtifactStore<P: ConnectionProvider> {
    provider: Arc<P>,
}

impl<P: ConnectionProvider> PgArtifactStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider: Arc::new(provider) }
    }

    async fn traverse(&self, id: &ArtifactId, dir: Direction) -> Result<Vec<Artifact>, ArtifactError> {
        let start = id.as_str().to_string();
        let found = run_blocking(&self.provider, move |conn| {
                        if !exists(conn, &start)? {
                            return Ok(None);
                        }
                        let ids = walk(conn, &start, dir)?;
                        load_artifacts(conn, &ids).map(Some)
                    }).await?;
        found.ok_or_else(|| ArtifactError::NotFound(id.clone()))
    }
}

#[async_trait]
impl<P: ConnectionProvider> ArtifactStore for PgArtifactStore<P> {
    async fn register(&self, artifact: Artifact) -> Result<(), ArtifactError> {
        check_registrable(&artifact)?;
        let art = Artifact { created_at: db_time(artifact.created_at),
                             ..artifact };
        let id = art.id.clone();
        let result = run_blocking(&self.provider, move |conn| {
            conn.build_transaction().serializable().run::<_, PersistenceError, _>(|tx| {
                if exists(tx, art.id.as_str())? {
                    return Ok(Err(ArtifactError::Duplicate(art.id.clone())));
                }
                for parent in &art.parent_artifact_ids {
                    let reach: Reach = diesel::sql_query(REACHES_SQL).bind::<Text, _>(parent.as_str())
                                                                     .bind::<Text, _>(art.id.as_str())
                                                                     .get_result(tx)?;
                    if reach.found {
                        return Ok(Err(ArtifactError::Cycle { id: art.id.clone(),
                                                             via: parent.clone() }));
                    }
                }
                diesel::insert_into(a::artifacts).values(NewArtifactRow { artifact_id: art.id.as_str(),
                                                                           artifact_type: &art.artifact_type,
                                                                           tenant_id: &art.tenant_id,
                                                                           lifecycle_state:
                                                                               art.lifecycle_state.as_str(),
                                                                           intent_type: &art.produced_by.intent_type,
                                                                           execution_id: &art.produced_by.execution_id,
                                                                           semantic_payload: &art.semantic_payload,
                                                                           created_at: art.created_at })
                                                 .execute(tx)?;
                let edges: Vec<NewLineageRow<'_>> = art.parent_artifact_ids
                                                       .iter()
                                                       .map(|p| NewLineageRow { child_id: art.id.as_str(),
                                                                                parent_id: p.as_str() })
                                                       .collect();
                if !edges.is_empty() {
                    diesel::insert_into(l::artifact_lineage).values(&edges).execute(tx)?;
                }
                Ok(Ok(()))
            })
        }).await;
        match result {
            Ok(inner) => {
                if inner.is_ok() {
                    debug!("pg artifact registered id={}", id);
                }
                inner
            }
            // Dos registros concurrentes del mismo id: el perdedor choca con la PK.
            Err(PersistenceError::UniqueViolation(_)) => Err(ArtifactError::Duplicate(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &ArtifactId) -> Result<Artifact, ArtifactError> {
        let ids = vec![id.as_str().to_string()];
        let mut found = run_blocking(&self.provider, move |conn| load_artifacts(conn, &ids)).await?;
        found.pop().ok_or_else(|| ArtifactError::NotFound(id.clone()))
    }

    async fn transition(&self, id: &ArtifactId, to: LifecycleState) -> Result<Artifact, ArtifactError> {
        let target = id.clone();
        run_blocking(&self.provider, move |conn| {
            conn.build_transaction().read_write().run::<_, PersistenceError, _>(|tx| {
                let current: Option<String> = a::artifacts.find(target.as_str())
                                                          .select(a::lifecycle_state)
                                                          .for_update()
                                                          .first(tx)
                                                          .optional()?;
                let Some(current) = current else {
                    return Ok(Err(ArtifactError::NotFound(target.clone())));
                };
                let from = current.parse::<LifecycleState>().map_err(PersistenceError::CorruptRow)?;
                if !from.can_transition_to(to) {
                    return Ok(Err(ArtifactError::InvalidTransition { id: target.clone(),
                                                                     from,
                                                                     to }));
                }
                diesel::update(a::artifacts.find(target.as_str())).set(a::lifecycle_state.eq(to.as_str()))
                                                                   .execute(tx)?;
                let mut updated = load_artifacts(tx, &[target.as_str().to_string()])?;
                Ok(updated.pop().ok_or_else(|| ArtifactError::NotFound(target.clone())))
            })
        }).await?
    }

    async fn ancestors(&self, id: &ArtifactId) -> Result<Vec<Artifact>, ArtifactError> {
        self.traverse(id, Direction::Up).await
    }

    async fn descendants(&self, id: &ArtifactId) -> Result<Vec<Artifact>, ArtifactError> {
        self.traverse(id, Direction::Down).await
    }

    async fn list_by_execution(&self, execution_id: &str) -> Result<Vec<Artifact>, ArtifactError> {
        let exec = execution_id.to_string();
        Ok(run_blocking(&self.provider, move |conn| {
               let ids: Vec<String> = a::artifacts.filter(a::execution_id.eq(&exec))
                                                  .order(a::reg_seq.asc())
                                                  .select(a::artifact_id)
                                                  .load(conn)?;
               load_artifacts(conn, &ids)
           }).await?)
    }
}
