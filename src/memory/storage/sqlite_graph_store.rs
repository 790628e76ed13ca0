//! `SQLite` graph store.
//!
//! Nodes and links live in two plain tables. The fulltext index is an FTS5 table over
//! node names and the vector index is a `sqlite-vec` `vec0` table keyed by the node
//! rowid. Timestamps are stored as fixed-width RFC 3339 text so temporal filters can
//! compare them as strings.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use tokio_rusqlite::Connection;

use crate::memory::core::config::{GraphMemoryConfig, VectorIndexConfig};
use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::ids::{GroupId, LinkId, ObjectId};
use crate::memory::core::link::MemoryLink;
use crate::memory::core::object::MemoryObject;
use crate::memory::core::time;
use crate::memory::embedding::cosine_similarity;
use crate::memory::ingest::dedupe::normalize_name;
use crate::memory::storage::graph_store::{
    DeleteOutcome, GraphCounts, GraphStore, ScoredObject, StoreFuture,
};
use crate::memory::storage::sqlite_vec_loader::init_sqlite_vec_extension;

const OBJECT_COLUMNS: &str = "o.uuid, o.name, o.embedding, o.summary, o.group_id, o.labels, o.created_at";
const LINK_COLUMNS: &str = "uuid, source_node_uuid, target_node_uuid, relation_type, description, \
     description_embedding, valid_at, invalid_at, created_at, sources, group_id";

#[derive(Clone, Debug)]
struct Tables {
    objects: String,
    links: String,
    fts: String,
    vectors: String,
}

impl Tables {
    fn new(prefix: &str) -> Self {
        Self {
            objects: format!("{prefix}_objects"),
            links: format!("{prefix}_links"),
            fts: format!("{prefix}_objects_fts"),
            vectors: format!("{prefix}_object_vectors"),
        }
    }
}

/// `SQLite` implementation of [`GraphStore`].
pub struct SqliteGraphStore {
    conn: Connection,
    tables: Tables,
    ndims: usize,
    index: VectorIndexConfig,
}

impl SqliteGraphStore {
    /// Open (or create) the store described by `config` and ensure its indexes.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the schema cannot be created.
    pub async fn open(config: &GraphMemoryConfig) -> MemoryResult<Self> {
        init_sqlite_vec_extension();
        let conn = Connection::open(&config.storage.sqlite_path).await?;
        let store = Self {
            conn,
            tables: Tables::new(&config.storage.table_prefix),
            ndims: config.embedding.ndims,
            index: config.vector_index.clone(),
        };
        store.create_schema().await?;
        store.ensure_indexes().await?;
        tracing::info!(
            path = %Path::new(&config.storage.sqlite_path).display(),
            "Graph store opened"
        );
        Ok(store)
    }

    /// Open an in-memory store (tests, ephemeral runs).
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory(ndims: usize) -> MemoryResult<Self> {
        init_sqlite_vec_extension();
        let conn = Connection::open_in_memory().await?;
        let store = Self {
            conn,
            tables: Tables::new("memory"),
            ndims,
            index: VectorIndexConfig::default(),
        };
        store.create_schema().await?;
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> MemoryResult<()> {
        let t = self.tables.clone();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {objects} (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        uuid TEXT NOT NULL UNIQUE,
                        name TEXT NOT NULL,
                        name_key TEXT NOT NULL,
                        embedding TEXT,
                        summary TEXT NOT NULL DEFAULT '',
                        group_id TEXT NOT NULL,
                        labels TEXT NOT NULL DEFAULT '[]',
                        created_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS {objects}_group_name ON {objects}(group_id, name_key);
                    CREATE TABLE IF NOT EXISTS {links} (
                        uuid TEXT PRIMARY KEY,
                        source_node_uuid TEXT NOT NULL,
                        target_node_uuid TEXT NOT NULL,
                        relation_type TEXT NOT NULL,
                        description TEXT NOT NULL,
                        description_embedding TEXT,
                        valid_at TEXT,
                        invalid_at TEXT,
                        created_at TEXT NOT NULL,
                        sources TEXT NOT NULL DEFAULT '[]',
                        group_id TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS {links}_source ON {links}(group_id, source_node_uuid);
                    CREATE INDEX IF NOT EXISTS {links}_target ON {links}(group_id, target_node_uuid);",
                    objects = t.objects,
                    links = t.links,
                ))?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// FTS5 query matching any token of `text`; `None` when there is nothing to match.
fn fts_query(text: &str) -> Option<String> {
    let tokens: Vec<String> = normalize_name(text)
        .split_whitespace()
        .map(|token| format!("\"{token}\""))
        .collect();
    (!tokens.is_empty()).then(|| tokens.join(" OR "))
}

#[allow(clippy::cast_possible_truncation)]
const fn to_score(value: f64) -> f32 {
    value as f32
}

fn vector_json(embedding: Option<&[f32]>) -> MemoryResult<Option<String>> {
    embedding.map(serde_json::to_string).transpose().map_err(MemoryError::from)
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        serde_json::from_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    time::from_storage(&raw).ok_or_else(|| rusqlite::Error::InvalidColumnType(idx, raw, Type::Text))
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        time::from_storage(&raw).ok_or_else(|| rusqlite::Error::InvalidColumnType(idx, raw, Type::Text))
    })
    .transpose()
}

fn object_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryObject> {
    Ok(MemoryObject {
        uuid: row.get(0)?,
        name: row.get(1)?,
        embedding: optional_json_column(row, 2)?,
        summary: row.get(3)?,
        group_id: row.get(4)?,
        labels: json_column(row, 5)?,
        created_at: time_column(row, 6)?,
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryLink> {
    Ok(MemoryLink {
        uuid: row.get(0)?,
        source_node_uuid: row.get(1)?,
        target_node_uuid: row.get(2)?,
        relation_type: row.get(3)?,
        description: row.get(4)?,
        description_embedding: optional_json_column(row, 5)?,
        valid_at: optional_time_column(row, 6)?,
        invalid_at: optional_time_column(row, 7)?,
        created_at: time_column(row, 8)?,
        sources: json_column(row, 9)?,
        group_id: row.get(10)?,
    })
}

fn union_labels(stored: &str, incoming: &[String]) -> Vec<String> {
    let mut labels: Vec<String> = serde_json::from_str(stored).unwrap_or_default();
    for label in incoming {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    labels
}

fn union_sources(stored: &str, incoming: &[String]) -> Vec<String> {
    let mut sources: Vec<String> = serde_json::from_str(stored).unwrap_or_default();
    for source in incoming {
        if !sources.contains(source) {
            sources.push(source.clone());
        }
    }
    sources
}

struct ObjectRow {
    uuid: ObjectId,
    name: String,
    name_key: String,
    embedding: Option<String>,
    vector_ok: bool,
    summary: String,
    labels: Vec<String>,
    created_at: String,
}

struct LinkRow {
    uuid: LinkId,
    source: ObjectId,
    target: ObjectId,
    relation_type: String,
    description: String,
    embedding: Option<String>,
    valid_at: Option<String>,
    invalid_at: Option<String>,
    created_at: String,
    sources: Vec<String>,
}

impl SqliteGraphStore {
    fn object_rows(&self, group: &GroupId, objects: &[MemoryObject]) -> MemoryResult<Vec<ObjectRow>> {
        objects
            .iter()
            .map(|object| {
                object.validate()?;
                if &object.group_id != group {
                    return Err(MemoryError::InvalidGraphData(format!(
                        "object {} belongs to group {}, not {group}",
                        object.uuid, object.group_id
                    )));
                }
                let vector_ok = object
                    .embedding
                    .as_ref()
                    .is_some_and(|e| e.len() == self.ndims);
                if object.embedding.is_some() && !vector_ok {
                    tracing::warn!(
                        uuid = %object.uuid,
                        expected = self.ndims,
                        "Embedding dimension mismatch; node not added to vector index"
                    );
                }
                Ok(ObjectRow {
                    uuid: object.uuid,
                    name: object.name.clone(),
                    name_key: normalize_name(&object.name),
                    embedding: vector_json(object.embedding.as_deref())?,
                    vector_ok,
                    summary: object.summary.clone(),
                    labels: object.labels.clone(),
                    created_at: time::to_storage(&object.created_at),
                })
            })
            .collect()
    }

    fn link_rows(group: &GroupId, links: &[MemoryLink]) -> MemoryResult<Vec<LinkRow>> {
        links
            .iter()
            .map(|link| {
                link.validate()?;
                if &link.group_id != group {
                    return Err(MemoryError::InvalidGraphData(format!(
                        "link {} belongs to group {}, not {group}",
                        link.uuid, link.group_id
                    )));
                }
                Ok(LinkRow {
                    uuid: link.uuid,
                    source: link.source_node_uuid,
                    target: link.target_node_uuid,
                    relation_type: link.relation_type.clone(),
                    description: link.description.clone(),
                    embedding: vector_json(link.description_embedding.as_deref())?,
                    valid_at: link.valid_at.as_ref().map(time::to_storage),
                    invalid_at: link.invalid_at.as_ref().map(time::to_storage),
                    created_at: time::to_storage(&link.created_at),
                    sources: link.sources.iter().map(ToString::to_string).collect(),
                })
            })
            .collect()
    }
}

impl GraphStore for SqliteGraphStore {
    fn ensure_indexes(&self) -> StoreFuture<'_, MemoryResult<()>> {
        Box::pin(async move {
            let t = self.tables.clone();
            let ndims = self.ndims;
            self.conn
                .call(move |conn| {
                    conn.execute_batch(&format!(
                        "CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5(uuid UNINDEXED, group_id UNINDEXED, name);
                         CREATE VIRTUAL TABLE IF NOT EXISTS {vectors} USING vec0(embedding float[{ndims}] distance_metric=cosine);",
                        fts = t.fts,
                        vectors = t.vectors,
                    ))?;
                    Ok(())
                })
                .await?;
            tracing::info!(
                ndims,
                metric = ?self.index.metric,
                m = self.index.m,
                ef_construction = self.index.ef_construction,
                "Fulltext and vector indexes ready"
            );
            Ok(())
        })
    }

    fn upsert_graph<'a>(
        &'a self,
        group: &'a GroupId,
        objects: &'a [MemoryObject],
        links: &'a [MemoryLink],
    ) -> StoreFuture<'a, MemoryResult<()>> {
        Box::pin(async move {
            let object_rows = self.object_rows(group, objects)?;
            let link_rows = Self::link_rows(group, links)?;
            let t = self.tables.clone();
            let group = group.clone();

            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;

                    for row in &object_rows {
                        let stored_labels: Option<String> = tx
                            .query_row(
                                &format!("SELECT labels FROM {} WHERE uuid = ?1", t.objects),
                                params![row.uuid],
                                |r| r.get(0),
                            )
                            .optional()?;
                        let labels = union_labels(stored_labels.as_deref().unwrap_or("[]"), &row.labels);
                        let labels = serde_json::to_string(&labels)
                            .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;

                        tx.execute(
                            &format!(
                                "INSERT INTO {objects} (uuid, name, name_key, embedding, summary, group_id, labels, created_at)
                                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                                 ON CONFLICT(uuid) DO UPDATE SET
                                    name = excluded.name,
                                    name_key = excluded.name_key,
                                    embedding = COALESCE(excluded.embedding, embedding),
                                    summary = CASE WHEN excluded.summary = '' THEN summary ELSE excluded.summary END,
                                    labels = excluded.labels",
                                objects = t.objects
                            ),
                            params![
                                row.uuid,
                                row.name,
                                row.name_key,
                                row.embedding,
                                row.summary,
                                group,
                                labels,
                                row.created_at
                            ],
                        )?;

                        let rowid: i64 = tx.query_row(
                            &format!("SELECT id FROM {} WHERE uuid = ?1", t.objects),
                            params![row.uuid],
                            |r| r.get(0),
                        )?;

                        tx.execute(&format!("DELETE FROM {} WHERE uuid = ?1", t.fts), params![row.uuid])?;
                        tx.execute(
                            &format!("INSERT INTO {} (uuid, group_id, name) VALUES (?1, ?2, ?3)", t.fts),
                            params![row.uuid, group, row.name],
                        )?;

                        if row.vector_ok {
                            tx.execute(&format!("DELETE FROM {} WHERE rowid = ?1", t.vectors), params![rowid])?;
                            tx.execute(
                                &format!("INSERT INTO {} (rowid, embedding) VALUES (?1, ?2)", t.vectors),
                                params![rowid, row.embedding],
                            )?;
                        }
                    }

                    for row in &link_rows {
                        let expected = if row.source == row.target { 1 } else { 2 };
                        let found: i64 = tx.query_row(
                            &format!(
                                "SELECT COUNT(*) FROM {} WHERE group_id = ?1 AND uuid IN (?2, ?3)",
                                t.objects
                            ),
                            params![group, row.source, row.target],
                            |r| r.get(0),
                        )?;
                        if found != expected {
                            return Ok(Err(format!(
                                "link {} references a node missing from group {group}",
                                row.uuid
                            )));
                        }

                        let stored_sources: Option<String> = tx
                            .query_row(
                                &format!("SELECT sources FROM {} WHERE uuid = ?1", t.links),
                                params![row.uuid],
                                |r| r.get(0),
                            )
                            .optional()?;
                        let sources = union_sources(stored_sources.as_deref().unwrap_or("[]"), &row.sources);
                        let sources = serde_json::to_string(&sources)
                            .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;

                        tx.execute(
                            &format!(
                                "INSERT INTO {links} ({LINK_COLUMNS})
                                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                                 ON CONFLICT(uuid) DO UPDATE SET
                                    relation_type = excluded.relation_type,
                                    description = excluded.description,
                                    description_embedding = COALESCE(excluded.description_embedding, description_embedding),
                                    valid_at = COALESCE(excluded.valid_at, valid_at),
                                    invalid_at = CASE
                                        WHEN excluded.invalid_at IS NOT NULL
                                         AND (COALESCE(excluded.valid_at, valid_at) IS NULL
                                              OR excluded.invalid_at >= COALESCE(excluded.valid_at, valid_at))
                                        THEN excluded.invalid_at
                                        WHEN invalid_at IS NOT NULL
                                         AND (COALESCE(excluded.valid_at, valid_at) IS NULL
                                              OR invalid_at >= COALESCE(excluded.valid_at, valid_at))
                                        THEN invalid_at
                                        ELSE NULL END,
                                    sources = excluded.sources",
                                links = t.links
                            ),
                            params![
                                row.uuid,
                                row.source,
                                row.target,
                                row.relation_type,
                                row.description,
                                row.embedding,
                                row.valid_at,
                                row.invalid_at,
                                row.created_at,
                                sources,
                                group
                            ],
                        )?;
                    }

                    tx.commit()?;
                    Ok(Ok(()))
                })
                .await?;

            outcome.map_err(MemoryError::InvalidGraphData)
        })
    }

    fn find_candidates<'a>(
        &'a self,
        group: &'a GroupId,
        names: &'a [String],
        limit_per_name: usize,
    ) -> StoreFuture<'a, MemoryResult<Vec<MemoryObject>>> {
        Box::pin(async move {
            let t = self.tables.clone();
            let group = group.clone();
            let lookups: Vec<(String, Option<String>)> = names
                .iter()
                .map(|name| (normalize_name(name), fts_query(name)))
                .collect();
            let limit = i64::try_from(limit_per_name).unwrap_or(i64::MAX);

            let candidates = self
                .conn
                .call(move |conn| {
                    let mut seen = HashSet::new();
                    let mut out = Vec::new();

                    let mut exact = conn.prepare(&format!(
                        "SELECT {OBJECT_COLUMNS} FROM {} o WHERE o.group_id = ?1 AND o.name_key = ?2",
                        t.objects
                    ))?;
                    let mut fulltext = conn.prepare(&format!(
                        "SELECT {OBJECT_COLUMNS} FROM {fts} JOIN {objects} o ON o.uuid = {fts}.uuid
                         WHERE {fts} MATCH ?1 AND {fts}.group_id = ?2
                         ORDER BY bm25({fts}) LIMIT ?3",
                        fts = t.fts,
                        objects = t.objects
                    ))?;

                    for (key, query) in &lookups {
                        let rows = exact.query_map(params![group, key], object_from_row)?;
                        for object in rows {
                            let object = object?;
                            if seen.insert(object.uuid) {
                                out.push(object);
                            }
                        }

                        if let Some(query) = query {
                            let rows = fulltext.query_map(params![query, group, limit], object_from_row)?;
                            for object in rows {
                                let object = object?;
                                if seen.insert(object.uuid) {
                                    out.push(object);
                                }
                            }
                        }
                    }

                    Ok(out)
                })
                .await?;

            Ok(candidates)
        })
    }

    fn get_object<'a>(
        &'a self,
        group: &'a GroupId,
        uuid: ObjectId,
    ) -> StoreFuture<'a, MemoryResult<Option<MemoryObject>>> {
        Box::pin(async move {
            let t = self.tables.clone();
            let group = group.clone();
            let object = self
                .conn
                .call(move |conn| {
                    let object = conn
                        .query_row(
                            &format!(
                                "SELECT {OBJECT_COLUMNS} FROM {} o WHERE o.group_id = ?1 AND o.uuid = ?2",
                                t.objects
                            ),
                            params![group, uuid],
                            object_from_row,
                        )
                        .optional()?;
                    Ok(object)
                })
                .await?;
            Ok(object)
        })
    }

    fn find_object_by_name<'a>(
        &'a self,
        group: &'a GroupId,
        name: &'a str,
    ) -> StoreFuture<'a, MemoryResult<Option<MemoryObject>>> {
        Box::pin(async move {
            let t = self.tables.clone();
            let group = group.clone();
            let name = name.trim().to_string();
            let key = normalize_name(&name);
            let object = self
                .conn
                .call(move |conn| {
                    // Exact (case-insensitive) spelling first, then the normalized key.
                    let object = conn
                        .query_row(
                            &format!(
                                "SELECT {OBJECT_COLUMNS} FROM {} o
                                 WHERE o.group_id = ?1 AND (lower(o.name) = lower(?2) OR o.name_key = ?3)
                                 ORDER BY (lower(o.name) = lower(?2)) DESC, o.id ASC LIMIT 1",
                                t.objects
                            ),
                            params![group, name, key],
                            object_from_row,
                        )
                        .optional()?;
                    Ok(object)
                })
                .await?;
            Ok(object)
        })
    }

    fn fulltext_search<'a>(
        &'a self,
        group: &'a GroupId,
        query: &'a str,
        limit: usize,
    ) -> StoreFuture<'a, MemoryResult<Vec<ScoredObject>>> {
        Box::pin(async move {
            let Some(fts_query) = fts_query(query) else {
                return Ok(Vec::new());
            };
            let t = self.tables.clone();
            let group = group.clone();
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);

            let results = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT o.uuid, o.name, o.summary, -bm25({fts}) AS score
                         FROM {fts} JOIN {objects} o ON o.uuid = {fts}.uuid
                         WHERE {fts} MATCH ?1 AND {fts}.group_id = ?2
                         ORDER BY score DESC LIMIT ?3",
                        fts = t.fts,
                        objects = t.objects
                    ))?;
                    let rows = stmt.query_map(params![fts_query, group, limit], |row| {
                        let score: f64 = row.get(3)?;
                        Ok(ScoredObject {
                            uuid: row.get(0)?,
                            name: row.get(1)?,
                            summary: row.get(2)?,
                            score: to_score(score),
                        })
                    })?;
                    Ok(rows.collect::<Result<Vec<_>, _>>()?)
                })
                .await?;
            Ok(results)
        })
    }

    fn vector_search<'a>(
        &'a self,
        group: &'a GroupId,
        embedding: &'a [f32],
        limit: usize,
        min_score: f32,
        use_index: bool,
    ) -> StoreFuture<'a, MemoryResult<Vec<ScoredObject>>> {
        Box::pin(async move {
            if embedding.len() != self.ndims {
                return Err(MemoryError::InvalidGraphData(format!(
                    "query embedding has {} dims, index has {}",
                    embedding.len(),
                    self.ndims
                )));
            }

            let t = self.tables.clone();
            let group = group.clone();

            if use_index {
                let query = serde_json::to_string(embedding)?;
                // The KNN runs before the partition filter, so ask for more neighbours.
                let k = limit.saturating_mul(4).max(limit);
                let k_param = i64::try_from(k).unwrap_or(i64::MAX);
                let (t, group) = (t.clone(), group.clone());
                let neighbours = self
                    .conn
                    .call(move |conn| {
                        let mut stmt = conn.prepare(&format!(
                            "WITH knn AS (
                                SELECT rowid, distance FROM {vectors} WHERE embedding MATCH ?1 AND k = ?2
                             )
                             SELECT o.uuid, o.name, o.summary, knn.distance, o.group_id = ?3
                             FROM knn JOIN {objects} o ON o.id = knn.rowid
                             ORDER BY knn.distance ASC",
                            vectors = t.vectors,
                            objects = t.objects
                        ))?;
                        let rows = stmt.query_map(params![query, k_param, group], |row| {
                            let distance: f64 = row.get(3)?;
                            let in_group: bool = row.get(4)?;
                            let hit = ScoredObject {
                                uuid: row.get(0)?,
                                name: row.get(1)?,
                                summary: row.get(2)?,
                                score: to_score(1.0 - distance),
                            };
                            Ok((hit, in_group))
                        })?;
                        Ok(rows.collect::<Result<Vec<_>, _>>()?)
                    })
                    .await?;

                let saturated = neighbours.len() >= k
                    && neighbours.last().is_some_and(|(hit, _)| hit.score >= min_score);
                let hits: Vec<ScoredObject> = neighbours
                    .into_iter()
                    .filter(|(hit, in_group)| *in_group && hit.score >= min_score)
                    .map(|(hit, _)| hit)
                    .take(limit)
                    .collect();
                if hits.len() >= limit || !saturated {
                    return Ok(hits);
                }
                tracing::debug!(
                    found = hits.len(),
                    limit, "Indexed neighbours crowded out by other groups; scanning the group"
                );
            }

            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT uuid, name, summary, embedding FROM {}
                         WHERE group_id = ?1 AND embedding IS NOT NULL",
                        t.objects
                    ))?;
                    let rows = stmt.query_map(params![group], |row| {
                        let uuid: ObjectId = row.get(0)?;
                        let name: String = row.get(1)?;
                        let summary: String = row.get(2)?;
                        let vector: Vec<f32> = json_column(row, 3)?;
                        Ok((uuid, name, summary, vector))
                    })?;
                    Ok(rows.collect::<Result<Vec<_>, _>>()?)
                })
                .await?;

            let mut scored: Vec<ScoredObject> = rows
                .into_iter()
                .map(|(uuid, name, summary, vector)| ScoredObject {
                    uuid,
                    name,
                    summary,
                    score: cosine_similarity(embedding, &vector),
                })
                .filter(|r| r.score >= min_score)
                .collect();
            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            scored.truncate(limit);
            Ok(scored)
        })
    }

    fn traverse<'a>(
        &'a self,
        group: &'a GroupId,
        query: &'a str,
        max_hops: usize,
        as_of: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreFuture<'a, MemoryResult<Vec<ScoredObject>>> {
        Box::pin(async move {
            let key = normalize_name(query);
            if key.is_empty() {
                return Ok(Vec::new());
            }
            let t = self.tables.clone();
            let group = group.clone();
            let as_of = as_of.as_ref().map(time::to_storage);

            let results = self
                .conn
                .call(move |conn| {
                    let mut seeds = conn.prepare(&format!(
                        "SELECT uuid FROM {} WHERE group_id = ?1
                         AND (instr(' ' || ?2 || ' ', ' ' || name_key || ' ') > 0 OR instr(name_key, ?2) > 0)",
                        t.objects
                    ))?;
                    let seed_ids = seeds
                        .query_map(params![group, key], |row| row.get::<_, ObjectId>(0))?
                        .collect::<Result<Vec<_>, _>>()?;

                    let temporal = if as_of.is_some() {
                        " AND COALESCE(valid_at, created_at) <= ?3 AND (invalid_at IS NULL OR invalid_at > ?3)"
                    } else {
                        ""
                    };
                    let mut neighbours = conn.prepare(&format!(
                        "SELECT source_node_uuid, target_node_uuid FROM {} WHERE group_id = ?1
                         AND (source_node_uuid = ?2 OR target_node_uuid = ?2){temporal}",
                        t.links
                    ))?;

                    let mut hops: HashMap<ObjectId, usize> = HashMap::new();
                    let mut order: Vec<ObjectId> = Vec::new();
                    for seed in &seed_ids {
                        if hops.insert(*seed, 0).is_none() {
                            order.push(*seed);
                        }
                    }

                    let mut frontier = seed_ids;
                    for hop in 1..=max_hops {
                        let mut next = Vec::new();
                        for node in &frontier {
                            let pairs = match &as_of {
                                Some(at) => neighbours
                                    .query_map(params![group, node, at], |row| {
                                        Ok((row.get::<_, ObjectId>(0)?, row.get::<_, ObjectId>(1)?))
                                    })?
                                    .collect::<Result<Vec<_>, _>>()?,
                                None => neighbours
                                    .query_map(params![group, node], |row| {
                                        Ok((row.get::<_, ObjectId>(0)?, row.get::<_, ObjectId>(1)?))
                                    })?
                                    .collect::<Result<Vec<_>, _>>()?,
                            };
                            for (source, target) in pairs {
                                let other = if source == *node { target } else { source };
                                if !hops.contains_key(&other) {
                                    hops.insert(other, hop);
                                    order.push(other);
                                    next.push(other);
                                }
                            }
                        }
                        if next.is_empty() {
                            break;
                        }
                        frontier = next;
                    }

                    let mut details = conn.prepare(&format!(
                        "SELECT name, summary FROM {} WHERE group_id = ?1 AND uuid = ?2",
                        t.objects
                    ))?;
                    let mut out = Vec::with_capacity(order.len());
                    for uuid in order {
                        let hop = hops.get(&uuid).copied().unwrap_or(max_hops);
                        let found = details
                            .query_row(params![group, uuid], |row| {
                                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                            })
                            .optional()?;
                        if let Some((name, summary)) = found {
                            #[allow(clippy::cast_precision_loss)]
                            let score = 1.0 / (1.0 + hop as f32);
                            out.push(ScoredObject { uuid, name, summary, score });
                        }
                    }
                    Ok(out)
                })
                .await?;

            let mut results = results;
            results.sort_by(|a, b| b.score.total_cmp(&a.score));
            results.truncate(limit);
            Ok(results)
        })
    }

    fn find_current_link<'a>(
        &'a self,
        group: &'a GroupId,
        source: ObjectId,
        relation_type: &'a str,
        target: ObjectId,
    ) -> StoreFuture<'a, MemoryResult<Option<MemoryLink>>> {
        Box::pin(async move {
            let t = self.tables.clone();
            let group = group.clone();
            let relation_type = relation_type.trim().to_string();
            let link = self
                .conn
                .call(move |conn| {
                    let link = conn
                        .query_row(
                            &format!(
                                "SELECT {LINK_COLUMNS} FROM {} WHERE group_id = ?1
                                 AND source_node_uuid = ?2 AND target_node_uuid = ?3
                                 AND lower(relation_type) = lower(?4) AND invalid_at IS NULL
                                 ORDER BY created_at ASC LIMIT 1",
                                t.links
                            ),
                            params![group, source, target, relation_type],
                            link_from_row,
                        )
                        .optional()?;
                    Ok(link)
                })
                .await?;
            Ok(link)
        })
    }

    fn links_for<'a>(
        &'a self,
        group: &'a GroupId,
        uuid: ObjectId,
        current_only: bool,
    ) -> StoreFuture<'a, MemoryResult<Vec<MemoryLink>>> {
        Box::pin(async move {
            let t = self.tables.clone();
            let group = group.clone();
            let links = self
                .conn
                .call(move |conn| {
                    let current = if current_only { " AND invalid_at IS NULL" } else { "" };
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {LINK_COLUMNS} FROM {} WHERE group_id = ?1
                         AND (source_node_uuid = ?2 OR target_node_uuid = ?2){current}
                         ORDER BY created_at ASC",
                        t.links
                    ))?;
                    let rows = stmt.query_map(params![group, uuid], link_from_row)?;
                    Ok(rows.collect::<Result<Vec<_>, _>>()?)
                })
                .await?;
            Ok(links)
        })
    }

    fn invalidate_link<'a>(
        &'a self,
        group: &'a GroupId,
        uuid: LinkId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, MemoryResult<bool>> {
        Box::pin(async move {
            let t = self.tables.clone();
            let group = group.clone();
            let at = time::to_storage(&at);
            let changed = self
                .conn
                .call(move |conn| {
                    let changed = conn.execute(
                        &format!(
                            "UPDATE {} SET invalid_at = CASE
                                WHEN valid_at IS NOT NULL AND valid_at > ?1 THEN valid_at ELSE ?1 END
                             WHERE group_id = ?2 AND uuid = ?3 AND invalid_at IS NULL",
                            t.links
                        ),
                        params![at, group, uuid],
                    )?;
                    Ok(changed)
                })
                .await?;
            Ok(changed > 0)
        })
    }

    fn delete_object<'a>(
        &'a self,
        group: &'a GroupId,
        uuid: ObjectId,
        cascade: bool,
    ) -> StoreFuture<'a, MemoryResult<DeleteOutcome>> {
        Box::pin(async move {
            let t = self.tables.clone();
            let group = group.clone();
            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let rowid: Option<i64> = tx
                        .query_row(
                            &format!("SELECT id FROM {} WHERE group_id = ?1 AND uuid = ?2", t.objects),
                            params![group, uuid],
                            |r| r.get(0),
                        )
                        .optional()?;
                    let Some(rowid) = rowid else {
                        return Ok(DeleteOutcome::NotFound);
                    };

                    let links: i64 = tx.query_row(
                        &format!(
                            "SELECT COUNT(*) FROM {} WHERE group_id = ?1
                             AND (source_node_uuid = ?2 OR target_node_uuid = ?2)",
                            t.links
                        ),
                        params![group, uuid],
                        |r| r.get(0),
                    )?;
                    let links = usize::try_from(links).unwrap_or(0);
                    if links > 0 && !cascade {
                        return Ok(DeleteOutcome::HasLinks { links });
                    }

                    tx.execute(
                        &format!(
                            "DELETE FROM {} WHERE group_id = ?1
                             AND (source_node_uuid = ?2 OR target_node_uuid = ?2)",
                            t.links
                        ),
                        params![group, uuid],
                    )?;
                    tx.execute(&format!("DELETE FROM {} WHERE uuid = ?1", t.fts), params![uuid])?;
                    tx.execute(&format!("DELETE FROM {} WHERE rowid = ?1", t.vectors), params![rowid])?;
                    tx.execute(&format!("DELETE FROM {} WHERE id = ?1", t.objects), params![rowid])?;
                    tx.commit()?;
                    Ok(DeleteOutcome::Deleted { links_removed: links })
                })
                .await?;
            Ok(outcome)
        })
    }

    fn counts<'a>(&'a self, group: &'a GroupId) -> StoreFuture<'a, MemoryResult<GraphCounts>> {
        Box::pin(async move {
            let t = self.tables.clone();
            let group = group.clone();
            let (objects, links) = self
                .conn
                .call(move |conn| {
                    let objects: i64 = conn.query_row(
                        &format!("SELECT COUNT(*) FROM {} WHERE group_id = ?1", t.objects),
                        params![group],
                        |r| r.get(0),
                    )?;
                    let links: i64 = conn.query_row(
                        &format!("SELECT COUNT(*) FROM {} WHERE group_id = ?1", t.links),
                        params![group],
                        |r| r.get(0),
                    )?;
                    Ok((objects, links))
                })
                .await?;
            Ok(GraphCounts {
                objects: usize::try_from(objects).unwrap_or(0),
                links: usize::try_from(links).unwrap_or(0),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::memory::core::ids::EpisodeId;

    const DIMS: usize = 4;

    fn group() -> GroupId {
        GroupId::new("g1").unwrap()
    }

    async fn store() -> SqliteGraphStore {
        SqliteGraphStore::open_in_memory(DIMS).await.unwrap()
    }

    fn node(name: &str, embedding: [f32; DIMS]) -> MemoryObject {
        MemoryObject::new(group(), name)
            .unwrap()
            .with_label("Entity")
            .with_embedding(embedding.to_vec())
    }

    fn link(from: &MemoryObject, relation: &str, to: &MemoryObject) -> MemoryLink {
        MemoryLink::new(group(), from.uuid, to.uuid, relation, format!("{} {relation} {}", from.name, to.name))
            .unwrap()
    }

    #[test]
    fn fts_query_quotes_tokens() {
        assert_eq!(fts_query("Alice's \"Rust\" OR"), Some("\"alice\" OR \"s\" OR \"rust\" OR \"or\"".to_string()));
        assert_eq!(fts_query("  ?! "), None);
    }

    #[tokio::test]
    async fn upsert_twice_is_idempotent() {
        let store = store().await;
        let alice = node("Alice", [1.0, 0.0, 0.0, 0.0]);
        let rust = node("Rust", [0.0, 1.0, 0.0, 0.0]);
        let uses = link(&alice, "USES", &rust);
        let objects = vec![alice, rust];
        let links = vec![uses];

        store.upsert_graph(&group(), &objects, &links).await.unwrap();
        store.upsert_graph(&group(), &objects, &links).await.unwrap();

        let counts = store.counts(&group()).await.unwrap();
        assert_eq!(counts, GraphCounts { objects: 2, links: 1 });
    }

    #[tokio::test]
    async fn upsert_merges_labels_and_keeps_summary() {
        let store = store().await;
        let alice = node("Alice", [1.0, 0.0, 0.0, 0.0]).with_summary("Engineer.");
        store.upsert_graph(&group(), &[alice.clone()], &[]).await.unwrap();

        let mut again = alice.clone();
        again.labels = vec!["Person".to_string()];
        again.summary = String::new();
        store.upsert_graph(&group(), &[again], &[]).await.unwrap();

        let stored = store.get_object(&group(), alice.uuid).await.unwrap().unwrap();
        assert_eq!(stored.labels, vec!["Entity".to_string(), "Person".to_string()]);
        assert_eq!(stored.summary, "Engineer.");
    }

    #[tokio::test]
    async fn link_with_missing_endpoint_is_rejected() {
        let store = store().await;
        let alice = node("Alice", [1.0, 0.0, 0.0, 0.0]);
        let ghost = node("Ghost", [0.0, 1.0, 0.0, 0.0]);
        let dangling = link(&alice, "KNOWS", &ghost);

        let result = store.upsert_graph(&group(), &[alice], &[dangling]).await;
        assert!(matches!(result, Err(MemoryError::InvalidGraphData(_))));
        assert_eq!(store.counts(&group()).await.unwrap(), GraphCounts::default());
    }

    #[tokio::test]
    async fn link_sources_are_unioned() {
        let store = store().await;
        let a = node("A", [1.0, 0.0, 0.0, 0.0]);
        let b = node("B", [0.0, 1.0, 0.0, 0.0]);
        let first = EpisodeId::new();
        let second = EpisodeId::new();
        let edge = link(&a, "USES", &b).with_source(first);
        store.upsert_graph(&group(), &[a.clone(), b.clone()], &[edge.clone()]).await.unwrap();

        let mut replay = edge.clone();
        replay.sources = vec![second];
        store.upsert_graph(&group(), &[], &[replay]).await.unwrap();

        let stored = store.find_current_link(&group(), a.uuid, "uses", b.uuid).await.unwrap().unwrap();
        assert_eq!(stored.sources, vec![first, second]);
    }

    #[tokio::test]
    async fn merged_validity_never_ends_before_it_starts() {
        let store = store().await;
        let a = node("A", [1.0, 0.0, 0.0, 0.0]);
        let b = node("B", [0.0, 1.0, 0.0, 0.0]);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let edge = link(&a, "USES", &b).with_validity(Some(start), None);
        store.upsert_graph(&group(), &[a.clone(), b.clone()], &[edge.clone()]).await.unwrap();

        let replay = edge.clone().with_validity(None, Some(earlier));
        store.upsert_graph(&group(), &[], &[replay]).await.unwrap();

        let stored = store.links_for(&group(), a.uuid, false).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].valid_at, Some(start));
        assert_eq!(stored[0].invalid_at, None);

        let later = start + Duration::days(10);
        let closing = edge.with_validity(None, Some(later));
        store.upsert_graph(&group(), &[], &[closing]).await.unwrap();
        let stored = store.links_for(&group(), a.uuid, false).await.unwrap();
        assert_eq!(stored[0].valid_at, Some(start));
        assert_eq!(stored[0].invalid_at, Some(later));
    }

    #[tokio::test]
    async fn fulltext_and_candidates_are_partitioned() {
        let store = store().await;
        let other = GroupId::new("g2").unwrap();
        let alice = node("Alice Smith", [1.0, 0.0, 0.0, 0.0]);
        let foreign = MemoryObject::new(other.clone(), "Alice Jones").unwrap();
        store.upsert_graph(&group(), &[alice.clone()], &[]).await.unwrap();
        store.upsert_graph(&other, &[foreign], &[]).await.unwrap();

        let hits = store.fulltext_search(&group(), "alice", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].uuid, alice.uuid);

        let candidates = store
            .find_candidates(&group(), &["ALICE smith".to_string()], 5)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "Alice Smith");
    }

    #[tokio::test]
    async fn vector_search_indexed_and_exhaustive_agree() {
        let store = store().await;
        let near = node("Near", [1.0, 0.1, 0.0, 0.0]);
        let far = node("Far", [0.0, 0.0, 1.0, 0.0]);
        store.upsert_graph(&group(), &[near.clone(), far], &[]).await.unwrap();

        let query = [1.0, 0.0, 0.0, 0.0];
        let indexed = store.vector_search(&group(), &query, 5, 0.5, true).await.unwrap();
        let exhaustive = store.vector_search(&group(), &query, 5, 0.5, false).await.unwrap();

        assert_eq!(indexed.len(), 1);
        assert_eq!(exhaustive.len(), 1);
        assert_eq!(indexed[0].uuid, near.uuid);
        assert_eq!(exhaustive[0].uuid, near.uuid);
        assert!((indexed[0].score - exhaustive[0].score).abs() < 1e-3);
    }

    #[tokio::test]
    async fn indexed_search_is_not_starved_by_other_groups() {
        let store = store().await;
        let other = GroupId::new("g2").unwrap();
        let crowd: Vec<MemoryObject> = (0..6)
            .map(|i| {
                MemoryObject::new(other.clone(), format!("Crowd {i}"))
                    .unwrap()
                    .with_embedding(vec![1.0, 0.0, 0.0, 0.0])
            })
            .collect();
        store.upsert_graph(&other, &crowd, &[]).await.unwrap();
        let mine = node("Mine", [1.0, 0.3, 0.0, 0.0]);
        store.upsert_graph(&group(), &[mine.clone()], &[]).await.unwrap();

        let hits = store
            .vector_search(&group(), &[1.0, 0.0, 0.0, 0.0], 1, 0.5, true)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].uuid, mine.uuid);
    }

    #[tokio::test]
    async fn traversal_respects_as_of() {
        let store = store().await;
        let alice = node("Alice", [1.0, 0.0, 0.0, 0.0]);
        let acme = node("Acme", [0.0, 1.0, 0.0, 0.0]);
        let berlin = node("Berlin", [0.0, 0.0, 1.0, 0.0]);
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let works = link(&alice, "WORKS_AT", &acme).with_validity(Some(start), Some(end));
        let located = link(&acme, "LOCATED_IN", &berlin).with_validity(Some(start), None);
        store
            .upsert_graph(&group(), &[alice, acme.clone(), berlin.clone()], &[works, located])
            .await
            .unwrap();

        let all = store.traverse(&group(), "Where does Alice work?", 2, None, 10).await.unwrap();
        assert_eq!(all.len(), 3);

        let during = store
            .traverse(&group(), "alice", 2, Some(start + Duration::days(30)), 10)
            .await
            .unwrap();
        assert!(during.iter().any(|r| r.uuid == berlin.uuid));

        let after = store.traverse(&group(), "alice", 2, Some(end + Duration::days(1)), 10).await.unwrap();
        assert_eq!(after.len(), 1);
        assert!(after.iter().all(|r| r.uuid != acme.uuid));
    }

    #[tokio::test]
    async fn invalidation_hides_link_from_current_queries() {
        let store = store().await;
        let a = node("A", [1.0, 0.0, 0.0, 0.0]);
        let b = node("B", [0.0, 1.0, 0.0, 0.0]);
        let edge = link(&a, "USES", &b);
        store.upsert_graph(&group(), &[a.clone(), b.clone()], &[edge.clone()]).await.unwrap();

        assert!(store.invalidate_link(&group(), edge.uuid, Utc::now()).await.unwrap());
        assert!(!store.invalidate_link(&group(), edge.uuid, Utc::now()).await.unwrap());

        assert!(store.links_for(&group(), a.uuid, true).await.unwrap().is_empty());
        let history = store.links_for(&group(), a.uuid, false).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].invalid_at.is_some());
        assert!(store.find_current_link(&group(), a.uuid, "USES", b.uuid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_requires_cascade_when_linked() {
        let store = store().await;
        let a = node("A", [1.0, 0.0, 0.0, 0.0]);
        let b = node("B", [0.0, 1.0, 0.0, 0.0]);
        let edge = link(&a, "USES", &b);
        store.upsert_graph(&group(), &[a.clone(), b.clone()], &[edge]).await.unwrap();

        assert_eq!(
            store.delete_object(&group(), a.uuid, false).await.unwrap(),
            DeleteOutcome::HasLinks { links: 1 }
        );
        assert_eq!(
            store.delete_object(&group(), a.uuid, true).await.unwrap(),
            DeleteOutcome::Deleted { links_removed: 1 }
        );
        assert_eq!(
            store.delete_object(&group(), a.uuid, true).await.unwrap(),
            DeleteOutcome::NotFound
        );
        assert_eq!(store.counts(&group()).await.unwrap(), GraphCounts { objects: 1, links: 0 });
        assert!(store.fulltext_search(&group(), "A", 5).await.unwrap().is_empty());
    }
}
