//! Postgres + pgvector graph backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use pgvector::Vector;
use serde_json::{Map, Value};
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

use super::{GraphStore, NewReference, NodeId, StoredNode};
use crate::node::NodeRecord;

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        anyhow::ensure!(!schema.trim().is_empty(), "schema name is required");
        anyhow::ensure!(!table.trim().is_empty(), "table name is required");
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Quoted name for an index on this table.
    pub fn index_name(&self, suffix: &str) -> String {
        quote_ident(&format!(
            "{}_{}_{}_idx",
            sanitize_ident(&self.schema),
            sanitize_ident(&self.table),
            suffix
        ))
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn sanitize_ident(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

/// Graph store over a node table and a reference table.
pub struct PgGraphStore {
    client: Client,
    nodes: TableName,
    references: TableName,
}

impl PgGraphStore {
    /// Connects and spawns the connection driver on the current runtime.
    pub async fn connect(database_url: &str, nodes: TableName, references: TableName) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .context("failed to connect to Postgres")?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });
        debug!(nodes = %nodes.qualified(), references = %references.qualified(), "connected graph store");
        Ok(Self {
            client,
            nodes,
            references,
        })
    }

    /// Creates the vector extension, tables and indexes when missing.
    pub async fn ensure_schema(&self, dims: usize) -> Result<()> {
        anyhow::ensure!(dims > 0, "embedding dimension must be positive");
        self.client
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await
            .context("failed to ensure pgvector extension")?;
        for ddl in schema_ddl(&self.nodes, &self.references, dims) {
            self.client
                .execute(&ddl, &[])
                .await
                .with_context(|| format!("failed to apply schema statement: {ddl}"))?;
        }
        info!(
            nodes = %self.nodes.qualified(),
            references = %self.references.qualified(),
            dims,
            "graph schema ready"
        );
        Ok(())
    }
}

fn schema_ddl(nodes: &TableName, references: &TableName, dims: usize) -> Vec<String> {
    let node_table = nodes.qualified();
    let reference_table = references.qualified();
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {node_table} (
                id BIGSERIAL PRIMARY KEY,
                document_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                title TEXT,
                content TEXT NOT NULL,
                level INTEGER,
                path TEXT NOT NULL,
                section_type TEXT NOT NULL,
                content_type TEXT NOT NULL,
                document_position DOUBLE PRECISION,
                parent_id BIGINT REFERENCES {node_table} (id) ON DELETE SET NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                embedding VECTOR({dims}),
                embedding_generated BOOLEAN NOT NULL DEFAULT FALSE
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {reference_table} (
                id BIGSERIAL PRIMARY KEY,
                source_node_id BIGINT NOT NULL REFERENCES {node_table} (id) ON DELETE CASCADE,
                target_node_id BIGINT NOT NULL REFERENCES {node_table} (id) ON DELETE CASCADE,
                reference_type TEXT NOT NULL,
                strength REAL NOT NULL
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {node_table} (document_id)",
            nodes.index_name("document_id")
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {node_table} (path)",
            nodes.index_name("path")
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {reference_table} (source_node_id)",
            references.index_name("source")
        ),
    ]
}

fn stored_node(row: &Row) -> Result<StoredNode> {
    let metadata: Option<Json<Map<String, Value>>> = row.try_get("metadata")?;
    Ok(StoredNode {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        path: row.try_get("path")?,
        title: row.try_get("title")?,
        metadata: metadata.map(|Json(map)| map).unwrap_or_default(),
    })
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn find_nodes_by_path(
        &self,
        pattern: &str,
        max_results: usize,
    ) -> Result<Vec<StoredNode>> {
        let sql = format!(
            "SELECT id, document_id, path, title, metadata FROM {} \
             WHERE path ILIKE $1 ESCAPE '\\' ORDER BY id LIMIT $2",
            self.nodes.qualified()
        );
        let limit = i64::try_from(max_results).unwrap_or(i64::MAX);
        let rows = self
            .client
            .query(&sql, &[&pattern, &limit])
            .await
            .with_context(|| format!("path lookup failed for pattern {pattern}"))?;
        rows.iter().map(stored_node).collect()
    }

    async fn delete_nodes_by_document_id(&self, document_id: &str) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE document_id = $1",
            self.nodes.qualified()
        );
        self.client
            .execute(&sql, &[&document_id])
            .await
            .with_context(|| format!("failed to delete nodes of document {document_id}"))
    }

    async fn insert_node(&self, node: &NodeRecord) -> Result<NodeId> {
        let sql = format!(
            "INSERT INTO {} \
                (document_id, node_type, title, content, level, path, section_type, \
                 content_type, document_position, metadata, embedding, embedding_generated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING id",
            self.nodes.qualified()
        );
        let metadata = Json(&node.metadata);
        let embedding = node.embedding.clone().map(Vector::from);
        let row = self
            .client
            .query_one(
                &sql,
                &[
                    &node.document_id,
                    &node.node_type,
                    &node.title,
                    &node.content,
                    &node.level,
                    &node.path,
                    &node.section_type,
                    &node.content_type,
                    &node.document_position,
                    &metadata,
                    &embedding,
                    &node.embedding_generated,
                ],
            )
            .await
            .with_context(|| format!("failed to insert node at path {}", node.path))?;
        Ok(row.try_get(0)?)
    }

    async fn update_node_parent(&self, node_id: NodeId, parent_id: NodeId) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET parent_id = $1 WHERE id = $2",
            self.nodes.qualified()
        );
        let updated = self
            .client
            .execute(&sql, &[&parent_id, &node_id])
            .await
            .with_context(|| format!("failed to set parent of node {node_id}"))?;
        anyhow::ensure!(updated == 1, "node {node_id} does not exist");
        Ok(())
    }

    async fn insert_reference(&self, reference: &NewReference) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (source_node_id, target_node_id, reference_type, strength) \
             VALUES ($1, $2, $3, $4)",
            self.references.qualified()
        );
        self.client
            .execute(
                &sql,
                &[
                    &reference.source_node_id,
                    &reference.target_node_id,
                    &reference.reference_type.as_str(),
                    &reference.strength,
                ],
            )
            .await
            .with_context(|| {
                format!(
                    "failed to insert reference {} -> {}",
                    reference.source_node_id, reference.target_node_id
                )
            })?;
        Ok(())
    }
}
