use crate::error::StoreError;
use crate::models::IndexEntry;
use crate::toc::{TocNodeId, TocTree};
use crate::traits::StructureStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

const BACKEND: &str = "neo4j";

const DELETE_STRUCTURE: &str = r#"
    MATCH (n)
    WHERE (n:TocNode OR n:IndexEntry) AND n.document_id = $document_id
    DETACH DELETE n
"#;

const CREATE_TOC: &str = r#"
    MERGE (doc:Document {document_id: $document_id})
    WITH doc
    UNWIND $rows AS row
    CREATE (t:TocNode {
        document_id: $document_id,
        node_id: row.node_id,
        parent_id: row.parent_id,
        position: row.position,
        title: row.title,
        page: row.page
    })
    MERGE (doc)-[:HAS_TOC]->(t)
"#;

const LINK_TOC: &str = r#"
    MATCH (child:TocNode {document_id: $document_id})
    WHERE child.parent_id IS NOT NULL
    MATCH (parent:TocNode {document_id: $document_id, node_id: child.parent_id})
    CREATE (parent)-[:HAS_CHILD]->(child)
"#;

const CREATE_INDEX: &str = r#"
    MERGE (doc:Document {document_id: $document_id})
    WITH doc
    UNWIND $entries AS entry
    CREATE (i:IndexEntry {document_id: $document_id, term: entry.term, pages: entry.pages})
    MERGE (doc)-[:HAS_INDEX]->(i)
"#;

const READ_TOC: &str = r#"
    MATCH (t:TocNode {document_id: $document_id})
    RETURN t.node_id, t.title, t.page, t.parent_id
    ORDER BY t.position
"#;

const READ_INDEX: &str = r#"
    MATCH (i:IndexEntry {document_id: $document_id})
    RETURN i.term, i.pages
    ORDER BY i.term
"#;

pub struct Neo4jStore {
    endpoint: String,
    database: String,
    username: String,
    password: String,
    client: Client,
}

impl Neo4jStore {
    pub fn new(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            client: Client::new(),
        }
    }

    fn tx_url(&self) -> String {
        format!("{}/db/{}/tx/commit", self.endpoint, self.database)
    }

    /// Runs every statement in one transaction.
    async fn commit(&self, statements: Vec<Value>) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(self.tx_url())
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "statements": statements }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        if let Some(errors) = body.pointer("/errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(StoreError::BackendResponse {
                    backend: BACKEND.to_string(),
                    details: Value::Array(errors.clone()).to_string(),
                });
            }
        }
        Ok(body)
    }
}

fn statement(cypher: &str, parameters: Value) -> Value {
    json!({ "statement": cypher, "parameters": parameters })
}

#[async_trait]
impl StructureStore for Neo4jStore {
    async fn replace_structure(
        &self,
        document_id: &str,
        toc: &TocTree,
        index: &[IndexEntry],
    ) -> Result<(), StoreError> {
        let entries: Vec<Value> = index
            .iter()
            .map(|entry| json!({ "term": entry.term, "pages": entry.pages }))
            .collect();

        self.commit(vec![
            statement(DELETE_STRUCTURE, json!({ "document_id": document_id })),
            statement(
                CREATE_TOC,
                json!({ "document_id": document_id, "rows": toc_rows(toc) }),
            ),
            statement(LINK_TOC, json!({ "document_id": document_id })),
            statement(
                CREATE_INDEX,
                json!({ "document_id": document_id, "entries": entries }),
            ),
        ])
        .await?;

        debug!(document_id, toc_nodes = toc.len(), index_entries = index.len(), "structure rewritten");
        Ok(())
    }

    async fn read_toc(&self, document_id: &str) -> Result<Option<TocTree>, StoreError> {
        let body = self
            .commit(vec![statement(READ_TOC, json!({ "document_id": document_id }))])
            .await?;
        let rows = extract_rows(&body);
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(tree_from_rows(&rows)))
    }

    async fn read_index(&self, document_id: &str) -> Result<Vec<IndexEntry>, StoreError> {
        let body = self
            .commit(vec![statement(READ_INDEX, json!({ "document_id": document_id }))])
            .await?;

        Ok(extract_rows(&body)
            .into_iter()
            .filter_map(|row| {
                let values = row.as_array()?;
                let term = values.first()?.as_str()?.to_string();
                let pages: BTreeSet<u32> = values
                    .get(1)?
                    .as_array()?
                    .iter()
                    .filter_map(Value::as_u64)
                    .filter_map(|page| u32::try_from(page).ok())
                    .collect();
                Some(IndexEntry { term, pages })
            })
            .collect())
    }
}

/// Flattens the tree in reading order; `position` restores that order on read.
fn toc_rows(toc: &TocTree) -> Vec<Value> {
    toc.pre_order()
        .iter()
        .enumerate()
        .map(|(position, visit)| {
            json!({
                "node_id": visit.id.0,
                "parent_id": visit.node.parent.map(|parent| parent.0),
                "position": position,
                "title": visit.node.title,
                "page": visit.node.page,
            })
        })
        .collect()
}

fn tree_from_rows(rows: &[&Value]) -> TocTree {
    let mut tree = TocTree::new();
    let mut ids: HashMap<u64, TocNodeId> = HashMap::new();

    for row in rows {
        let Some(values) = row.as_array() else {
            continue;
        };
        let node_id = values.first().and_then(Value::as_u64);
        let title = values.get(1).and_then(Value::as_str).unwrap_or_default();
        let page = values
            .get(2)
            .and_then(Value::as_u64)
            .and_then(|page| u32::try_from(page).ok())
            .unwrap_or(0);
        let parent = values.get(3).and_then(Value::as_u64);

        let id = match parent.and_then(|parent| ids.get(&parent).copied()) {
            Some(parent_id) => match tree.add_child(parent_id, title, page) {
                Ok(id) => id,
                Err(error) => {
                    warn!(error = %error, "dropping toc row with unknown parent");
                    continue;
                }
            },
            None => tree.add_root(title, page),
        };
        if let Some(node_id) = node_id {
            ids.insert(node_id, id);
        }
    }

    tree
}

fn extract_rows(payload: &Value) -> Vec<&Value> {
    payload
        .pointer("/results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|result| result.pointer("/data").and_then(Value::as_array))
                .flatten()
                .filter_map(|entry| entry.pointer("/row").filter(|row| row.is_array()))
                .collect()
        })
        .unwrap_or_default()
}
