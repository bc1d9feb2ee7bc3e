//! Diagnostic query catalog models.

use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryNodeType {
    Folder,
    Query,
}

/// A folder or a saved query in the catalog tree.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueryNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: QueryNodeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[schema(no_recursion)]
    pub children: Vec<QueryNode>,
}

impl QueryNode {
    pub fn folder(id: &str, name: &str, children: Vec<QueryNode>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            node_type: QueryNodeType::Folder,
            query: None,
            children,
        }
    }

    pub fn query(id: &str, name: &str, sql: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            node_type: QueryNodeType::Query,
            query: Some(sql.to_string()),
            children: Vec::new(),
        }
    }

    /// Depth-first lookup by id.
    pub fn find(&self, id: &str) -> Option<&QueryNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}
