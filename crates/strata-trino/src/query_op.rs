//! Ops that run one fixed SQL statement.
//!
//! Only usable when the statement is known when the job is defined; anything
//! built at run time should call [`TrinoResource::execute_query`] directly.

use std::collections::BTreeMap;

use strata_core::{EngineError, SqlValue};

use crate::resource::TrinoResource;

pub const QUERY_OP_NAME: &str = "trino_op";

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOp {
    name: String,
    sql: String,
    params: Vec<SqlValue>,
    tags: BTreeMap<String, String>,
}

impl QueryOp {
    pub fn for_query(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        let sql = sql.into();
        let mut tags = BTreeMap::new();
        tags.insert("kind".to_string(), "sql".to_string());
        tags.insert("sql".to_string(), sql.clone());
        Self {
            name: QUERY_OP_NAME.to_string(),
            sql,
            params,
            tags,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Execute the statement, discarding any rows.
    pub async fn run(&self, resource: &TrinoResource) -> Result<(), EngineError> {
        resource
            .execute_query(&self.sql, &self.params, false)
            .await
            .map(|_| ())
    }
}
