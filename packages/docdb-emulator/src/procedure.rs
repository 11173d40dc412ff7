//! Native handlers standing in for server-side procedure scripts.
//!
//! Procedures are created with their source text like on the real service,
//! but the emulator cannot run scripts. Execution dispatches to a native
//! function bound to the procedure id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};

use docdb_client::{Document, PartitionKey};

use crate::error::{EmulatorError, Result};

/// Name of the built-in handler that lists the documents of a partition.
pub const PARTITION_DOCUMENTS: &str = "partition_documents";

/// What a procedure sees when it runs.
pub struct ProcedureContext<'a> {
    /// Procedure id
    pub name: &'a str,
    /// Partition the execution is scoped to
    pub partition: &'a PartitionKey,
    /// Documents stored in that partition
    pub documents: &'a [Document],
}

/// Native procedure body.
pub type ProcedureFn = fn(&ProcedureContext<'_>, &[Value]) -> Result<Value>;

/// Handlers bound to procedure ids.
#[derive(Default, Clone)]
pub struct ProcedureRegistry {
    procedures: Arc<RwLock<HashMap<String, ProcedureFn>>>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `func` to the procedure id `name`.
    pub fn register(&self, name: impl Into<String>, func: ProcedureFn) {
        self.procedures.write().insert(name.into(), func);
    }

    /// Binds a built-in handler by its name.
    pub fn register_builtin(&self, name: impl Into<String>, builtin: &str) -> Result<()> {
        match builtin {
            PARTITION_DOCUMENTS => {
                self.register(name, partition_documents);
                Ok(())
            }
            other => Err(EmulatorError::BadRequest(format!(
                "Unknown built-in procedure '{}'",
                other
            ))),
        }
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.procedures.read().contains_key(name)
    }

    /// Runs the handler bound to `ctx.name`.
    pub fn execute(&self, ctx: &ProcedureContext<'_>, params: &[Value]) -> Result<Value> {
        let func = self.procedures.read().get(ctx.name).copied().ok_or_else(|| {
            EmulatorError::BadRequest(format!(
                "Procedure '{}' has no native handler bound",
                ctx.name
            ))
        })?;
        func(ctx, params)
    }
}

/// Returns the partition's documents as a JSON string body
/// `{"partitionKey": ..., "docs": [...]}`, or `"no docs found"`. The optional
/// first parameter is the partition key value and must be a scalar.
pub fn partition_documents(ctx: &ProcedureContext<'_>, params: &[Value]) -> Result<Value> {
    let partition = match params.first() {
        None | Some(Value::Null) => ctx.partition.value().clone(),
        Some(value @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => value.clone(),
        Some(_) => {
            return Err(EmulatorError::Procedure {
                name: ctx.name.to_string(),
                message: "partitionKey must be a string, number or boolean".to_string(),
            })
        }
    };
    if ctx.documents.is_empty() {
        return Ok(Value::String("no docs found".to_string()));
    }
    let body = json!({ "partitionKey": partition, "docs": ctx.documents });
    Ok(Value::String(body.to_string()))
}
