//! Line-delimited JSON request dispatch.
//!
//! Each request is one JSON object per line:
//!
//! ```json
//! {"id": 1, "method": "executeQuery", "params": {"query": "SELECT 1", "maxRows": 10}}
//! ```
//!
//! and each response echoes the id with either a `result` or an `error`:
//!
//! ```json
//! {"id": 1, "result": "..."}
//! ```
//!
//! A request can be cancelled while in flight with
//! `{"method": "cancel", "params": {"requestId": 1}}`.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorInfo, PgScopeError, Result};
use crate::state::PgScopeState;

/// Statements for `executeTransaction`: a JSON array, or a string holding one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum QueryList {
    Encoded(String),
    List(Vec<String>),
}

impl QueryList {
    /// The statements as a JSON array string.
    fn to_json(&self) -> Result<String> {
        match self {
            Self::Encoded(text) => Ok(text.clone()),
            Self::List(queries) => Ok(serde_json::to_string(queries)?),
        }
    }
}

/// A call decoded from `method` and `params`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum ToolCall {
    #[serde(rename_all = "camelCase")]
    ExecuteQuery { query: String, command_timeout: Option<u32>, max_rows: Option<usize> },
    #[serde(rename_all = "camelCase")]
    ExecuteScalarQuery { query: String, command_timeout: Option<u32> },
    #[serde(rename_all = "camelCase")]
    ExecuteTransaction { queries: QueryList, command_timeout: Option<u32> },
    ListTables,
    ListViews,
    ListStoredProcedures,
    #[serde(rename_all = "camelCase")]
    GetTableSchema { table_name: String },
    GetDatabaseInfo,
    ListResources,
    ReadResource { uri: String },
    ServerStatus,
    #[serde(rename_all = "camelCase")]
    Cancel { request_id: JsonValue },
}

impl ToolCall {
    /// Wire name of the call.
    pub fn method(&self) -> &'static str {
        match self {
            Self::ExecuteQuery { .. } => "executeQuery",
            Self::ExecuteScalarQuery { .. } => "executeScalarQuery",
            Self::ExecuteTransaction { .. } => "executeTransaction",
            Self::ListTables => "listTables",
            Self::ListViews => "listViews",
            Self::ListStoredProcedures => "listStoredProcedures",
            Self::GetTableSchema { .. } => "getTableSchema",
            Self::GetDatabaseInfo => "getDatabaseInfo",
            Self::ListResources => "listResources",
            Self::ReadResource { .. } => "readResource",
            Self::ServerStatus => "serverStatus",
            Self::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: JsonValue,
    method: String,
    #[serde(default)]
    params: Option<Map<String, JsonValue>>,
}

/// One response line.
#[derive(Debug, Serialize)]
pub struct Response {
    pub id: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Response {
    fn success(id: JsonValue, result: JsonValue) -> Self {
        Self { id, result: Some(result), error: None }
    }

    fn failure(id: JsonValue, err: &PgScopeError) -> Self {
        Self { id, result: None, error: Some(err.to_error_info()) }
    }
}

/// Decode a request line into its id and call.
pub fn parse_request(line: &str) -> (JsonValue, Result<ToolCall>) {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => return (JsonValue::Null, Err(e.into())),
    };

    let mut fields = envelope.params.unwrap_or_default();
    fields.insert("method".to_string(), JsonValue::String(envelope.method));
    let call = serde_json::from_value(JsonValue::Object(fields)).map_err(PgScopeError::from);
    (envelope.id, call)
}

/// Routes decoded calls to the tools and the resource resolver.
pub struct Dispatcher {
    state: Arc<PgScopeState>,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl Dispatcher {
    pub fn new(state: Arc<PgScopeState>) -> Self {
        Self { state, in_flight: Mutex::new(HashMap::new()) }
    }

    /// Handle one request line. Blank lines produce no response.
    ///
    /// The call is cancelled when `parent` is, or when a `cancel` request
    /// names its id.
    pub async fn handle_line(&self, line: &str, parent: &CancellationToken) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (id, call) = parse_request(line);
        let response = match call {
            Ok(call) => self.run_registered(id, call, parent).await,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed request");
                Response::failure(id, &e)
            }
        };

        Some(serde_json::to_string(&response).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize response");
            let error = PgScopeError::internal(format!("Failed to serialize response: {e}"));
            json!({ "id": JsonValue::Null, "error": error.to_error_info() }).to_string()
        }))
    }

    /// Run a call under a child token that `cancel` can reach by id.
    ///
    /// Ids must be unique among running requests; a call reusing one that is
    /// still running is refused. `cancel` calls are never registered.
    async fn run_registered(
        &self,
        id: JsonValue,
        call: ToolCall,
        parent: &CancellationToken,
    ) -> Response {
        let token = parent.child_token();
        let key = (!id.is_null() && !matches!(call, ToolCall::Cancel { .. }))
            .then(|| id.to_string());

        if let Some(key) = &key {
            match self.in_flight.lock().entry(key.clone()) {
                Entry::Occupied(_) => {
                    tracing::warn!(request_id = %key, "Duplicate in-flight request id");
                    let e = PgScopeError::serialization(format!(
                        "Request id {key} is already in progress"
                    ));
                    return Response::failure(id, &e);
                }
                Entry::Vacant(slot) => {
                    slot.insert(token.clone());
                }
            }
        }

        let outcome = self.dispatch(call, &token).await;

        if let Some(key) = &key {
            self.in_flight.lock().remove(key);
        }
        match outcome {
            Ok(result) => Response::success(id, result),
            Err(e) => Response::failure(id, &e),
        }
    }

    /// Run a decoded call.
    pub async fn dispatch(&self, call: ToolCall, cancel: &CancellationToken) -> Result<JsonValue> {
        let tools = self.state.tools();
        tracing::debug!(method = call.method(), "Dispatching call");

        let text = match call {
            ToolCall::ExecuteQuery { query, command_timeout, max_rows } => {
                tools.execute_query(&query, command_timeout, max_rows, cancel).await
            }
            ToolCall::ExecuteScalarQuery { query, command_timeout } => {
                tools.execute_scalar_query(&query, command_timeout, cancel).await
            }
            ToolCall::ExecuteTransaction { queries, command_timeout } => {
                tools.execute_transaction(&queries.to_json()?, command_timeout, cancel).await
            }
            ToolCall::ListTables => tools.list_tables(cancel).await,
            ToolCall::ListViews => tools.list_views(cancel).await,
            ToolCall::ListStoredProcedures => tools.list_stored_procedures(cancel).await,
            ToolCall::GetTableSchema { table_name } => {
                tools.get_table_schema(&table_name, cancel).await
            }
            ToolCall::GetDatabaseInfo => tools.get_database_info(cancel).await,
            ToolCall::ListResources => {
                let resources = self.state.resolver().list_resources(cancel).await;
                return Ok(json!({ "resources": resources }));
            }
            ToolCall::ReadResource { uri } => {
                let contents = self.state.resolver().read_resource(&uri, cancel).await;
                return Ok(json!({ "contents": [contents] }));
            }
            ToolCall::ServerStatus => {
                let tracker = self.state.tracker();
                return Ok(json!({
                    "connections": tracker.status(),
                    "activeConnections": tracker.active_connections(),
                    "cache": self.state.cache().stats(),
                }));
            }
            ToolCall::Cancel { request_id } => {
                return Ok(json!({ "cancelled": self.cancel(&request_id) }));
            }
        };
        Ok(JsonValue::String(text))
    }

    /// Cancel an in-flight request by id. Returns whether one was found.
    pub fn cancel(&self, request_id: &JsonValue) -> bool {
        match self.in_flight.lock().get(&request_id.to_string()) {
            Some(token) => {
                token.cancel();
                tracing::debug!(request_id = %request_id, "Cancelled request");
                true
            }
            None => false,
        }
    }

    /// Number of requests currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}
