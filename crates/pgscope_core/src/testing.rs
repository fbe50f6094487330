//! Scriptable in-memory database for tests.
//!
//! `FakeDatabase` implements [`Connector`] and answers:
//! - catalog queries from a [`FakeCatalog`]
//! - `SELECT ... FROM <table>` from registered row sets
//! - writes by recording them (committed, pending or rolled back)
//!
//! A late failure models an error PostgreSQL raises while producing rows: it
//! is only seen by a caller that reads past the last row, and otherwise
//! leaves the open transaction aborted so COMMIT silently rolls back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use tokio_util::sync::CancellationToken;

use crate::error::{PgScopeError, Result};
use crate::models::{ColumnInfo, DatabaseInfo, ForeignKeyInfo, ParameterInfo, StatementKind};
use crate::services::connection::{ConnectionTracker, Connector, RowSet, Session};
use crate::services::schema::*;

/// A table or view in the fake catalog.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeRelation {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    pub definition: String,
}

/// A procedure in the fake catalog.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeProcedure {
    pub name: String,
    pub parameters: Vec<ParameterInfo>,
    pub definition: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeSchema {
    pub name: String,
    pub tables: Vec<FakeRelation>,
    pub views: Vec<FakeRelation>,
    pub procedures: Vec<FakeProcedure>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeCatalog {
    pub schemas: Vec<FakeSchema>,
}

impl FakeCatalog {
    fn schema(&self, name: &str) -> Option<&FakeSchema> {
        self.schemas.iter().find(|s| s.name == name)
    }

    fn relation(&self, schema: &str, name: &str) -> Option<&FakeRelation> {
        let schema = self.schema(schema)?;
        schema.tables.iter().chain(schema.views.iter()).find(|r| r.name == name)
    }

    fn procedure(&self, schema: &str, name: &str) -> Option<&FakeProcedure> {
        self.schema(schema)?.procedures.iter().find(|p| p.name == name)
    }

    /// Answer one of the catalog queries, or `None` if `sql` is not one.
    fn answer(&self, sql: &str, params: &[String]) -> Option<RowSet> {
        let p = |i: usize| params.get(i).map(String::as_str).unwrap_or_default();
        let sorted = |mut names: Vec<String>| {
            names.sort();
            name_rows(names)
        };

        let set = match sql {
            SCHEMAS_SQL => sorted(self.schemas.iter().map(|s| s.name.clone()).collect()),
            TABLES_IN_SCHEMA_SQL => sorted(
                self.schema(p(0))
                    .map(|s| s.tables.iter().map(|t| t.name.clone()).collect())
                    .unwrap_or_default(),
            ),
            VIEWS_IN_SCHEMA_SQL => sorted(
                self.schema(p(0))
                    .map(|s| s.views.iter().map(|v| v.name.clone()).collect())
                    .unwrap_or_default(),
            ),
            PROCEDURES_IN_SCHEMA_SQL => sorted(
                self.schema(p(0))
                    .map(|s| s.procedures.iter().map(|v| v.name.clone()).collect())
                    .unwrap_or_default(),
            ),
            ALL_TABLES_SQL => sorted(
                self.schemas.iter().flat_map(|s| s.tables.iter().map(|t| t.name.clone())).collect(),
            ),
            ALL_VIEWS_SQL => sorted(
                self.schemas.iter().flat_map(|s| s.views.iter().map(|t| t.name.clone())).collect(),
            ),
            ALL_PROCEDURES_SQL => sorted(
                self.schemas
                    .iter()
                    .flat_map(|s| s.procedures.iter().map(|t| t.name.clone()))
                    .collect(),
            ),
            TABLE_SCHEMAS_SQL => sorted(
                self.schemas
                    .iter()
                    .filter(|s| self.relation(&s.name, p(0)).is_some())
                    .map(|s| s.name.clone())
                    .collect(),
            ),
            COLUMNS_SQL => RowSet {
                columns: strings(&["name", "data_type", "max_length", "is_nullable", "default_value"]),
                rows: self
                    .relation(p(0), p(1))
                    .map(|r| {
                        r.columns
                            .iter()
                            .map(|c| {
                                vec![
                                    json!(c.name),
                                    json!(c.data_type),
                                    json!(c.max_length),
                                    json!(if c.is_nullable { "YES" } else { "NO" }),
                                    json!(c.default_value),
                                ]
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            PRIMARY_KEYS_SQL => name_rows(
                self.relation(p(0), p(1)).map(|r| r.primary_keys.clone()).unwrap_or_default(),
            ),
            FOREIGN_KEYS_SQL => RowSet {
                columns: strings(&[
                    "name",
                    "column_name",
                    "referenced_schema",
                    "referenced_table",
                    "referenced_column",
                ]),
                rows: self
                    .relation(p(0), p(1))
                    .map(|r| {
                        r.foreign_keys
                            .iter()
                            .map(|fk| {
                                vec![
                                    json!(fk.name),
                                    json!(fk.column_name),
                                    json!(fk.referenced_schema),
                                    json!(fk.referenced_table),
                                    json!(fk.referenced_column),
                                ]
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            VIEW_DEFINITION_SQL => name_rows(
                self.schema(p(0))
                    .and_then(|s| s.views.iter().find(|v| v.name == p(1)))
                    .map(|v| vec![v.definition.clone()])
                    .unwrap_or_default(),
            ),
            PROCEDURE_PARAMETERS_SQL => RowSet {
                columns: strings(&["name", "mode", "data_type", "max_length", "default_value"]),
                rows: self
                    .procedure(p(0), p(1))
                    .map(|proc| {
                        proc.parameters
                            .iter()
                            .map(|param| {
                                vec![
                                    json!(param.name),
                                    json!(param.mode),
                                    json!(param.data_type),
                                    json!(param.max_length),
                                    json!(param.default_value),
                                ]
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            PROCEDURE_DEFINITION_SQL => name_rows(
                self.procedure(p(0), p(1)).map(|p| vec![p.definition.clone()]).unwrap_or_default(),
            ),
            _ => return None,
        };
        Some(set)
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn name_rows(names: Vec<String>) -> RowSet {
    RowSet {
        columns: strings(&["name"]),
        rows: names.into_iter().map(|n| vec![JsonValue::String(n)]).collect(),
    }
}

pub(crate) fn column(name: &str, data_type: &str, nullable: bool) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        data_type: data_type.to_string(),
        max_length: None,
        is_nullable: nullable,
        default_value: None,
    }
}

/// Two schemas: `public` (users, orders, active_users) and `sales`
/// (invoices, close_month).
pub(crate) fn sample_catalog() -> FakeCatalog {
    let users = FakeRelation {
        name: "users".to_string(),
        columns: vec![
            column("id", "integer", false),
            ColumnInfo { max_length: Some(255), ..column("email", "character varying", false) },
            ColumnInfo { default_value: Some("true".to_string()), ..column("active", "boolean", true) },
        ],
        primary_keys: strings(&["id"]),
        ..FakeRelation::default()
    };
    let orders = FakeRelation {
        name: "orders".to_string(),
        columns: vec![
            column("id", "integer", false),
            column("user_id", "integer", false),
            column("total", "numeric", true),
        ],
        primary_keys: strings(&["id"]),
        foreign_keys: vec![ForeignKeyInfo {
            name: "orders_user_id_fkey".to_string(),
            column_name: "user_id".to_string(),
            referenced_schema: "public".to_string(),
            referenced_table: "users".to_string(),
            referenced_column: "id".to_string(),
        }],
        ..FakeRelation::default()
    };
    let active_users = FakeRelation {
        name: "active_users".to_string(),
        columns: vec![
            column("id", "integer", true),
            ColumnInfo { max_length: Some(255), ..column("email", "character varying", true) },
        ],
        definition: "SELECT id, email FROM users WHERE active".to_string(),
        ..FakeRelation::default()
    };
    let invoices = FakeRelation {
        name: "invoices".to_string(),
        columns: vec![column("id", "integer", false), column("month", "integer", false)],
        primary_keys: strings(&["id"]),
        ..FakeRelation::default()
    };
    let close_month = FakeProcedure {
        name: "close_month".to_string(),
        parameters: vec![ParameterInfo {
            name: Some("p_month".to_string()),
            mode: "IN".to_string(),
            data_type: "integer".to_string(),
            max_length: None,
            default_value: None,
        }],
        definition: "UPDATE invoices SET closed = true WHERE month = p_month".to_string(),
    };

    FakeCatalog {
        schemas: vec![
            FakeSchema {
                name: "public".to_string(),
                tables: vec![users, orders],
                views: vec![active_users],
                procedures: vec![],
            },
            FakeSchema {
                name: "sales".to_string(),
                tables: vec![invoices],
                views: vec![],
                procedures: vec![close_month],
            },
        ],
    }
}

#[derive(Default)]
struct FakeState {
    catalog: FakeCatalog,
    tables: HashMap<String, RowSet>,
    overrides: Vec<(String, RowSet)>,
    fail_connect: Option<String>,
    fail_on: Option<String>,
    fail_late_on: Option<String>,
    delay: Option<Duration>,
    connects: usize,
    statements: Vec<String>,
    committed: Vec<String>,
    rows_per_write: u64,
}

/// Shared handle to the fake database; clones see the same state.
#[derive(Clone)]
pub(crate) struct FakeDatabase {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        let state = FakeState { rows_per_write: 1, ..FakeState::default() };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub fn with_catalog(catalog: FakeCatalog) -> Self {
        let db = Self::new();
        db.state.lock().catalog = catalog;
        db
    }

    /// A tracker connected to this database.
    pub fn tracker(&self) -> ConnectionTracker {
        ConnectionTracker::new(Arc::new(self.clone()))
    }

    /// Register a table for `SELECT ... FROM <name>` reads.
    pub fn add_table(&self, name: &str, columns: &[&str], rows: Vec<Vec<JsonValue>>) {
        let set = RowSet { columns: strings(columns), rows };
        self.state.lock().tables.insert(name.to_lowercase(), set);
    }

    /// Answer any read containing `fragment` with `set`.
    pub fn on_query(&self, fragment: &str, set: RowSet) {
        self.state.lock().overrides.push((fragment.to_lowercase(), set));
    }

    pub fn update_catalog(&self, f: impl FnOnce(&mut FakeCatalog)) {
        f(&mut self.state.lock().catalog);
    }

    pub fn fail_connects(&self, message: &str) {
        self.state.lock().fail_connect = Some(message.to_string());
    }

    /// Fail every statement containing `fragment` with a unique violation.
    pub fn fail_statements_containing(&self, fragment: &str) {
        self.state.lock().fail_on = Some(fragment.to_string());
    }

    /// Fail statements containing `fragment` with a division by zero raised
    /// after their rows, as a runtime error in a SELECT list would be.
    pub fn fail_late_on(&self, fragment: &str) {
        self.state.lock().fail_late_on = Some(fragment.to_string());
    }

    /// Make every statement take this long unless the session is closed.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    pub fn set_rows_per_write(&self, rows: u64) {
        self.state.lock().rows_per_write = rows;
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Every statement received, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    /// How many times exactly `sql` was received.
    pub fn count_of(&self, sql: &str) -> usize {
        self.state.lock().statements.iter().filter(|s| s.as_str() == sql).count()
    }

    /// Writes that are durably applied.
    pub fn committed(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }
}

#[async_trait]
impl Connector for FakeDatabase {
    async fn connect(
        &self,
        _command_timeout_secs: u32,
        shutdown: CancellationToken,
    ) -> Result<Box<dyn Session>> {
        let mut state = self.state.lock();
        if let Some(message) = &state.fail_connect {
            return Err(PgScopeError::connection(message.clone()));
        }
        state.connects += 1;
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
            shutdown,
            pending: None,
            aborted: false,
        }))
    }

    fn describe(&self) -> DatabaseInfo {
        DatabaseInfo {
            server_name: "localhost".to_string(),
            database_name: "testdb".to_string(),
            user_name: "tester".to_string(),
            ..DatabaseInfo::default()
        }
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    shutdown: CancellationToken,
    pending: Option<Vec<String>>,
    aborted: bool,
}

fn division_by_zero() -> PgScopeError {
    PgScopeError::database("division by zero", Some("22012".to_string()))
}

impl FakeSession {
    /// Errors inside a transaction leave it aborted until it ends.
    fn abort_transaction(&mut self) {
        if self.pending.is_some() {
            self.aborted = true;
        }
    }

    fn fails_late(&self, sql: &str) -> bool {
        let fail_late_on = self.state.lock().fail_late_on.clone();
        fail_late_on.is_some_and(|fragment| sql.contains(&fragment))
    }

    /// Record the statement, honour the delay and the failure marker.
    async fn receive(&self, sql: &str) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(PgScopeError::connection("Connection closed"));
        }
        if self.aborted && sql != "COMMIT" && sql != "ROLLBACK" {
            self.state.lock().statements.push(sql.to_string());
            return Err(PgScopeError::database(
                "current transaction is aborted, commands ignored until end of transaction block",
                Some("25P02".to_string()),
            ));
        }

        let delay = {
            let mut state = self.state.lock();
            state.statements.push(sql.to_string());
            state.delay
        };
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => {
                    return Err(PgScopeError::connection("Connection closed"));
                }
            }
        }

        let fail_on = self.state.lock().fail_on.clone();
        if fail_on.is_some_and(|fragment| sql.contains(&fragment)) {
            return Err(PgScopeError::Database {
                message: "duplicate key value violates unique constraint \"users_pkey\""
                    .to_string(),
                code: Some("23505".to_string()),
                detail: None,
                hint: None,
                position: None,
            });
        }
        Ok(())
    }
}

fn table_after_from(sql: &str) -> Option<String> {
    let lower = sql.to_lowercase();
    let mut tokens = lower.split_whitespace();
    tokens.find(|t| *t == "from")?;
    let name = tokens.next()?.trim_matches(|c: char| c == ';' || c == ',' || c == ')');
    Some(name.rsplit('.').next().unwrap_or(name).trim_matches('"').to_string())
}

#[async_trait]
impl Session for FakeSession {
    async fn query(
        &mut self,
        sql: &str,
        params: &[String],
        limit: Option<usize>,
    ) -> Result<RowSet> {
        self.receive(sql).await?;

        let mut set = {
            let state = self.state.lock();
            let lower = sql.to_lowercase();
            if let Some(set) = state.catalog.answer(sql, params) {
                set
            } else if let Some((_, set)) =
                state.overrides.iter().find(|(fragment, _)| lower.contains(fragment))
            {
                set.clone()
            } else if let Some(table) = table_after_from(sql) {
                state.tables.get(&table).cloned().ok_or_else(|| {
                    PgScopeError::database(
                        format!("relation \"{table}\" does not exist"),
                        Some("42P01".to_string()),
                    )
                })?
            } else {
                RowSet { columns: strings(&["?column?"]), rows: vec![vec![json!(1)]] }
            }
        };

        let drained = limit.map_or(true, |limit| limit > set.rows.len());
        if self.fails_late(sql) {
            self.abort_transaction();
            // A capped read stops before the error and never sees it
            if drained {
                return Err(division_by_zero());
            }
        }

        if let Some(limit) = limit {
            set.rows.truncate(limit);
        }
        Ok(set)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.receive(sql).await?;
        if self.fails_late(sql) {
            self.abort_transaction();
            return Err(division_by_zero());
        }
        if StatementKind::detect(sql) == StatementKind::Read {
            return Ok(0);
        }
        match &mut self.pending {
            Some(pending) => pending.push(sql.to_string()),
            None => self.state.lock().committed.push(sql.to_string()),
        }
        Ok(self.state.lock().rows_per_write)
    }

    async fn begin(&mut self) -> Result<()> {
        self.receive("BEGIN").await?;
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.receive("COMMIT").await?;
        let pending = self.pending.take();
        // COMMIT of an aborted transaction rolls back without an error
        if std::mem::take(&mut self.aborted) {
            return Ok(());
        }
        if let Some(pending) = pending {
            self.state.lock().committed.extend(pending);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.receive("ROLLBACK").await?;
        self.pending = None;
        self.aborted = false;
        Ok(())
    }
}

/// Rows `[[1, "user1"], [2, "user2"], ...]`.
pub(crate) fn numbered_rows(count: usize) -> Vec<Vec<JsonValue>> {
    (1..=count).map(|i| vec![json!(i), json!(format!("user{i}"))]).collect()
}
