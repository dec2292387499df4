use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{SlatedAuthSource, UserDirectory};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::site::SiteManager;
use crate::sql::{self, Command};

pub struct SlatedHandler {
    sites: Arc<SiteManager>,
    directory: Arc<UserDirectory>,
    query_parser: Arc<SlatedQueryParser>,
}

impl SlatedHandler {
    pub fn new(sites: Arc<SiteManager>, directory: Arc<UserDirectory>) -> Self {
        Self {
            sites,
            directory,
            query_parser: Arc::new(SlatedQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.sites.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("site error: {e}"),
            )))
        })
    }

    /// The connection's login user is the actor for every command on it.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        let login = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_default();
        self.directory.actor(&login).ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                format!("unknown user: {login}"),
            )))
        })
    }

    async fn dispatch<C>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo,
    {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(&engine, &actor, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        metrics::counter!(
            observability::QUERIES_TOTAL,
            "command" => label,
            "status" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        actor: &Actor,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertResource {
                id,
                name,
                category,
                capacity,
                location,
            } => {
                engine
                    .create_resource(actor, id, name, category, capacity, location)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateResource { id, patch } => {
                engine
                    .update_resource(actor, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteResource { id } => {
                engine.delete_resource(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectResources => {
                let resources = engine.list_resources().await;
                let schema = Arc::new(resources_schema());
                let rows: Vec<PgWireResult<_>> = resources
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.name)?;
                        encoder.encode_field(&r.category)?;
                        encoder.encode_field(&(r.capacity as i64))?;
                        encoder.encode_field(&r.location)?;
                        encoder.encode_field(&r.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertSlot { id, label, start, end } => {
                engine
                    .create_slot(actor, id, label, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectSlots => {
                let slots = engine.list_active_slots().await;
                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.label)?;
                        encoder.encode_field(&s.start.format("%H:%M").to_string())?;
                        encoder.encode_field(&s.end.format("%H:%M").to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertBooking {
                id,
                resource_id,
                date,
                slot_id,
                purpose,
            } => {
                engine
                    .create_booking(actor, id, resource_id, date, SlotRef::Preset(slot_id), purpose)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertCustomBooking {
                id,
                resource_id,
                date,
                label,
                start,
                end,
                purpose,
            } => {
                engine
                    .create_booking(
                        actor,
                        id,
                        resource_id,
                        date,
                        SlotRef::Custom { label, start, end },
                        purpose,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBookingStatus { id, status, reason } => {
                engine
                    .transition(actor, id, status, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                engine.cancel(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBookings { filter } => {
                let views = engine.list_bookings(actor, &filter).await;
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = views
                    .into_iter()
                    .map(|v| {
                        let b = v.booking;
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.resource_id.to_string())?;
                        encoder.encode_field(&b.user)?;
                        encoder.encode_field(&b.slot_id.to_string())?;
                        encoder.encode_field(&b.date.to_string())?;
                        encoder.encode_field(&b.purpose)?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.created_at.to_rfc3339())?;
                        encoder.encode_field(&b.approved_by)?;
                        encoder.encode_field(&b.rejected_by)?;
                        encoder.encode_field(&b.rejection_reason)?;
                        encoder.encode_field(&v.has_usage)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability { resource_id, date } => {
                let grid = engine
                    .list_availability(resource_id, date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = grid
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.slot_id.to_string())?;
                        encoder.encode_field(&slot.label)?;
                        encoder.encode_field(&slot.start.format("%H:%M").to_string())?;
                        encoder.encode_field(&slot.end.format("%H:%M").to_string())?;
                        encoder.encode_field(&slot.available)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertUsage {
                booking_id,
                remarks,
                issues,
            } => {
                engine
                    .record_usage(actor, booking_id, remarks, issues)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectStats { date } => {
                let stats = engine.stats(date).await;
                let schema = Arc::new(stats_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(stats.total_resources as i64))?;
                encoder.encode_field(&(stats.available_resources as i64))?;
                encoder.encode_field(&(stats.bookings_on_date as i64))?;
                encoder.encode_field(&(stats.pending_approvals as i64))?;
                encoder.encode_field(&(stats.completed_this_month as i64))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let resource_id_str = channel.strip_prefix("resource_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected resource_{{id}})"),
                    )))
                })?;
                let _resource_id = Ulid::from_string(resource_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("slot_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("label".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("name".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("category".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("capacity".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("location".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("label".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("resource_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("user".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("slot_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("date".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("purpose".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("created_at".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("approved_by".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("rejected_by".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("rejection_reason".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("has_usage".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn stats_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("total_resources".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("available_resources".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("bookings_on_date".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("pending_approvals".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("completed_this_month".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

#[async_trait]
impl SimpleQueryHandler for SlatedHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.dispatch(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlatedQueryParser;

#[async_trait]
impl QueryParser for SlatedQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(select_schema(stmt).unwrap_or_default())
    }
}

/// Result schema for SELECTs on the virtual tables; None for commands.
fn select_schema(stmt: &str) -> Option<Vec<FieldInfo>> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return None;
    }
    if upper.contains("AVAILABILITY") {
        Some(availability_schema())
    } else if upper.contains("TIME_SLOTS") {
        Some(slots_schema())
    } else if upper.contains("BOOKINGS") {
        Some(bookings_schema())
    } else if upper.contains("RESOURCES") {
        Some(resources_schema())
    } else if upper.contains("STATS") {
        Some(stats_schema())
    } else {
        None
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlatedHandler {
    type Statement = String;
    type QueryParser = SlatedQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.dispatch(client, &sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            select_schema(&target.statement).unwrap_or_default(),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(
            select_schema(&target.statement.statement).unwrap_or_default(),
        ))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlatedFactory {
    handler: Arc<SlatedHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlatedAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlatedFactory {
    pub fn new(sites: Arc<SiteManager>, directory: Arc<UserDirectory>) -> Self {
        let auth_source = SlatedAuthSource::new(directory.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlatedHandler::new(sites, directory)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlatedFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one authenticated connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    sites: Arc<SiteManager>,
    directory: Arc<UserDirectory>,
    tls: Option<TlsAcceptor>,
) -> Result<(), io::Error> {
    let factory = SlatedFactory::new(sites, directory);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// Engine errors map to stable SQLSTATEs so callers can branch on kind.
fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Validation(_) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::ResourceUnavailable(_) => "55006",
        EngineError::Conflict(_) | EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::Forbidden(_) => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Wal(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM bookings"), 0);
        assert_eq!(count_params("... id = $1 AND date = $2"), 2);
        assert_eq!(count_params("... $2 ... $10 ... $3"), 10);
    }

    #[test]
    fn select_schema_by_table() {
        assert_eq!(
            select_schema("SELECT * FROM availability WHERE ...").map(|s| s.len()),
            Some(5)
        );
        assert_eq!(
            select_schema("select * from time_slots").map(|s| s.len()),
            Some(4)
        );
        assert_eq!(
            select_schema("SELECT * FROM bookings").map(|s| s.len()),
            Some(12)
        );
        assert!(select_schema("INSERT INTO bookings ...").is_none());
    }

    #[test]
    fn sqlstate_mapping_is_stable() {
        let cases = [
            (EngineError::Validation("x".into()), "22023"),
            (EngineError::NotFound(Ulid::new()), "P0002"),
            (EngineError::ResourceUnavailable(Ulid::new()), "55006"),
            (EngineError::Conflict("x".into()), "23505"),
            (
                EngineError::InvalidTransition { from: "pending", to: "completed" },
                "55000",
            ),
            (EngineError::Forbidden("x".into()), "42501"),
            (EngineError::LimitExceeded("x"), "54000"),
        ];
        for (err, code) in cases {
            match engine_err(err) {
                PgWireError::UserError(info) => assert_eq!(info.code, code),
                other => panic!("expected UserError, got {other:?}"),
            }
        }
    }
}
