use std::fmt::Debug;
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

use crate::auth::SabhaAuthSource;
use crate::engine::{today, Engine};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, StatusChange};
use crate::venue::VenueManager;

pub struct SabhaHandler {
    venues: Arc<VenueManager>,
    query_parser: Arc<SabhaQueryParser>,
}

impl SabhaHandler {
    pub fn new(venues: Arc<VenueManager>) -> Self {
        Self {
            venues,
            query_parser: Arc::new(SabhaQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.venues.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("venue error: {e}"),
            )))
        })
    }

    /// The connection user is the session identity: `admin` is the approving
    /// authority, everyone else a requester. Verification happened at startup
    /// against the shared password; identity proofing stays external.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> Actor {
        let user = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_else(|| "anonymous".to_string());
        if user == "admin" {
            Actor::admin(user)
        } else {
            Actor::requester(user)
        }
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        actor: &Actor,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let today = today();
        match cmd {
            Command::InsertBooking {
                id,
                event_name,
                category,
                date,
                slot,
                vip_presence,
            } => {
                engine
                    .submit_booking(
                        id,
                        actor.requester.clone(),
                        event_name,
                        category,
                        date,
                        slot,
                        vip_presence,
                        today,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBooking { id, change, reason } => {
                match change {
                    StatusChange::Approve => engine.approve_booking(id, actor, today).await,
                    StatusChange::Reject => engine.reject_booking(id, actor, today).await,
                    StatusChange::Confirm => engine.confirm_booking(id, actor, today).await,
                    StatusChange::Pay => engine.pay_booking(id, actor, today).await,
                    StatusChange::Cancel => engine.cancel_booking(id, actor, today).await,
                    StatusChange::Revoke => {
                        engine
                            .revoke_booking(id, reason.as_deref().unwrap_or(""), actor, today)
                            .await
                    }
                }
                .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CancelBooking { id } => {
                engine
                    .cancel_booking(id, actor, today)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBlock {
                id,
                date,
                reason,
                kind,
            } => {
                engine
                    .create_block(id, date, reason, kind, actor, today)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteBlock { id } => {
                engine.lift_block(id, actor).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectSlots => {
                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = Slot::CATALOG
                    .iter()
                    .map(|slot| {
                        let (start, end) = slot.window();
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.id())?;
                        encoder.encode_field(&slot.label())?;
                        encoder.encode_field(&start.to_string())?;
                        encoder.encode_field(&end.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { requester, date } => {
                let bookings = match (requester, date) {
                    (Some(name), None) => engine.bookings_for_requester(&name).await,
                    (None, Some(date)) => engine.bookings_on(date).await,
                    (Some(name), Some(date)) => engine
                        .bookings_on(date)
                        .await
                        .into_iter()
                        .filter(|b| b.requester == name)
                        .collect(),
                    // Unfiltered listing is the requester's own dashboard;
                    // only the admin sees everything.
                    (None, None) if actor.is_admin() => engine.list_bookings().await,
                    (None, None) => engine.bookings_for_requester(&actor.requester).await,
                };
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.requester)?;
                        encoder.encode_field(&b.event_name)?;
                        encoder.encode_field(&b.category.as_str())?;
                        encoder.encode_field(&b.date.to_string())?;
                        encoder.encode_field(&b.slot.id())?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.vip_presence)?;
                        encoder.encode_field(&b.refund.map(|r| r.as_str().to_string()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBlocks { date } => {
                let blocks = match date {
                    Some(date) => engine.blocks_on(date).await,
                    None => engine.list_blocks().await,
                };
                let schema = Arc::new(blocks_schema());
                let rows: Vec<PgWireResult<_>> = blocks
                    .iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.date.to_string())?;
                        encoder.encode_field(&b.reason)?;
                        encoder.encode_field(&b.kind.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability { date } => {
                let statuses = engine.slot_statuses(date).await;
                let schema = Arc::new(availability_schema());
                let date_str = date.to_string();
                let rows: Vec<PgWireResult<_>> = statuses
                    .iter()
                    .map(|(slot, status)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&date_str)?;
                        encoder.encode_field(&slot.id())?;
                        encoder.encode_field(&status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectCalendar { from, to } => {
                let summaries = engine.calendar(from, to).await.map_err(engine_err)?;
                let schema = Arc::new(calendar_schema());
                let rows: Vec<PgWireResult<_>> = summaries
                    .iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.date.to_string())?;
                        encoder.encode_field(&s.status.as_str())?;
                        encoder.encode_field(&s.morning.as_str())?;
                        encoder.encode_field(&s.evening.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

// ── Row schemas ──────────────────────────────────────────────────

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("label"),
        varchar("start_time"),
        varchar("end_time"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("requester"),
        varchar("event_name"),
        varchar("category"),
        varchar("date"),
        varchar("slot"),
        varchar("status"),
        FieldInfo::new("vip".into(), None, None, Type::BOOL, FieldFormat::Text),
        varchar("refund"),
    ]
}

fn blocks_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("date"),
        varchar("reason"),
        varchar("type"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![varchar("date"), varchar("slot"), varchar("status")]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        varchar("date"),
        varchar("status"),
        varchar("slot1"),
        varchar("slot2"),
    ]
}

/// Schema for a SELECT statement, judged by the table it names.
fn select_schema(sql_upper: &str) -> Vec<FieldInfo> {
    if !sql_upper.contains("SELECT") {
        return vec![];
    }
    if sql_upper.contains("AVAILABILITY") {
        availability_schema()
    } else if sql_upper.contains("CALENDAR") {
        calendar_schema()
    } else if sql_upper.contains("BOOKINGS") {
        bookings_schema()
    } else if sql_upper.contains("BLOCKS") {
        blocks_schema()
    } else if sql_upper.contains("SLOTS") {
        slots_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for SabhaHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client);
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
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SabhaQueryParser;

#[async_trait]
impl QueryParser for SabhaQueryParser {
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
        Ok(select_schema(&stmt.to_uppercase()))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SabhaHandler {
    type Statement = String;
    type QueryParser = SabhaQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, &actor, cmd).await?;
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
            select_schema(&target.statement.to_uppercase()),
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
        Ok(DescribePortalResponse::new(select_schema(
            &target.statement.statement.to_uppercase(),
        )))
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

pub struct SabhaFactory {
    handler: Arc<SabhaHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SabhaAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SabhaFactory {
    pub fn new(venues: Arc<VenueManager>, password: String) -> Self {
        let auth_source = SabhaAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SabhaHandler::new(venues)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SabhaFactory {
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

/// Serve one accepted TCP connection for its whole lifetime.
pub async fn process_connection(
    socket: TcpStream,
    venues: Arc<VenueManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = SabhaFactory::new(venues, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
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
