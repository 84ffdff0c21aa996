use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{BlockKind, Category, Day, Slot};

/// Status value accepted by `UPDATE bookings SET status = ...`. Maps 1:1 to
/// a status-machine action; `revoked` is the administrative path and may
/// carry a `reason` assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Approve,
    Reject,
    Confirm,
    Pay,
    Cancel,
    Revoke,
}

impl StatusChange {
    fn parse(s: &str) -> Option<StatusChange> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(StatusChange::Approve),
            "rejected" => Some(StatusChange::Reject),
            "confirmed" => Some(StatusChange::Confirm),
            "paid" => Some(StatusChange::Pay),
            "cancelled" => Some(StatusChange::Cancel),
            "revoked" => Some(StatusChange::Revoke),
            _ => None,
        }
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBooking {
        id: Ulid,
        event_name: String,
        category: Category,
        date: Day,
        slot: Slot,
        vip_presence: bool,
    },
    UpdateBooking {
        id: Ulid,
        change: StatusChange,
        reason: Option<String>,
    },
    /// `DELETE FROM bookings` is the owner-withdrawal shorthand.
    CancelBooking {
        id: Ulid,
    },
    InsertBlock {
        id: Ulid,
        date: Day,
        reason: String,
        kind: BlockKind,
    },
    DeleteBlock {
        id: Ulid,
    },
    SelectSlots,
    SelectBookings {
        requester: Option<String>,
        date: Option<Day>,
    },
    SelectBlocks {
        date: Option<Day>,
    },
    SelectAvailability {
        date: Day,
    },
    SelectCalendar {
        from: Day,
        to: Day,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        // (id, event_name, category, date, slot [, vip])
        "bookings" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("bookings", 5, values.len()));
            }
            let vip_presence = if values.len() >= 6 {
                parse_bool(&values[5])?
            } else {
                false
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                event_name: parse_string(&values[1])?,
                category: parse_category(&values[2])?,
                date: parse_date(&values[3])?,
                slot: parse_slot(&values[4])?,
                vip_presence,
            })
        }
        // (id, date, reason, type)
        "blocks" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("blocks", 4, values.len()));
            }
            Ok(Command::InsertBlock {
                id: parse_ulid(&values[0])?,
                date: parse_date(&values[1])?,
                reason: parse_string(&values[2])?,
                kind: parse_block_kind(&values[3])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    let mut change = None;
    let mut reason = None;
    for a in assignments {
        match assignment_column(&a.target).as_deref() {
            Some("status") => {
                let s = parse_string(&a.value)?;
                change = Some(
                    StatusChange::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                );
            }
            Some("reason") => reason = Some(parse_string(&a.value)?),
            _ => return Err(SqlError::Unsupported("only status/reason may be set".into())),
        }
    }

    Ok(Command::UpdateBooking {
        id,
        change: change.ok_or(SqlError::MissingFilter("status"))?,
        reason,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "bookings" => Ok(Command::CancelBooking { id }),
        "blocks" => Ok(Command::DeleteBlock { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots),
        "bookings" => {
            let mut requester = None;
            let mut date = None;
            if let Some(selection) = &select.selection {
                extract_booking_filters(selection, &mut requester, &mut date)?;
            }
            Ok(Command::SelectBookings { requester, date })
        }
        "blocks" => {
            let mut requester = None;
            let mut date = None;
            if let Some(selection) = &select.selection {
                extract_booking_filters(selection, &mut requester, &mut date)?;
            }
            Ok(Command::SelectBlocks { date })
        }
        "availability" => {
            let mut requester = None;
            let mut date = None;
            if let Some(selection) = &select.selection {
                extract_booking_filters(selection, &mut requester, &mut date)?;
            }
            Ok(Command::SelectAvailability {
                date: date.ok_or(SqlError::MissingFilter("date"))?,
            })
        }
        "calendar" => {
            let (mut from, mut to) = (None, None);
            if let Some(selection) = &select.selection {
                extract_calendar_filters(selection, &mut from, &mut to)?;
            }
            Ok(Command::SelectCalendar {
                from: from.ok_or(SqlError::MissingFilter("date >="))?,
                to: to.ok_or(SqlError::MissingFilter("date <="))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_booking_filters(
    expr: &Expr,
    requester: &mut Option<String>,
    date: &mut Option<Day>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_booking_filters(left, requester, date)?;
                extract_booking_filters(right, requester, date)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left);
                if col.as_deref() == Some("requester") {
                    *requester = Some(parse_string(right)?);
                } else if col.as_deref() == Some("date") {
                    *date = Some(parse_date(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn extract_calendar_filters(
    expr: &Expr,
    from: &mut Option<Day>,
    to: &mut Option<Day>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_calendar_filters(left, from, to)?;
                extract_calendar_filters(right, from, to)?;
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    *from = Some(parse_date(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    *to = Some(parse_date(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(target: &ast::AssignmentTarget) -> Option<String> {
    match target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date(expr: &Expr) -> Result<Day, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_slot(expr: &Expr) -> Result<Slot, SqlError> {
    let s = parse_string(expr)?;
    Slot::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad slot: {s}")))
}

fn parse_category(expr: &Expr) -> Result<Category, SqlError> {
    let s = parse_string(expr)?;
    Category::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad category: {s}")))
}

fn parse_block_kind(expr: &Expr) -> Result<BlockKind, SqlError> {
    let s = parse_string(expr)?;
    BlockKind::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad block type: {s}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
