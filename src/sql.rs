use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingFilter, BookingStatus, ResourcePatch, ResourceStatus};

/// Parsed command from SQL input. The dialect is positional INSERTs,
/// id-keyed UPDATEs/DELETEs and filtered SELECTs over virtual tables.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        id: Ulid,
        name: String,
        category: String,
        capacity: u32,
        location: String,
    },
    UpdateResource {
        id: Ulid,
        patch: ResourcePatch,
    },
    DeleteResource {
        id: Ulid,
    },
    SelectResources,
    InsertSlot {
        id: Ulid,
        label: String,
        start: NaiveTime,
        end: NaiveTime,
    },
    SelectSlots,
    InsertBooking {
        id: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
        slot_id: Ulid,
        purpose: String,
    },
    InsertCustomBooking {
        id: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
        label: String,
        start: NaiveTime,
        end: NaiveTime,
        purpose: String,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
        reason: Option<String>,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectAvailability {
        resource_id: Ulid,
        date: NaiveDate,
    },
    InsertUsage {
        booking_id: Ulid,
        remarks: String,
        issues: Option<String>,
    },
    SelectStats {
        date: NaiveDate,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "resources" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("resources", 5, values.len()));
            }
            Ok(Command::InsertResource {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                category: parse_string(&values[2])?,
                capacity: parse_u32(&values[3])?,
                location: parse_string(&values[4])?,
            })
        }
        "time_slots" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("time_slots", 4, values.len()));
            }
            Ok(Command::InsertSlot {
                id: parse_ulid(&values[0])?,
                label: parse_string(&values[1])?,
                start: parse_time(&values[2])?,
                end: parse_time(&values[3])?,
            })
        }
        "bookings" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("bookings", 5, values.len()));
            }
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                resource_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                slot_id: parse_ulid(&values[3])?,
                purpose: parse_string(&values[4])?,
            })
        }
        "custom_bookings" => {
            if values.len() < 7 {
                return Err(SqlError::WrongArity("custom_bookings", 7, values.len()));
            }
            Ok(Command::InsertCustomBooking {
                id: parse_ulid(&values[0])?,
                resource_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                label: parse_string(&values[3])?,
                start: parse_time(&values[4])?,
                end: parse_time(&values[5])?,
                purpose: parse_string(&values[6])?,
            })
        }
        "usage_records" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("usage_records", 2, values.len()));
            }
            let issues = if values.len() >= 3 {
                parse_string_or_null(&values[2])?
            } else {
                None
            };
            Ok(Command::InsertUsage {
                booking_id: parse_ulid(&values[0])?,
                remarks: parse_string(&values[1])?,
                issues,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "resources" => Ok(Command::DeleteResource { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "resources" => {
            let mut patch = ResourcePatch::default();
            for assignment in assignments {
                let col = assignment_column(assignment)
                    .ok_or_else(|| SqlError::Parse("bad assignment target".into()))?;
                match col.as_str() {
                    "name" => patch.name = Some(parse_string(&assignment.value)?),
                    "category" => patch.category = Some(parse_string(&assignment.value)?),
                    "capacity" => patch.capacity = Some(parse_u32(&assignment.value)?),
                    "location" => patch.location = Some(parse_string(&assignment.value)?),
                    "status" => {
                        let s = parse_string(&assignment.value)?;
                        let status = ResourceStatus::parse(&s)
                            .ok_or_else(|| SqlError::Parse(format!("bad resource status: {s}")))?;
                        patch.status = Some(status);
                    }
                    other => {
                        return Err(SqlError::Parse(format!("unknown resource column: {other}")))
                    }
                }
            }
            if patch.is_empty() {
                return Err(SqlError::Parse("UPDATE without assignments".into()));
            }
            Ok(Command::UpdateResource { id, patch })
        }
        "bookings" => {
            let mut status = None;
            let mut reason = None;
            for assignment in assignments {
                let col = assignment_column(assignment)
                    .ok_or_else(|| SqlError::Parse("bad assignment target".into()))?;
                match col.as_str() {
                    "status" => {
                        let s = parse_string(&assignment.value)?;
                        status = Some(
                            BookingStatus::parse(&s)
                                .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                        );
                    }
                    "reason" => reason = parse_string_or_null(&assignment.value)?,
                    other => {
                        return Err(SqlError::Parse(format!("unknown booking column: {other}")))
                    }
                }
            }
            let status = status.ok_or(SqlError::MissingFilter("status"))?;
            Ok(Command::UpdateBookingStatus { id, status, reason })
        }
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
        "resources" => Ok(Command::SelectResources),
        "time_slots" => Ok(Command::SelectSlots),
        "availability" => {
            let (mut resource_id, mut date) = (None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut resource_id, &mut date)?;
            }
            Ok(Command::SelectAvailability {
                resource_id: resource_id.ok_or(SqlError::MissingFilter("resource_id"))?,
                date: date.ok_or(SqlError::MissingFilter("date"))?,
            })
        }
        "bookings" => {
            let mut filter = BookingFilter::default();
            if let Some(selection) = &select.selection {
                extract_booking_filters(selection, &mut filter)?;
            }
            Ok(Command::SelectBookings { filter })
        }
        "stats" => {
            let (mut resource_id, mut date) = (None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut resource_id, &mut date)?;
            }
            Ok(Command::SelectStats {
                date: date.ok_or(SqlError::MissingFilter("date"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_availability_filters(
    expr: &Expr,
    resource_id: &mut Option<Ulid>,
    date: &mut Option<NaiveDate>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, resource_id, date)?;
                extract_availability_filters(right, resource_id, date)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left);
                if col.as_deref() == Some("resource_id") {
                    *resource_id = Some(parse_ulid(right)?);
                } else if col.as_deref() == Some("date") {
                    *date = Some(parse_date(right)?);
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(())
}

fn extract_booking_filters(expr: &Expr, filter: &mut BookingFilter) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_booking_filters(left, filter)?;
                extract_booking_filters(right, filter)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("user") => filter.user = Some(parse_string(right)?),
                Some("resource_id") => filter.resource_id = Some(parse_ulid(right)?),
                Some("status") => {
                    let s = parse_string(right)?;
                    filter.status = Some(
                        BookingStatus::parse(&s)
                            .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                    );
                }
                Some("date") => filter.date = Some(parse_date(right)?),
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    filter.from = Some(parse_date(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    filter.to = Some(parse_date(right)?);
                }
            }
            _ => {}
        },
        _ => {}
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

fn assignment_column(assignment: &ast::Assignment) -> Option<String> {
    match &assignment.target {
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            Value::Number(s, _) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr)
        && matches!(value, Value::Null)
    {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time {s:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_resource() {
        let sql = format!(
            "INSERT INTO resources (id, name, category, capacity, location) \
             VALUES ('{ID}', 'Main Ground', 'ground', 50, 'Campus North')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertResource {
                id,
                name,
                category,
                capacity,
                location,
            } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(name, "Main Ground");
                assert_eq!(category, "ground");
                assert_eq!(capacity, 50);
                assert_eq!(location, "Campus North");
            }
            _ => panic!("expected InsertResource, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_resource_wrong_arity() {
        let sql = format!("INSERT INTO resources (id) VALUES ('{ID}')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("resources", 5, 1))
        ));
    }

    #[test]
    fn parse_update_resource_patch() {
        let sql = format!(
            "UPDATE resources SET status = 'maintenance', capacity = 10 WHERE id = '{ID}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateResource { id, patch } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(patch.status, Some(ResourceStatus::Maintenance));
                assert_eq!(patch.capacity, Some(10));
                assert_eq!(patch.name, None);
            }
            _ => panic!("expected UpdateResource, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_resource_bad_status() {
        let sql = format!("UPDATE resources SET status = 'broken' WHERE id = '{ID}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_delete_resource() {
        let sql = format!("DELETE FROM resources WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::DeleteResource { .. }));
    }

    #[test]
    fn parse_insert_slot() {
        let sql = format!(
            "INSERT INTO time_slots (id, label, start, \"end\") \
             VALUES ('{ID}', 'Morning', '08:00', '10:00')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertSlot { label, start, end, .. } => {
                assert_eq!(label, "Morning");
                assert_eq!(start, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
                assert_eq!(end, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
            }
            _ => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_time_with_seconds() {
        let sql = format!(
            "INSERT INTO time_slots (id, label, start, \"end\") \
             VALUES ('{ID}', 'Morning', '08:00:00', '10:30:00')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertSlot { end, .. } => {
                assert_eq!(end, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
            }
            _ => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, resource_id, date, slot_id, purpose) \
             VALUES ('{ID}', '{ID}', '2026-01-10', '{ID}', 'club training')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking { date, purpose, .. } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());
                assert_eq!(purpose, "club training");
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_custom_booking() {
        let sql = format!(
            "INSERT INTO custom_bookings (id, resource_id, date, label, start, \"end\", purpose) \
             VALUES ('{ID}', '{ID}', '2026-01-10', '', '09:00', '11:00', 'workshop')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertCustomBooking { label, start, end, .. } => {
                assert_eq!(label, "");
                assert_eq!(start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
                assert_eq!(end, NaiveTime::from_hms_opt(11, 0, 0).unwrap());
            }
            _ => panic!("expected InsertCustomBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_bad_date_errors() {
        let sql = format!(
            "INSERT INTO bookings (id, resource_id, date, slot_id, purpose) \
             VALUES ('{ID}', '{ID}', 'tomorrow', '{ID}', 'x')"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_update_booking_status() {
        let sql = format!("UPDATE bookings SET status = 'approved' WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateBookingStatus { status, reason, .. } => {
                assert_eq!(status, BookingStatus::Approved);
                assert_eq!(reason, None);
            }
            _ => panic!("expected UpdateBookingStatus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking_status_with_reason() {
        let sql = format!(
            "UPDATE bookings SET status = 'rejected', reason = 'no staff' WHERE id = '{ID}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateBookingStatus { status, reason, .. } => {
                assert_eq!(status, BookingStatus::Rejected);
                assert_eq!(reason.as_deref(), Some("no staff"));
            }
            _ => panic!("expected UpdateBookingStatus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking_requires_status() {
        let sql = format!("UPDATE bookings SET reason = 'why' WHERE id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("status"))
        ));
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE bookings SET status = 'approved' WHERE user = 'carol'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete_booking() {
        let sql = format!("DELETE FROM bookings WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::DeleteBooking { .. }));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE resource_id = '{ID}' AND date = '2026-01-10'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability { resource_id, date } => {
                assert_eq!(resource_id.to_string(), ID);
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_date() {
        let sql = format!("SELECT * FROM availability WHERE resource_id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("date"))
        ));
    }

    #[test]
    fn parse_select_bookings_with_filters() {
        let sql = format!(
            "SELECT * FROM bookings WHERE user = 'carol' AND resource_id = '{ID}' \
             AND status = 'pending' AND date >= '2026-01-01' AND date <= '2026-01-31'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectBookings { filter } => {
                assert_eq!(filter.user.as_deref(), Some("carol"));
                assert_eq!(filter.resource_id.map(|u| u.to_string()), Some(ID.into()));
                assert_eq!(filter.status, Some(BookingStatus::Pending));
                assert_eq!(filter.from, Some(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()));
                assert_eq!(filter.to, Some(NaiveDate::from_ymd_opt(2026, 1, 31).unwrap()));
                assert_eq!(filter.date, None);
            }
            _ => panic!("expected SelectBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_bookings_unfiltered() {
        let cmd = parse_sql("SELECT * FROM bookings").unwrap();
        assert_eq!(
            cmd,
            Command::SelectBookings { filter: BookingFilter::default() }
        );
    }

    #[test]
    fn parse_select_resources_and_slots() {
        assert!(matches!(
            parse_sql("SELECT * FROM resources").unwrap(),
            Command::SelectResources
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM time_slots").unwrap(),
            Command::SelectSlots
        ));
    }

    #[test]
    fn parse_insert_usage() {
        let sql = format!(
            "INSERT INTO usage_records (booking_id, remarks, issues) \
             VALUES ('{ID}', 'left clean', NULL)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertUsage { remarks, issues, .. } => {
                assert_eq!(remarks, "left clean");
                assert_eq!(issues, None);
            }
            _ => panic!("expected InsertUsage, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_stats() {
        let cmd = parse_sql("SELECT * FROM stats WHERE date = '2026-01-10'").unwrap();
        match cmd {
            Command::SelectStats { date } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());
            }
            _ => panic!("expected SelectStats, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_listen() {
        let sql = format!("LISTEN resource_{ID}");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::Listen { channel } => {
                assert_eq!(channel, format!("resource_{ID}"));
            }
            _ => panic!("expected Listen, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
