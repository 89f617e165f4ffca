use std::fmt::Write;

use crate::backend::Aggregate;
use crate::cond::OrderBy;
use crate::model::ModelMeta;
use crate::query::Query;
use crate::value::{Row, Value};

pub(crate) fn esc(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn cols(meta: &ModelMeta) -> String {
    if meta.columns.is_empty() {
        return "*".to_owned();
    }
    meta.columns
        .iter()
        .map(|c| esc(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn write_where(query: &Query, binds: &mut Vec<Value>) -> String {
    match query.where_cond() {
        Some(cond) => {
            let mut buf = String::from(" WHERE ");
            cond.write(&mut buf, binds);
            buf.truncate(buf.len() - 5);
            buf
        }
        None => String::new(),
    }
}

fn write_limit(sql: &mut String, query: &Query) {
    match (query.limit(), query.offset()) {
        (Some(limit), Some(offset)) => {
            let _ = write!(sql, " LIMIT {} OFFSET {}", limit, offset);
        }
        (Some(limit), None) => {
            let _ = write!(sql, " LIMIT {}", limit);
        }
        (None, Some(offset)) => {
            let _ = write!(sql, " LIMIT -1 OFFSET {}", offset);
        }
        (None, None) => {}
    }
}

pub(crate) fn select_sql(meta: &ModelMeta, query: &Query, binds: &mut Vec<Value>) -> String {
    let mut sql = format!(
        "SELECT {} FROM {}{}{}",
        cols(meta),
        esc(&meta.table),
        write_where(query, binds),
        OrderBy::write_order_by(query.order_by())
    );
    write_limit(&mut sql, query);
    sql
}

/// Primary keys of the matching rows; used when a write has to honour ordering or slicing.
fn pk_subquery(meta: &ModelMeta, query: &Query, binds: &mut Vec<Value>) -> String {
    let mut sql = format!(
        "SELECT {} FROM {}{}{}",
        esc(&meta.primary_key),
        esc(&meta.table),
        write_where(query, binds),
        OrderBy::write_order_by(query.order_by())
    );
    write_limit(&mut sql, query);
    sql
}

fn write_target(meta: &ModelMeta, query: &Query, binds: &mut Vec<Value>) -> String {
    if query.is_sliced() || !query.order_by().is_empty() {
        format!(
            " WHERE {} IN ({})",
            esc(&meta.primary_key),
            pk_subquery(meta, query, binds)
        )
    } else {
        write_where(query, binds)
    }
}

pub(crate) fn count_sql(meta: &ModelMeta, query: &Query, binds: &mut Vec<Value>) -> String {
    if query.is_sliced() {
        let mut inner = format!(
            "SELECT 1 FROM {}{}",
            esc(&meta.table),
            write_where(query, binds)
        );
        write_limit(&mut inner, query);
        format!("SELECT COUNT(*) FROM ({}) AS _t", inner)
    } else {
        format!(
            "SELECT COUNT(*) FROM {}{}",
            esc(&meta.table),
            write_where(query, binds)
        )
    }
}

pub(crate) fn aggregate_sql(
    meta: &ModelMeta,
    query: &Query,
    aggregate: &Aggregate,
    binds: &mut Vec<Value>,
) -> String {
    let (func, col) = match aggregate {
        Aggregate::Count(c) => ("COUNT", c),
        Aggregate::Sum(c) => ("SUM", c),
        Aggregate::Min(c) => ("MIN", c),
        Aggregate::Max(c) => ("MAX", c),
    };
    let mut inner = format!(
        "SELECT {} FROM {}{}{}",
        esc(col),
        esc(&meta.table),
        write_where(query, binds),
        OrderBy::write_order_by(query.order_by())
    );
    write_limit(&mut inner, query);
    format!("SELECT {}({}) FROM ({}) AS _t", func, esc(col), inner)
}

pub(crate) fn insert_sql(meta: &ModelMeta, row: &Row, binds: &mut Vec<Value>) -> String {
    if row.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", esc(&meta.table));
    }
    let mut names = Vec::with_capacity(row.len());
    let mut marks = Vec::with_capacity(row.len());
    for (name, value) in row {
        names.push(esc(name));
        marks.push("?");
        binds.push(value.clone());
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        esc(&meta.table),
        names.join(", "),
        marks.join(", ")
    )
}

pub(crate) fn update_sql(
    meta: &ModelMeta,
    query: &Query,
    values: &[(String, Value)],
    binds: &mut Vec<Value>,
) -> String {
    let mut vec = Vec::with_capacity(values.len());
    for (name, value) in values {
        vec.push(format!("{} = ?", esc(name)));
        binds.push(value.clone());
    }
    format!(
        "UPDATE {} SET {}{}",
        esc(&meta.table),
        vec.join(", "),
        write_target(meta, query, binds)
    )
}

pub(crate) fn delete_sql(meta: &ModelMeta, query: &Query, binds: &mut Vec<Value>) -> String {
    format!(
        "DELETE FROM {}{}",
        esc(&meta.table),
        write_target(meta, query, binds)
    )
}
