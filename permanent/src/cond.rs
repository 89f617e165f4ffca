use std::cmp::Ordering;

use crate::sql::esc;
use crate::value::{Row, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum Cond {
    IsNull(String),
    IsNotNull(String),
    Eq(String, Value),
    NotEq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Like(String, String),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    Not(Box<Cond>),
    And(Vec<Cond>),
    Or(Vec<Cond>),
}

impl Cond {
    pub fn new_and() -> Cond {
        Cond::And(vec![])
    }
    pub fn new_or() -> Cond {
        Cond::Or(vec![])
    }
    /// `col = value`, or `col IS NULL` when the value is NULL.
    pub fn eq<V: Into<Value>>(col: &str, value: V) -> Cond {
        match value.into() {
            Value::Null => Cond::IsNull(col.to_owned()),
            v => Cond::Eq(col.to_owned(), v),
        }
    }
    /// `col != value`, or `col IS NOT NULL` when the value is NULL.
    pub fn not_eq<V: Into<Value>>(col: &str, value: V) -> Cond {
        match value.into() {
            Value::Null => Cond::IsNotNull(col.to_owned()),
            v => Cond::NotEq(col.to_owned(), v),
        }
    }
    pub fn and(self, cond: Cond) -> Cond {
        match self {
            Cond::And(mut v) => {
                v.push(cond);
                Cond::And(v)
            }
            c => Cond::And(vec![c, cond]),
        }
    }
    pub fn or(self, cond: Cond) -> Cond {
        match self {
            Cond::Or(mut v) => {
                v.push(cond);
                Cond::Or(v)
            }
            c => Cond::Or(vec![c, cond]),
        }
    }
    pub fn add(&mut self, cond: Cond) {
        match self {
            Cond::And(v) | Cond::Or(v) => v.push(cond),
            c => {
                let old = std::mem::replace(c, Cond::new_and());
                *c = Cond::And(vec![old, cond]);
            }
        }
    }

    /// Column names referenced anywhere in the tree.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns<'a>(&'a self, cols: &mut Vec<&'a str>) {
        match self {
            Cond::IsNull(c)
            | Cond::IsNotNull(c)
            | Cond::Eq(c, _)
            | Cond::NotEq(c, _)
            | Cond::Gt(c, _)
            | Cond::Gte(c, _)
            | Cond::Lt(c, _)
            | Cond::Lte(c, _)
            | Cond::Like(c, _)
            | Cond::In(c, _)
            | Cond::NotIn(c, _) => cols.push(c),
            Cond::Not(c) => c.collect_columns(cols),
            Cond::And(v) | Cond::Or(v) => v.iter().for_each(|c| c.collect_columns(cols)),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.eval(row) == Some(true)
    }

    /// Three-valued evaluation; `None` is SQL UNKNOWN.
    pub fn eval(&self, row: &Row) -> Option<bool> {
        let get = |c: &String| row.get(c).unwrap_or(&Value::Null);
        match self {
            Cond::IsNull(c) => Some(get(c).is_null()),
            Cond::IsNotNull(c) => Some(!get(c).is_null()),
            Cond::Eq(c, v) => get(c).sql_eq(v),
            Cond::NotEq(c, v) => get(c).sql_eq(v).map(|b| !b),
            Cond::Gt(c, v) => get(c).compare(v).map(|o| o == Ordering::Greater),
            Cond::Gte(c, v) => get(c).compare(v).map(|o| o != Ordering::Less),
            Cond::Lt(c, v) => get(c).compare(v).map(|o| o == Ordering::Less),
            Cond::Lte(c, v) => get(c).compare(v).map(|o| o != Ordering::Greater),
            Cond::Like(c, pattern) => match get(c) {
                Value::Null => None,
                Value::Text(s) => Some(like(s, pattern)),
                v => Some(like(&v.to_string(), pattern)),
            },
            Cond::In(c, list) => in_list(get(c), list),
            Cond::NotIn(c, list) => in_list(get(c), list).map(|b| !b),
            Cond::Not(c) => c.eval(row).map(|b| !b),
            Cond::And(v) => {
                let mut result = Some(true);
                for c in v {
                    match c.eval(row) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Cond::Or(v) => {
                let mut result = Some(false);
                for c in v {
                    match c.eval(row) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
        }
    }

    pub(crate) fn write(&self, buf: &mut String, binds: &mut Vec<Value>) {
        match self {
            Cond::IsNull(c) => {
                buf.push_str(&esc(c));
                buf.push_str(" IS NULL AND ");
            }
            Cond::IsNotNull(c) => {
                buf.push_str(&esc(c));
                buf.push_str(" IS NOT NULL AND ");
            }
            Cond::Eq(c, v) => write_op(buf, binds, c, " = ? AND ", v),
            Cond::NotEq(c, v) => write_op(buf, binds, c, " != ? AND ", v),
            Cond::Gt(c, v) => write_op(buf, binds, c, " > ? AND ", v),
            Cond::Gte(c, v) => write_op(buf, binds, c, " >= ? AND ", v),
            Cond::Lt(c, v) => write_op(buf, binds, c, " < ? AND ", v),
            Cond::Lte(c, v) => write_op(buf, binds, c, " <= ? AND ", v),
            Cond::Like(c, v) => {
                write_op(buf, binds, c, " LIKE ? AND ", &Value::Text(v.clone()))
            }
            Cond::In(c, list) => {
                if !list.is_empty() {
                    buf.push_str(&esc(c));
                    buf.push_str(" IN (");
                    write_list(buf, binds, list);
                    buf.push_str(") AND ");
                } else {
                    buf.push_str("false AND ");
                }
            }
            Cond::NotIn(c, list) => {
                if !list.is_empty() {
                    buf.push_str(&esc(c));
                    buf.push_str(" NOT IN (");
                    write_list(buf, binds, list);
                    buf.push_str(") AND ");
                } else {
                    buf.push_str("true AND ");
                }
            }
            Cond::Not(c) => {
                buf.push_str("NOT (");
                c.write(buf, binds);
                buf.truncate(buf.len() - 5);
                buf.push_str(") AND ");
            }
            Cond::And(v) => {
                if !v.is_empty() {
                    buf.push('(');
                    for c in v.iter() {
                        c.write(buf, binds);
                    }
                    buf.truncate(buf.len() - 5);
                    buf.push_str(") AND ");
                } else {
                    buf.push_str("true AND ");
                }
            }
            Cond::Or(v) => {
                if !v.is_empty() {
                    buf.push('(');
                    for c in v.iter() {
                        c.write(buf, binds);
                        buf.truncate(buf.len() - 5);
                        buf.push_str(" OR ");
                    }
                    buf.truncate(buf.len() - 4);
                    buf.push_str(") AND ");
                } else {
                    buf.push_str("false AND ");
                }
            }
        }
    }
}

fn write_op(buf: &mut String, binds: &mut Vec<Value>, col: &str, op: &str, value: &Value) {
    buf.push_str(&esc(col));
    buf.push_str(op);
    binds.push(value.clone());
}

fn write_list(buf: &mut String, binds: &mut Vec<Value>, list: &[Value]) {
    for v in list {
        buf.push_str("?,");
        binds.push(v.clone());
    }
    buf.truncate(buf.len() - 1);
}

fn in_list(value: &Value, list: &[Value]) -> Option<bool> {
    if value.is_null() {
        return if list.is_empty() { Some(false) } else { None };
    }
    let mut result = Some(false);
    for v in list {
        match value.sql_eq(v) {
            Some(true) => return Some(true),
            None if v.is_null() => result = None,
            _ => {}
        }
    }
    result
}

/// SQL LIKE with `%` and `_`, ASCII case-insensitive like SQLite.
fn like(s: &str, pattern: &str) -> bool {
    let s: Vec<char> = s.chars().map(|c| c.to_ascii_lowercase()).collect();
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let (mut si, mut pi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while si < s.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == s[si]) {
            si += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, si));
            pi += 1;
        } else if let Some((sp, ss)) = star {
            pi = sp + 1;
            si = ss + 1;
            star = Some((sp, ss + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

#[derive(Clone, Debug, PartialEq)]
pub enum OrderBy {
    Asc(String),
    Desc(String),
}

impl OrderBy {
    pub fn asc(col: &str) -> OrderBy {
        OrderBy::Asc(col.to_owned())
    }
    pub fn desc(col: &str) -> OrderBy {
        OrderBy::Desc(col.to_owned())
    }
    pub fn column(&self) -> &str {
        match self {
            OrderBy::Asc(c) | OrderBy::Desc(c) => c,
        }
    }
    fn write(&self, buf: &mut String) {
        match self {
            OrderBy::Asc(c) => {
                buf.push_str(&esc(c));
                buf.push_str(" ASC, ");
            }
            OrderBy::Desc(c) => {
                buf.push_str(&esc(c));
                buf.push_str(" DESC, ");
            }
        };
    }
    pub(crate) fn write_order_by(order_by: &[OrderBy]) -> String {
        if order_by.is_empty() {
            return String::new();
        }
        let mut s = String::with_capacity(100);
        s.push_str(" ORDER BY ");
        for o in order_by {
            o.write(&mut s);
        }
        s.truncate(s.len() - 2);
        s
    }
    /// Compares two rows by a list of orderings, NULLs first like SQLite.
    pub fn cmp_rows(order_by: &[OrderBy], a: &Row, b: &Row) -> Ordering {
        for o in order_by {
            let va = a.get(o.column()).unwrap_or(&Value::Null);
            let vb = b.get(o.column()).unwrap_or(&Value::Null);
            let ord = match (va.is_null(), vb.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => va.compare(vb).unwrap_or(Ordering::Equal),
            };
            let ord = match o {
                OrderBy::Asc(_) => ord,
                OrderBy::Desc(_) => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[macro_export]
macro_rules! cond {
    (($($t:tt)*)) => ($crate::cond!($($t)*));
    (NOT $t:tt) => ($crate::Cond::Not(std::boxed::Box::new($crate::cond!($t))));
    ($i:ident IS NULL) => ($crate::Cond::IsNull(stringify!($i).to_owned()));
    ($i:ident IS NOT NULL) => ($crate::Cond::IsNotNull(stringify!($i).to_owned()));
    ($i:ident = $e:expr) => ($crate::Cond::eq(stringify!($i), $e));
    ($i:ident != $e:expr) => ($crate::Cond::not_eq(stringify!($i), $e));
    ($i:ident > $e:expr) => ($crate::Cond::Gt(stringify!($i).to_owned(), $crate::Value::from($e)));
    ($i:ident >= $e:expr) => ($crate::Cond::Gte(stringify!($i).to_owned(), $crate::Value::from($e)));
    ($i:ident < $e:expr) => ($crate::Cond::Lt(stringify!($i).to_owned(), $crate::Value::from($e)));
    ($i:ident <= $e:expr) => ($crate::Cond::Lte(stringify!($i).to_owned(), $crate::Value::from($e)));
    ($i:ident LIKE $e:expr) => ($crate::Cond::Like(stringify!($i).to_owned(), ($e).to_string()));
    ($i:ident IN ( $($e:expr),* )) => ($crate::Cond::In(stringify!($i).to_owned(), vec![ $( $crate::Value::from($e) ),* ]));
    ($i:ident IN $e:expr) => ($crate::Cond::In(stringify!($i).to_owned(), $e.into_iter().map($crate::Value::from).collect()));
    ($i:ident NOT IN ( $($e:expr),* )) => ($crate::Cond::NotIn(stringify!($i).to_owned(), vec![ $( $crate::Value::from($e) ),* ]));
    ($i:ident NOT IN $e:expr) => ($crate::Cond::NotIn(stringify!($i).to_owned(), $e.into_iter().map($crate::Value::from).collect()));
    ($t1:tt AND $($t2:tt)AND+) => ($crate::Cond::And(vec![ $crate::cond!($t1), $( $crate::cond!($t2) ),* ]));
    ($t1:tt OR $($t2:tt)OR+) => ($crate::Cond::Or(vec![ $crate::cond!($t1), $( $crate::cond!($t2) ),* ]));
}
