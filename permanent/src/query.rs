use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};

use crate::cond::{Cond, OrderBy};
use crate::model::Marker;
use crate::value::Row;

/// Which rows of a permanent model a query sees.
#[derive(
    Debug, PartialEq, Eq, Serialize, Deserialize, Copy, Clone, Default, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ViewKind {
    /// Rows whose marker holds the alive sentinel.
    #[default]
    Active,
    /// Rows whose marker holds anything else.
    Deleted,
    /// Every row.
    All,
}

impl ViewKind {
    pub fn predicate(&self, marker: Option<&Marker>) -> Option<Cond> {
        let marker = marker?;
        match self {
            ViewKind::Active => Some(marker.alive_cond()),
            ViewKind::Deleted => Some(Cond::Not(Box::new(marker.alive_cond()))),
            ViewKind::All => None,
        }
    }
}

/// A filter tree plus ordering and slicing.
///
/// The view predicate is kept apart from the caller's conditions so that it
/// can be located and removed again without walking the tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    view_cond: Option<Cond>,
    conditions: Vec<Cond>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Query {
    pub fn new() -> Query {
        Query::default()
    }

    pub fn add_cond(&mut self, cond: Cond) {
        self.conditions.push(cond);
    }

    pub fn view_cond(&self) -> Option<&Cond> {
        self.view_cond.as_ref()
    }

    /// Removes the view predicate; false when there was none.
    pub fn remove_view_cond(&mut self) -> bool {
        self.view_cond.take().is_some()
    }

    pub fn conditions(&self) -> &[Cond] {
        &self.conditions
    }

    pub fn has_where(&self) -> bool {
        self.view_cond.is_some() || !self.conditions.is_empty()
    }

    /// The complete filter, view predicate first; `None` matches everything.
    pub fn where_cond(&self) -> Option<Cond> {
        let mut list: Vec<Cond> = self.view_cond.iter().cloned().collect();
        list.extend(self.conditions.iter().cloned());
        match list.len() {
            0 => None,
            1 => list.pop(),
            _ => Some(Cond::And(list)),
        }
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn set_order_by(&mut self, order_by: Vec<OrderBy>) {
        self.order_by = order_by;
    }

    pub fn clear_ordering(&mut self) {
        self.order_by.clear();
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Option<u64>) {
        self.offset = offset;
    }

    pub fn is_sliced(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// Filtering, updating or deleting is allowed only on an unsliced query.
    pub fn can_filter(&self) -> bool {
        !self.is_sliced()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.view_cond.as_ref().map_or(true, |c| c.matches(row))
            && self.conditions.iter().all(|c| c.matches(row))
    }

    /// Applies the ordering and slicing to already filtered rows.
    pub fn arrange(&self, mut rows: Vec<Row>) -> Vec<Row> {
        if !self.order_by.is_empty() {
            rows.sort_by(|a, b| OrderBy::cmp_rows(&self.order_by, a, b));
        }
        let offset = self.offset.unwrap_or(0) as usize;
        let rows = rows.into_iter().skip(offset);
        match self.limit {
            Some(limit) => rows.take(limit as usize).collect(),
            None => rows.collect(),
        }
    }
}

/// Installs the view predicate of `kind` on a fresh query.
///
/// A query that already carries conditions is returned untouched.
pub fn apply_view(mut query: Query, kind: ViewKind, marker: Option<&Marker>) -> Query {
    if query.has_where() {
        return query;
    }
    query.view_cond = kind.predicate(marker);
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoftDelete;
    use crate::cond;
    use crate::value::Value;

    fn row(id: i64, removed: Value) -> Row {
        let mut r = Row::new();
        r.insert("id".into(), Value::Int(id));
        r.insert("removed".into(), removed);
        r
    }

    #[test]
    fn test_apply_view() {
        let marker = Marker::new("removed", SoftDelete::Time);
        let q = apply_view(Query::new(), ViewKind::Active, Some(&marker));
        assert_eq!(q.view_cond(), Some(&cond!(removed IS NULL)));
        let q = apply_view(Query::new(), ViewKind::Deleted, Some(&marker));
        assert_eq!(q.where_cond(), Some(cond!(NOT (removed IS NULL))));
        let q = apply_view(Query::new(), ViewKind::All, Some(&marker));
        assert_eq!(q.where_cond(), None);
        let q = apply_view(Query::new(), ViewKind::Active, None);
        assert_eq!(q.where_cond(), None);

        let mut filtered = Query::new();
        filtered.add_cond(cond!(id = 1));
        let q = apply_view(filtered.clone(), ViewKind::Active, Some(&marker));
        assert_eq!(q, filtered);
    }

    #[test]
    fn test_remove_view_cond() {
        let marker = Marker::new("removed", SoftDelete::Time);
        let mut q = apply_view(Query::new(), ViewKind::Active, Some(&marker));
        q.add_cond(cond!(id > 1));
        assert!(q.remove_view_cond());
        assert!(!q.remove_view_cond());
        assert_eq!(q.where_cond(), Some(cond!(id > 1)));
    }

    #[test]
    fn test_matches_and_arrange() {
        let marker = Marker::new("removed", SoftDelete::Time);
        let q = apply_view(Query::new(), ViewKind::Active, Some(&marker));
        let now = chrono::Utc::now().naive_utc();
        let rows = vec![row(1, Value::Null), row(2, Value::DateTime(now)), row(3, Value::Null)];
        let alive: Vec<Row> = rows.iter().filter(|r| q.matches(r)).cloned().collect();
        assert_eq!(alive.len(), 2);

        let mut q = Query::new();
        q.set_order_by(vec![OrderBy::desc("id")]);
        q.set_offset(Some(1));
        q.set_limit(Some(1));
        assert!(!q.can_filter());
        let arranged = q.arrange(rows);
        assert_eq!(arranged.len(), 1);
        assert_eq!(arranged[0]["id"], Value::Int(2));
    }
}
