use std::fmt;

#[derive(Debug)]
pub struct RowNotFound {
    pub table: String,
    pub filter: String,
}
impl RowNotFound {
    pub fn new(table: &str, filter: String) -> RowNotFound {
        RowNotFound {
            table: table.to_owned(),
            filter,
        }
    }
}
impl fmt::Display for RowNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row not found in {}: {}", self.table, self.filter)
    }
}
impl std::error::Error for RowNotFound {}

#[derive(Debug)]
pub struct MultipleRowsReturned {
    pub table: String,
    pub count: usize,
}
impl fmt::Display for MultipleRowsReturned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "get() returned more than one row from {} (at least {})",
            self.table, self.count
        )
    }
}
impl std::error::Error for MultipleRowsReturned {}

#[derive(Debug, PartialEq, Eq)]
pub enum PreconditionError {
    MissingPrimaryKey { table: String },
    LimitedDelete,
    SlicedUpdate,
    NotPermanent { table: String },
    UnknownColumn { table: String, column: String },
}
impl fmt::Display for PreconditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreconditionError::MissingPrimaryKey { table } => write!(
                f,
                "{} object can't be deleted because its primary key is not set",
                table
            ),
            PreconditionError::LimitedDelete => {
                write!(f, "Cannot use 'limit' or 'offset' with delete")
            }
            PreconditionError::SlicedUpdate => {
                write!(f, "Cannot update a query once a slice has been taken")
            }
            PreconditionError::NotPermanent { table } => {
                write!(f, "{} has no soft delete marker", table)
            }
            PreconditionError::UnknownColumn { table, column } => {
                write!(f, "Unknown column {} in {}", column, table)
            }
        }
    }
}
impl std::error::Error for PreconditionError {}

#[derive(Debug)]
pub struct ProtectedError {
    pub table: String,
    pub referenced_by: String,
    pub count: usize,
}
impl fmt::Display for ProtectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cannot delete some rows of {} because they are referenced by {} row(s) of {}",
            self.table, self.count, self.referenced_by
        )
    }
}
impl std::error::Error for ProtectedError {}

#[derive(Debug)]
pub struct IntegrityError {
    pub table: String,
    pub column: String,
}
impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UNIQUE constraint failed: {}.{}",
            self.table, self.column
        )
    }
}
impl std::error::Error for IntegrityError {}
