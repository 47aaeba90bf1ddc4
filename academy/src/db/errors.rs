use thiserror::Error;

/// Database failures the edge functions react to. Everything else is `Other`.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Entity not found")]
    NotFound,

    /// e.g. a provider message id recorded twice
    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error("Check constraint violation")]
    CheckViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// Name of the violated constraint, if this is a constraint error.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            Self::UniqueViolation { constraint, .. } | Self::CheckViolation { constraint, .. } => constraint.as_deref(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let sqlx::Error::Database(db_err) = &err else {
            return match err {
                sqlx::Error::RowNotFound => DbError::NotFound,
                other => DbError::Other(anyhow::Error::from(other)),
            };
        };

        let constraint = db_err.constraint().map(str::to_string);
        let table = db_err.table().map(str::to_string);
        let message = db_err.message().to_string();

        if db_err.is_unique_violation() {
            DbError::UniqueViolation { constraint, table, message }
        } else if db_err.is_check_violation() {
            DbError::CheckViolation { constraint, table, message }
        } else {
            DbError::Other(anyhow::Error::from(err))
        }
    }
}

/// Type alias for database operation results
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert!(matches!(DbError::from(sqlx::Error::RowNotFound), DbError::NotFound));
        assert!(matches!(DbError::from(sqlx::Error::PoolTimedOut), DbError::Other(_)));
    }

    #[test]
    fn test_constraint_name() {
        let err = DbError::UniqueViolation {
            constraint: Some("email_logs_provider_message_id_unique".to_string()),
            table: Some("email_logs".to_string()),
            message: "duplicate key".to_string(),
        };
        assert_eq!(err.constraint(), Some("email_logs_provider_message_id_unique"));
        assert_eq!(DbError::NotFound.constraint(), None);
    }
}
