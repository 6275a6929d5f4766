use std::fmt;

use serde::Serialize;
use ulid::Ulid;

use crate::status::TransitionNotAllowed;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Field-level validation messages. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

/// Why a window cannot be booked. The display strings are part of the
/// external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailability {
    OutsideWorkingHours,
    AllPostsOccupied,
    NoPostsForCategory,
    PointNotAccepting,
}

impl Unavailability {
    pub fn reason(self) -> &'static str {
        match self {
            Unavailability::OutsideWorkingHours => "outside working hours",
            Unavailability::AllPostsOccupied => "all posts occupied",
            Unavailability::NoPostsForCategory => "no posts available for this category",
            Unavailability::PointNotAccepting => "service point is not accepting bookings",
        }
    }

    /// Short metric label.
    pub fn label(self) -> &'static str {
        match self {
            Unavailability::OutsideWorkingHours => "outside_hours",
            Unavailability::AllPostsOccupied => "occupied",
            Unavailability::NoPostsForCategory => "no_category_posts",
            Unavailability::PointNotAccepting => "point_closed",
        }
    }
}

impl fmt::Display for Unavailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("{0}")]
    Unavailable(Unavailability),
    #[error(transparent)]
    TransitionNotAllowed(#[from] TransitionNotAllowed),
    #[error("review not allowed: {0}")]
    ReviewNotAllowed(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        EngineError::Validation(errors)
    }

    /// Caller-correctable outcome, as opposed to an infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, EngineError::WalError(_))
    }

    pub fn unavailability(&self) -> Option<Unavailability> {
        match self {
            EngineError::Unavailable(u) => Some(*u),
            _ => None,
        }
    }
}
