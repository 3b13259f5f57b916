use std::fmt::Display;

use mongodb::error::{Error as DbError, TRANSIENT_TRANSACTION_ERROR};
use rocket::{
    http::Status,
    request::Outcome,
    response::{self, Responder},
    serde::json::Json,
    Request, Response,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every way a command can fail, as seen by the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    /// Missing or invalid bearer token, or a token for a different session.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// Authenticated, but the participant's role does not permit the command.
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// Missing target, expired session, or a round in the wrong status.
    #[error("Not found: {0}")]
    NotFound(String),
    /// A guard was violated by current state.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Malformed input.
    #[error("Invalid input: {0}")]
    Validation(String),
    /// The server is misconfigured.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Display) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    /// Was this a database write that lost a race with another transaction?
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Db(e) if e.contains_label(TRANSIENT_TRANSACTION_ERROR))
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Db(_) if self.is_transient() => Status::Conflict,
            Self::Db(_) => Status::InternalServerError,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::Forbidden(_) => Status::Forbidden,
            Self::NotFound(_) => Status::NotFound,
            Self::Conflict(_) => Status::Conflict,
            Self::Validation(_) => Status::UnprocessableEntity,
            Self::Internal(_) => Status::InternalServerError,
        }
    }

    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Db(_) if self.is_transient() => "conflict",
            Self::Db(_) | Self::Internal(_) => "internal",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation",
        }
    }

    /// Body sent to the client. Database internals are not exposed.
    pub fn body(&self) -> ErrorBody {
        let message = match self {
            Self::Db(_) if self.is_transient() => {
                "Concurrent update, refresh and try again".to_string()
            }
            Self::Db(_) | Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error: self.kind().to_string(),
            message,
        }
    }
}

/// JSON shape of every failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// The error a request guard failed with, kept in the request's local cache
/// so the catchers can render it.
#[derive(Debug, Clone, Default)]
pub struct GuardFailure(pub Option<ErrorBody>);

impl GuardFailure {
    /// Remember `err` for the catcher and produce the guard's failure outcome.
    pub fn record<S>(req: &Request<'_>, err: Error) -> Outcome<S, Error> {
        let status = err.status();
        req.local_cache(|| GuardFailure(Some(err.body())));
        Outcome::Error((status, err))
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            error!("{self}");
        } else {
            debug!("Rejected {} {}: {self}", req.method(), req.uri().path());
        }
        Response::build_from(Json(self.body()).respond_to(req)?)
            .status(status)
            .ok()
    }
}
