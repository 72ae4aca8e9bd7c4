use log::{error, warn};
use rocket::{http::Status, http::StatusClass, response::Responder};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while serving a request.
///
/// The first five variants are the voting precondition/lookup failures that
/// are surfaced verbatim to operators; the rest are infrastructure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Voting is not currently open")]
    ElectionNotOpen,
    #[error("The election is frozen; votes can no longer be cast or changed")]
    ResultsFrozen,
    #[error("A vote has already been cast and vote changes are disabled")]
    VoteAlreadyCast,
    #[error("That candidate is not on this voter's ballot")]
    CandidateNotEligible,
    #[error("No voter found matching '{0}'")]
    VoterNotFound(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("{1}")]
    Status(Status, String),
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
    #[error(transparent)]
    BsonSer(#[from] mongodb::bson::ser::Error),
    #[error(transparent)]
    OidParse(#[from] mongodb::bson::oid::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    fn status(&self) -> Status {
        match self {
            Self::ElectionNotOpen | Self::ResultsFrozen => Status::Forbidden,
            Self::VoteAlreadyCast => Status::Conflict,
            Self::CandidateNotEligible => Status::UnprocessableEntity,
            Self::VoterNotFound(_) | Self::NotFound(_) => Status::NotFound,
            Self::Status(status, _) => *status,
            Self::OidParse(_) => Status::BadRequest,
            Self::Db(_) | Self::BsonSer(_) => Status::InternalServerError,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        match status.class() {
            StatusClass::ServerError => error!("{self}"),
            _ => warn!("{self}"),
        }
        Err(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_statuses() {
        assert_eq!(Error::ElectionNotOpen.status(), Status::Forbidden);
        assert_eq!(Error::ResultsFrozen.status(), Status::Forbidden);
        assert_eq!(Error::VoteAlreadyCast.status(), Status::Conflict);
        assert_eq!(
            Error::CandidateNotEligible.status(),
            Status::UnprocessableEntity
        );
        assert_eq!(
            Error::VoterNotFound("x".to_string()).status(),
            Status::NotFound
        );
    }
}
