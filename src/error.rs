use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::{debug, error};
use serde::Serialize;
use thiserror::Error;

/// Rejections raised by the quota checks before anything is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("At most {max} images per user ({existing} stored, {proposed} proposed)")]
    TooManyFiles {
        existing: usize,
        proposed: usize,
        max: usize,
    },

    #[error("No votes left")]
    QuotaExceeded,

    #[error("Already voted for entry {0}")]
    AlreadyVoted(String),

    #[error("Voting for the own entry is disabled")]
    OwnEntry,

    #[error("Unknown entry {0}")]
    UnknownEntry(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record store request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Not authorized: {0}")]
    Auth(String),

    #[error("Record changed concurrently")]
    Conflict,

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Owner already has an entry: {0}")]
    DuplicateOwner(String),

    #[error("Record store returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No image selected")]
    NoFiles,

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("File too large: {0}")]
    FileTooLarge(String),

    #[error("Malformed upload: {0}")]
    Multipart(String),

    #[error("Invalid username")]
    InvalidUsername,

    #[error("Entry {0} belongs to another user")]
    NotOwner(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::Multipart(err.to_string())
    }
}

impl AppError {
    /// Short code used to report the outcome of an action after a redirect.
    pub fn notice(&self) -> &'static str {
        match self {
            AppError::Quota(QuotaError::TooManyFiles { .. }) => "too_many_files",
            AppError::Quota(QuotaError::QuotaExceeded) => "no_votes_left",
            AppError::Quota(QuotaError::AlreadyVoted(_)) => "already_voted",
            AppError::Quota(QuotaError::OwnEntry) => "own_entry",
            AppError::Quota(QuotaError::UnknownEntry(_)) => "unknown_entry",
            AppError::Store(StoreError::Conflict) => "conflict",
            AppError::Store(StoreError::NotFound(_)) => "unknown_entry",
            AppError::Store(StoreError::Auth(_)) => "auth",
            AppError::Store(_) => "store",
            AppError::NoFiles => "no_files",
            AppError::UnsupportedFile(_) => "bad_type",
            AppError::FileTooLarge(_) => "too_large",
            AppError::Multipart(_) => "bad_upload",
            AppError::InvalidUsername => "invalid_username",
            AppError::NotOwner(_) => "not_owner",
            AppError::Session(_) | AppError::Template(_) => "internal",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Quota(_)
            | AppError::NoFiles
            | AppError::UnsupportedFile(_)
            | AppError::FileTooLarge(_)
            | AppError::Multipart(_)
            | AppError::InvalidUsername => StatusCode::BAD_REQUEST,
            AppError::NotOwner(_) => StatusCode::FORBIDDEN,
            AppError::Store(StoreError::Conflict) => StatusCode::CONFLICT,
            AppError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Store(StoreError::Network(_))
            | AppError::Store(StoreError::Auth(_))
            | AppError::Store(StoreError::Backend { .. }) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Session(_) | AppError::Template(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{}", self);
        } else {
            debug!("{:?}", self);
        }
        let text = Notice::from_code(self.notice())
            .map(|notice| notice.text)
            .unwrap_or("Something went wrong");
        HttpResponse::build(status)
            .content_type("text/plain; charset=utf-8")
            .body(text)
    }
}

/// A user-visible message shown after an action.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notice {
    pub level: &'static str,
    pub text: &'static str,
}

impl Notice {
    pub fn from_code(code: &str) -> Option<Notice> {
        let (level, text) = match code {
            "uploaded" => ("success", "Images uploaded."),
            "removed" => ("success", "Image removed."),
            "voted" => ("success", "Vote cast."),
            "logged_out" => ("info", "You have been logged out."),
            "too_many_files" => ("error", "You can upload at most 2 images in total."),
            "no_votes_left" => ("warning", "You have no votes left."),
            "already_voted" => ("info", "You have already voted for this entry."),
            "own_entry" => ("warning", "You cannot vote for your own entry."),
            "unknown_entry" => ("error", "That entry does not exist."),
            "conflict" => ("warning", "The entry changed in the meantime, please try again."),
            "auth" => ("error", "The server could not authorize the change."),
            "store" => ("error", "The image store is unavailable, please try again later."),
            "no_files" => ("warning", "Please select images first."),
            "bad_type" => ("error", "Only jpg, jpeg and png images are accepted."),
            "too_large" => ("error", "The image is too large."),
            "bad_upload" => ("error", "The upload could not be read."),
            "invalid_username" => ("error", "Please enter a valid username."),
            "not_owner" => ("error", "You can only change your own images."),
            "internal" => ("error", "Something went wrong."),
            _ => return None,
        };
        Some(Notice { level, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_error_has_a_notice() {
        let errors = vec![
            AppError::from(QuotaError::QuotaExceeded),
            AppError::from(QuotaError::OwnEntry),
            AppError::from(QuotaError::AlreadyVoted("e1".to_owned())),
            AppError::from(QuotaError::UnknownEntry("e1".to_owned())),
            AppError::from(QuotaError::TooManyFiles {
                existing: 2,
                proposed: 1,
                max: 2,
            }),
            AppError::from(StoreError::Conflict),
            AppError::from(StoreError::Auth("expired".to_owned())),
            AppError::from(StoreError::Backend {
                status: 500,
                message: "boom".to_owned(),
            }),
            AppError::NoFiles,
            AppError::UnsupportedFile("x.gif".to_owned()),
            AppError::FileTooLarge("x.png".to_owned()),
            AppError::InvalidUsername,
            AppError::NotOwner("e1".to_owned()),
        ];
        for err in errors {
            assert!(Notice::from_code(err.notice()).is_some(), "{:?}", err);
        }
    }

    #[test]
    fn quota_errors_are_client_errors() {
        let err = AppError::from(QuotaError::QuotaExceeded);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let err = AppError::from(StoreError::Conflict);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
