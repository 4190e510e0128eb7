use arbor_api::{Error as ApiError, TreeError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn missing_author() -> Error {
        Error::Api(ApiError::validation("missing author id"))
    }

    pub fn invalid_author(value: &str) -> Error {
        Error::Api(ApiError::validation(format!("invalid author id {value:?}")))
    }
}

impl From<TreeError> for Error {
    fn from(e: TreeError) -> Error {
        match e {
            TreeError::Api(e) => Error::Api(e),
            TreeError::Store(e) => Error::Anyhow(e),
        }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let err = match self {
            Error::Anyhow(err) => {
                tracing::error!(?err, "internal server error");
                #[cfg(not(test))]
                let err =
                    ApiError::Unknown(String::from("Internal server error, see logs for details"));
                #[cfg(test)]
                let err = ApiError::Unknown(format!("Internal server error: {err:?}"));
                err
            }
            Error::Api(err @ (ApiError::MalformedSegment(_) | ApiError::InconsistentState(_))) => {
                tracing::error!(?err, "comment tree is corrupted");
                err
            }
            Error::Api(err) => {
                tracing::info!("returning error to client: {err}");
                err
            }
        };
        (err.status_code(), err.contents()).into_response()
    }
}
