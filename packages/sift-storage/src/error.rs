pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error("{0}")]
	InvalidArgument(String),
	#[error("{0}")]
	NotFound(String),
	#[error("{0}")]
	Conflict(String),
}
