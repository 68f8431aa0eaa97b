pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	Validation { message: String },
	#[error("Embedding providers unavailable: {message}")]
	ProviderUnavailable { message: String },
	#[error("Schema drift: {message}")]
	SchemaDrift { message: String },
	#[error("Policy violation: {message}")]
	PolicyViolation { message: String },
	#[error("Index inconsistency: {message}")]
	IndexInconsistency { message: String },
	#[error("Query timed out: {message}")]
	Timeout { message: String },
	#[error("Unauthorized: {message}")]
	Unauthorized { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Initialization failed: {message}")]
	Init { message: String },
	#[error("Index error: {message}")]
	Index { message: String },
}

impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<sift_storage::Error> for Error {
	fn from(err: sift_storage::Error) -> Self {
		match err {
			sift_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			sift_storage::Error::SerdeJson(inner) => Self::Storage { message: inner.to_string() },
			sift_storage::Error::InvalidArgument(message) => Self::Validation { message },
			sift_storage::Error::NotFound(message) => Self::NotFound { message },
			sift_storage::Error::Conflict(message) => Self::Storage { message },
		}
	}
}

impl From<sift_index::Error> for Error {
	fn from(err: sift_index::Error) -> Self {
		Self::Index { message: err.to_string() }
	}
}

impl From<sift_providers::Error> for Error {
	fn from(err: sift_providers::Error) -> Self {
		Self::ProviderUnavailable { message: err.to_string() }
	}
}
