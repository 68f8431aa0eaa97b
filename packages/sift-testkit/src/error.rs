pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{0}")]
	Message(String),
	#[error(transparent)]
	Index(#[from] sift_index::Error),
	#[error(transparent)]
	Service(#[from] sift_service::Error),
	#[error(transparent)]
	Storage(#[from] sift_storage::Error),
}
