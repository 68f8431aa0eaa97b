pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Qdrant(Box<qdrant_client::QdrantError>),
	#[error(transparent)]
	Tantivy(#[from] tantivy::TantivyError),
	#[error("{0}")]
	InvalidArgument(String),
	#[error("{0}")]
	Internal(String),
}
impl From<qdrant_client::QdrantError> for Error {
	fn from(err: qdrant_client::QdrantError) -> Self {
		Self::Qdrant(Box::new(err))
	}
}
