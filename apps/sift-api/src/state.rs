use std::sync::Arc;

use sift_service::Service;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<Service>,
}
impl AppState {
	pub async fn new(config: sift_config::Config) -> color_eyre::Result<Self> {
		let service = Service::connect(config).await?;

		Ok(Self { service: Arc::new(service) })
	}

	pub fn with_service(service: Arc<Service>) -> Self {
		Self { service }
	}
}
