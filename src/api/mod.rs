pub mod client;
pub mod heartbeat;
pub mod state_service;
pub mod tariff;

pub use state_service::StateService;
pub use tariff::TariffFetcher;
