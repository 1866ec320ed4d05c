pub mod bootstrap;
pub mod cli;
pub mod http;
pub mod server;
pub mod session;
pub mod telemetry;

pub use bootstrap::ServeMode;
pub use server::RulesServer;
pub use session::SessionStore;
