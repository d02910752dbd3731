pub mod commands;
pub mod server;
pub mod session;

pub use commands::SmtpCommand;
pub use server::{Server, ServerConfig};
pub use session::Session;
