pub mod auth;
pub mod tls;

pub use auth::Authenticator;
pub use tls::load_or_generate;
