pub mod clients;
pub mod keys;
pub mod mfa;
pub mod notifier;
pub mod oauth;
pub mod sessions;
pub mod token;

pub use clients::ClientRegistry;
pub use mfa::MfaService;
pub use oauth::OAuthService;
pub use token::TokenService;
