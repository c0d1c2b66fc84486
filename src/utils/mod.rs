pub mod auth;
pub mod pkce;
pub mod secret;
pub mod totp;
