pub mod authorization_code;
pub mod client;
pub mod mfa;
pub mod token;
pub mod user;

pub use authorization_code::*;
pub use client::*;
pub use mfa::*;
pub use token::*;
pub use user::*;
