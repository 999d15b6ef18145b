pub mod chat_session_service;
pub mod matchmaking_service;
pub mod user_service;

pub use chat_session_service::*;
pub use matchmaking_service::*;
pub use user_service::*;

#[cfg(test)]
mod test_support;
