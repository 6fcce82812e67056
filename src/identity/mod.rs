//! Central identity and session management for Gatehouse.
//! Keep the public surface thin and split implementation across sub-modules.

mod credential;
mod session;
mod authorizer;

pub use credential::{AccessRight, Account, Credential};
pub use session::{RandomTokenIds, SessionToken, TokenIds, TokenRights, TokenState};
pub use authorizer::Authorizer;
