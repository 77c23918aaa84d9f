//! Data models shared by the session manager and the auth backends.
//!
//! `User` is the client-side view of an account. It never carries a
//! password or password hash; backends strip those before handing a user
//! record to the session layer.

pub mod user;

pub use user::{Role, User};
