//! User model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered user. Only the display and contact fields the
/// notification composer needs are loaded.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,

    /// Display name.
    pub name: String,

    /// E-mail address.
    pub email: String,
}
