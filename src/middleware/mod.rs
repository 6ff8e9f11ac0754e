mod admin_auth;
mod instructor_auth;

pub use admin_auth::*;
pub use instructor_auth::*;
