pub mod admin;
pub mod instructors;
pub mod public;
pub mod webhooks;
