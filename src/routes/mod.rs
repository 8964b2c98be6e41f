pub mod auth;
pub mod capabilities;
pub mod health;
pub mod roles;
