pub mod auth;
pub mod directory;
pub mod persistence;
pub mod presence;
