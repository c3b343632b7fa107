pub mod dto;
pub mod extract;
mod routes;

pub use extract::AuthenticatedUser;
pub use routes::router;
