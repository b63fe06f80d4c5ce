pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod profiles;
pub mod routes;
pub mod state;
pub mod typing;
