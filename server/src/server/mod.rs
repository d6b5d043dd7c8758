pub mod routes;

pub use routes::{AppState, session_routes};
