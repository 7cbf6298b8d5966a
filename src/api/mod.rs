pub mod collab_websocket;
pub mod routes;
pub mod signal_websocket;

pub use collab_websocket::CollabQuery;
pub use routes::{collab_route, config_route, execute_route, health_route, signal_route};
