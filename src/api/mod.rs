pub mod proctor_routes;
pub mod proctor_websocket;

pub use proctor_routes::routes;
