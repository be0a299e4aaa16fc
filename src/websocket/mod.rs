pub mod events;
pub mod handler;
pub mod hub;
pub mod rate_limit;

pub use events::MembershipAction;
pub use handler::websocket_handler;
pub use hub::{Hub, MembershipChange};
