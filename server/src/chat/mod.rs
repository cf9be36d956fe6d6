pub mod messages;
pub mod presence;
pub mod relay;
pub mod rooms;
pub mod store;
pub mod typing;
