//! Cross-process calls between game roles and the coordination server

pub mod api;
pub mod channel;
pub mod link;
pub mod store;

pub use api::InterApi;
pub use channel::{client_table, connect_inter, InterChannel, InterClientSession};
pub use link::{InterLink, LinkEvent, LinkState};
pub use store::InterStore;
