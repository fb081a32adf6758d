pub mod connection;
pub mod dispatcher;
pub mod hub;
pub mod ledger;
pub mod permissions;
pub mod registry;
pub mod session;

pub use dispatcher::{Audience, Broadcast, Dispatcher};
pub use hub::{BroadcastScope, Hub, HubOptions};
pub use session::Session;
