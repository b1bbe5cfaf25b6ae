pub mod dispatch;
pub mod gateway;
pub mod messages;

pub use dispatch::{BrokerDispatcher, Dispatcher, LogDispatcher};
pub use gateway::{DispatchReceipt, NotificationGateway};
pub use messages::OutboundMessage;
