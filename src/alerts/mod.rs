pub mod models;
pub mod store;

pub use models::{
    AlertId, AlertStats, AlertStatus, Location, NewAlert, NotificationChannel, RelatedBooking,
    Reporter, SecurityAlert, SecurityVendor,
};
pub use store::AlertStore;
