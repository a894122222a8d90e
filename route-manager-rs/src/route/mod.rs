//! Route state: the enumeration pass, the published snapshot and the two
//! execution contexts the manager runs on.

pub mod catalog;
pub mod dispatch;
pub mod snapshot;
pub mod store;

pub use catalog::UNKNOWN_DEVICE_NAME;
pub use dispatch::{MainContext, MainQueue, SerialQueue, Task};
pub use snapshot::{order_devices, RouteSnapshot};
pub use store::{RouteStore, SnapshotObserver, SubscriptionId};
