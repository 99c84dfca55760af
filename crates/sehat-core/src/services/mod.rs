//! Services used by client apps

mod offline;

pub use offline::{OfflineSupportService, ServiceBuilder};
