mod definition;
mod host;
mod pool;
mod quota;

pub use definition::{Definition, DiskSpec, UserDataFormat};
pub use host::{pool_tag_key, Host, HostState};
pub use pool::{DedicatedPoolRecord, MAC_RELEASE_DELAY_FLOOR};
pub use quota::QuotaBucket;
