mod ec2;
mod retry;

pub use ec2::Ec2Client;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
