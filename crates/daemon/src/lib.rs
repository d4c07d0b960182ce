pub mod intake;
pub mod shutdown;
pub mod transports;
