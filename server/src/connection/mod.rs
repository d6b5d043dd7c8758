pub mod credentials;
pub(crate) mod lifecycle;
pub mod simulated;
pub mod transport;
