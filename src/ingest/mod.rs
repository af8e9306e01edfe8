pub mod receiver;
pub mod transmitter;
pub mod transport;
