pub mod broker;
pub mod enumerator;
pub mod replicate;
pub mod transfer;
