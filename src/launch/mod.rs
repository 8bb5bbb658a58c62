pub mod abi;
pub mod blocking;
pub mod host;
pub mod marshal;
