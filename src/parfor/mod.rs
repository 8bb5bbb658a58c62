pub mod driver;
pub mod effects;
pub mod finalize;
pub mod graph;
pub mod hoist;
pub mod kernel;
pub mod legalize;
pub mod params;
pub mod races;
pub mod reduction;
pub mod signature;
