pub mod articles;
pub mod audit;
pub mod inventory;
