pub mod drift;
pub mod parameters;
pub mod replica;
pub mod resource;
pub mod state;
