pub mod circuit_breaker;
pub mod engine;
pub mod models;
pub mod trailing_stop;


pub use engine::BacktestEngine;
pub use models::*;
