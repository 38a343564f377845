pub mod calendar;
pub mod error;
pub mod regime;
pub mod stats;
pub mod traits;
pub mod types;

pub use error::*;
pub use regime::*;
pub use traits::*;
pub use types::*;
