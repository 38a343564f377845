pub mod indicators;
pub mod trend_template;


pub use indicators::*;
pub use trend_template::*;
