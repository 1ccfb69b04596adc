pub mod duration;
pub mod context;
pub mod classification;
pub mod circuit;
pub mod health;
pub mod retry;

pub use context::*;
pub use classification::*;
pub use circuit::*;
pub use health::*;
pub use retry::*;
