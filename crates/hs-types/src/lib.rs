pub mod config;
pub mod dimension;
pub mod errors;
pub mod hyperspace;
pub mod trace;

pub use config::*;
pub use dimension::*;
pub use errors::*;
pub use hyperspace::*;
pub use trace::*;
