pub mod jamai;
pub mod sse;

pub use jamai::{JamaiClient, JamaiConfig};
