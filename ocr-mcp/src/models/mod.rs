mod progress;
mod result;

pub use progress::*;
pub use result::*;
