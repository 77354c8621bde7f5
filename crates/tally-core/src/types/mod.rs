pub mod event;
pub mod key;
pub mod priority;
pub mod snapshot;
pub mod source;
pub mod task;

pub use event::*;
pub use key::*;
pub use priority::*;
pub use snapshot::*;
pub use source::*;
pub use task::*;
