pub mod channel;
pub mod dispatch;
pub mod error;
pub mod producer;
pub mod select;
mod signal;
pub mod task;
pub mod timer;

pub use channel::Channel;
pub use dispatch::{contiguous, dispatch, gather, Partial};
pub use error::{DispatchError, TryRecvError, TrySendError, WorkerError};
pub use producer::{consume, fibonacci, Producer, ProducerReport, ProducerState};
pub use select::Select;
pub use task::{go, TaskId};
pub use timer::{after, Ticker, Timer};
