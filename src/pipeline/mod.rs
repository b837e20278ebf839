mod mailbox;
mod result;
mod worker;

pub use mailbox::{FrameMailbox, FrameTask};
pub use result::{LatestResult, ResultCache};
pub use worker::{spawn_worker, Worker, WorkerSettings};
