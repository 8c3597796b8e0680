//! 🧵 Workers: background tasks that keep the write queue moving while everyone
//! else gets on with their lives. 🦆

use anyhow::Result;
use tokio::task::JoinHandle;

pub mod flush_worker;

pub use flush_worker::{FlushTrigger, FlushWorker};

/// 🏗️ A background worker, that does work. duh.
pub trait Worker {
    /// 🚀 Start the worker. The handle resolves when the worker is done for good.
    fn start(self) -> JoinHandle<Result<()>>;
}
