pub mod coordinator;
pub mod filter;
pub mod frame_cache;
pub mod mailbox;
pub mod pool;
pub mod state;

pub use coordinator::{Coordinator, Event};
pub use filter::{Admission, FrameFilter};
pub use frame_cache::{CachedFrame, FrameCache};
pub use mailbox::{channel, Mailbox, Postbox};
pub use pool::{BufferPool, PoolResource, PoolStats, Pooled};
pub use state::PipelineState;
