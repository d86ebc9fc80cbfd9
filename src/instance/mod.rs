pub mod changes;
pub mod flow;
pub mod interceptor;
pub mod link;
pub mod redis_sink;
pub mod snapshot;
pub mod task;

pub use changes::{ChangeRecord, ChangeSink, ChangeTracker, MemoryChangeSink, TracingChangeSink};
pub use flow::{FlowInstance, FlowServices};
pub use interceptor::{Interceptor, TaskInterceptor};
pub use link::{LinkInstance, LinkTracker};
pub use snapshot::InstanceSnapshot;
pub use task::TaskInstance;
