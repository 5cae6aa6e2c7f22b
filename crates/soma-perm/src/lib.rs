mod cache;
mod grants;
mod lookup;
mod mapping;

pub use cache::{AuthScope, Authorization, Cache, CacheUpdate};
pub use mapping::COMPACTION_THRESHOLD;
