pub mod bus;
pub mod custodian;
pub mod error;
pub mod eye;
pub mod guidepost;
pub mod request;
pub mod treekeeper;
pub mod workflow;

pub use bus::{GrimReaper, HandlerMap, Intake, RegisteredHandler};
pub use custodian::ForestCustodian;
pub use error::{KeeperError, ServiceError};
pub use eye::EyeNotifier;
pub use guidepost::GuidePost;
pub use request::{Envelope, Payload, Reply, ReplyPayload, Request};
pub use treekeeper::{load_tree, KeeperStatus, TreeKeeper};
pub use workflow::WorkflowEngine;
