// Module: models

pub mod instance;
pub mod interest;
pub mod notification;
pub mod source;

pub use instance::{
    diff, DataCenterInfo, Delta, InstanceId, InstanceInfo, InstanceInfoBuilder, InstanceStatus,
    ServicePort,
};
pub use interest::{Interest, VipMatchMode};
pub use notification::{buffered, BufferState, ChangeNotification};
pub use source::{Origin, Source, SourceMatcher};
