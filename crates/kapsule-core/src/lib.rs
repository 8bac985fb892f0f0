pub mod errors;
pub mod ids;
pub mod protocol;
pub mod time;
pub mod types;

pub use errors::ErrorCode;
pub use ids::{OperationHandle, ReqId};
pub use protocol::{
    ContainerRecord, Event, PROTOCOL_VERSION, Request, RequestEnvelope, Response,
    ResponseEnvelope, ServerFrame,
};
pub use time::now_ms;
pub use types::{
    Container, ContainerMode, ContainerState, EnterResult, OperationResult, ProgressMessage,
    Severity,
};
