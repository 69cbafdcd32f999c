//! `SimpleBank` core: RPC contract, message schemas, status codes and wire framing.

pub mod contract;
pub mod frame;
pub mod messages;
pub mod status;

pub use contract::{ListMethodsResponse, Method, MethodDescriptor, SERVICE_NAME};
pub use frame::{CodecError, RequestFrame, ResponseFrame, WireFormat};
pub use status::{Code, FieldViolation, RpcStatus};
