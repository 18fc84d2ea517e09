pub mod codec;
pub mod consumer;
pub mod descriptor;
pub mod error;
pub mod publisher;
pub mod topology;

pub use codec::{decode_frame, encode_frame};
pub use consumer::StatusConsumer;
pub use descriptor::JobDescriptor;
pub use error::DispatchError;
pub use publisher::DispatchGateway;
pub use topology::declare_topology;
