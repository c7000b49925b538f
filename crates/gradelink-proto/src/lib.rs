//! Shared wire definitions for the grading handoff between the desktop
//! initiator and the mobile acceptor. Both roles only ever talk to the
//! session store, so everything they agree on lives here and nothing in
//! this crate performs I/O.

mod pairing;
mod status;
mod task;

pub use pairing::{Credential, PairingUrl, PairingUrlError};
pub use status::{SessionStatus, StatusTransitionError};
pub use task::{
    CaptureMetadata, CreateSessionResponse, DeviceContext, Grade, GradingResult, SessionContext,
    SessionDataRef, StatusResponse, TaskMetadata,
};
