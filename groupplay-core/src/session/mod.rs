//! Top-level session state machine and message dispatch.

mod controller;

pub use controller::{
    GroupSessionState, SessionController, SessionNotice, SessionState,
};
