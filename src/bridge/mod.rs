//! Request handling: message decoding, dispatch to the REPL, and the event
//! loop that ties the peer session to the REPL.

mod dispatch;
mod event_loop;
mod protocol;
mod runtime;


pub use dispatch::{dispatch, handle_message, DispatchSettings};
pub use event_loop::{run_event_loop, BridgeContext, LoopExit, LoopSettings};
pub use protocol::{
    decode_request, request_from_term, DecodeError, ErrorReason, Request, Response,
};
pub use runtime::{run_bridge, READY_LINE};
