pub mod answers;
pub mod controller;
pub mod countdown;
pub mod guard;
pub mod integrity;
pub mod loader;
pub mod page;
pub mod reveal;


pub use controller::{
    spawn_session, SessionError, SessionHandle, SessionNotice, SessionOptions, SessionSnapshot,
    SubmitAck,
};
pub use page::{LeaveDecision, Page, Visibility};
