//! IPC module for shell-UI communication

mod protocol;
mod server;

pub use protocol::{Notification, Request, Response, ShellStatus, MAX_MESSAGE_LEN};
pub use server::{read_frame, write_frame, Server};
