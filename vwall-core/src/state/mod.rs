pub mod connection;
mod session;

pub use connection::LinkState;
pub use session::DisplaySession;
