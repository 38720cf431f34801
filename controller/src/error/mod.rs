mod controller_error;

pub use controller_error::{ConsistencyError, ControllerError, NodeCommandError};
pub type Result<T> = std::result::Result<T, ControllerError>;
