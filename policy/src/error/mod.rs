mod policy_error;

pub use policy_error::PolicyError;
pub type Result<T> = std::result::Result<T, PolicyError>;
