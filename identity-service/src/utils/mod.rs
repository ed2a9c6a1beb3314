pub mod password;
pub mod secrets;
pub mod validation;
