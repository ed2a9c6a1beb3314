pub mod invite;
pub mod second_factor;
pub mod service_role;
pub mod user;
