pub mod database;
pub mod notification;
pub mod totp;

pub use database::Database;
pub use notification::NotificationClient;
