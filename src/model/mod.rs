pub mod admin;
pub mod api;
pub mod candidate;
pub mod history;
pub mod mongodb;
pub mod voter;
