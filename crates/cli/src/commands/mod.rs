pub mod chat;
pub mod doctor;
pub mod local;
pub mod memory;
