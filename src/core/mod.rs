// Core domain types shared by every component

pub mod errors;
pub mod models;
