// Authentication primitives: password hashing, bearer tokens, input checks

pub mod password;
pub mod token;
pub mod validation;
