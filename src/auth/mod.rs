pub mod extractor;
pub mod jwt;
pub mod mfa;
pub mod password;

pub use extractor::Principal;
