pub mod membership;
pub mod requests;
