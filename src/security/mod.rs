pub mod auth;
pub mod form;
pub mod headers;
pub mod rate_limit;
