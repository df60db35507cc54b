//! Request extractors shared by the API routes.

pub mod bearer;
