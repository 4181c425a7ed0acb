pub mod auth;
pub mod error;
pub mod middleware;
pub mod router;
pub mod whatsapp;
