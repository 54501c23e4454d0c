pub mod auth_service;
pub mod technician_service;
