// SeedStream Backend Server
// Library crate: models and services for the transcoding pipeline

pub mod models;
pub mod services;
