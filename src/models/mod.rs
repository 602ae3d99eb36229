// SeedStream Models
// Data structures for the application

mod content;
mod job;
mod settings;

pub use content::*;
pub use job::*;
pub use settings::*;
