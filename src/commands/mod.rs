pub mod settings;
pub mod sync;
