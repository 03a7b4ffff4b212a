pub mod agent;
pub mod config;
pub mod errors;
pub mod io;
pub mod qa;
pub mod stream;
pub mod ui;
pub mod util;
pub mod vigil_config;
