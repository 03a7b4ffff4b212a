//! CLI command implementations.
//!
//! | Module   | Commands handled                          |
//! |----------|-------------------------------------------|
//! | `qa`     | `qa run`, `qa status`, `qa summary`, `qa reset` |
//! | `config` | `config show`, `config validate`, `config init` |

pub mod config;
pub mod qa;

pub use config::cmd_config;
pub use qa::{cmd_qa_reset, cmd_qa_run, cmd_qa_status, cmd_qa_summary};
