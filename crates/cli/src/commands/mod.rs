pub mod build;
pub mod config;
pub mod export;
pub mod review;
pub mod show;
pub mod status;
pub mod validate;

pub use build::handle_build_command;
pub use config::handle_config_command;
pub use export::handle_export_command;
pub use review::handle_review_command;
pub use show::handle_show_command;
pub use status::handle_status_command;
pub use validate::handle_validate_command;
