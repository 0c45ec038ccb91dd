//! Utility modules

pub mod paths;

pub use paths::{
    config_path, database_path, default_data_dir, log_file_path, logs_dir, normalize_path,
};
