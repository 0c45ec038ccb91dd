mod settings;

pub use settings::{Config, SteppingConfig, TomlConfig, VoiceConfig, EXAMPLE_CONFIG};
