mod settings;

pub use settings::{
    HubConfig, JwtConfig, LogFormat, LoggingConfig, ServerConfig, Settings, WebSocketConfig,
};
