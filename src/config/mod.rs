mod settings;

pub use settings::{
    ApiConfig, DatabaseConfig, DispatchConfig, OtelConfig, ServerConfig, Settings, StoreConfig,
    TransportConfig,
};
