use crate::blob::DynBlobStore;
use crate::db::DynStore;
use crate::services::{
    group::GroupService, message::MessageService, task::TaskService, user::UserService,
};
use crate::ws::Realtime;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

const DEV_JWT_SECRET: &str = "dev-secret-change-in-production";

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub bind_address: String,
    /// PostgreSQL URL; the in-memory store is used when absent
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
    /// Prefix for URLs of uploaded files, e.g. `https://taskhub.example.com`
    pub public_base_url: String,
    /// Allowed browser origin; any origin when unset
    pub cors_origin: Option<String>,
}

impl Config {
    /// Defaults, overridden by an optional `taskhub.toml`, overridden by
    /// environment variables (`BIND_ADDRESS`, `DATABASE_URL`, ...).
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .set_default("bind_address", "0.0.0.0:8008")?
            .set_default("db_max_connections", 10)?
            .set_default("jwt_secret", DEV_JWT_SECRET)?
            .set_default("upload_dir", "uploads")?
            .set_default("public_base_url", "")?
            .add_source(config::File::with_name("taskhub").required(false))
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        let config: Config = settings.try_deserialize()?;

        if config.jwt_secret == DEV_JWT_SECRET {
            tracing::warn!("JWT_SECRET not set, using default (insecure for production!)");
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            database_url: None,
            db_max_connections: 10,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            upload_dir: std::env::temp_dir().join("taskhub-uploads"),
            public_base_url: String::new(),
            cors_origin: None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: DynStore,
    pub realtime: Realtime,
    pub user_service: UserService,
    pub group_service: GroupService,
    pub task_service: TaskService,
    pub message_service: MessageService,
}

impl AppState {
    pub fn new(config: Config, store: DynStore, blobs: DynBlobStore, realtime: Realtime) -> Self {
        let user_service = UserService::new(store.clone());
        let group_service = GroupService::new(
            store.clone(),
            blobs.clone(),
            realtime.clone(),
            user_service.clone(),
        );
        let task_service = TaskService::new(store.clone());
        let message_service =
            MessageService::new(store.clone(), blobs, realtime.clone(), user_service.clone());

        Self {
            config: Arc::new(config),
            store,
            realtime,
            user_service,
            group_service,
            task_service,
            message_service,
        }
    }
}
