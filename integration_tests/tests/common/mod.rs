//! Common test utilities and fixtures
#![allow(dead_code)]

use std::sync::Once;

use screensync::authority::{AuthorityConfig, AuthorityHandle, SyncAuthority};
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize test logging (call once per test module)
pub fn init_logging() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::from_default_env().add_directive("screensync=debug".parse().unwrap());

        let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// Authority configuration with short intervals, bound to an ephemeral port.
///
/// Loaded through the JSON config path the way a deployment would.
pub fn test_config() -> AuthorityConfig {
    let document = json!({
        "port": 0,
        "ping_interval_ms": 100,
        "sample_interval_ms": 150,
        "heartbeat_interval_ms": 50,
        "response_timeout_ms": 200,
    });
    AuthorityConfig::from_json(&document.to_string()).unwrap()
}

/// Start a TCP authority and return its handle and port
pub async fn start_authority(config: AuthorityConfig) -> (AuthorityHandle, u16) {
    let handle = SyncAuthority::new(config).listen().await.unwrap();
    let port = handle.local_addr().unwrap().port();
    tracing::info!(port, "test authority listening");
    (handle, port)
}
