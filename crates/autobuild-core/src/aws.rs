use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_secretsmanager::config::Region;
use tokio::runtime::Runtime;

// The SDK is async-only; each blocking call drives its future on a
// throwaway current-thread runtime.
pub(crate) fn runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

pub(crate) async fn load_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}
