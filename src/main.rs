#[tokio::main]
async fn main() {
    if let Err(e) = taskmanager_lib::run().await {
        tracing::error!("Fatal: {e}");
        eprintln!("{} failed to start: {e}", taskmanager_lib::config::APP_NAME);
        std::process::exit(1);
    }
}
