use clap::Parser;

#[tokio::main]
async fn main() -> controller::Result<()> {
    let flags = controller::config::Flags::parse();
    controller::init_tracing(&flags.log_level);
    tracing::info!(
        version = controller::version::VERSION,
        git_sha = controller::version::GIT_SHA,
        built_at = controller::version::BUILD_TIMESTAMP,
        mode = %flags.orchestration_mode,
        "controller starting"
    );
    controller::run(flags).await
}
