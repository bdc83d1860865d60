use clap::Parser;
use tokamak_tracer::cli::{Args, run};
use tracing_subscriber::{EnvFilter, filter::Directive};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();

    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(args.log_level))
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    run(args).await?;
    Ok(())
}
