use volume_cluster::config::{MasterConfig, VolumeServerConfig};
use volume_cluster::{master, storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <master|volume> [--flag value ...]", args[0]);
        eprintln!(
            "Example: {} master --port 9333 --volume-size-limit-mb 1024 --default-replication 001",
            args[0]
        );
        eprintln!(
            "Example: {} volume --port 8080 --master 127.0.0.1:9333 --max 7 --rack r1",
            args[0]
        );

        std::process::exit(1);
    }

    match args[1].as_str() {
        "master" => {
            let config = MasterConfig::from_args(&args[2..])?;
            tracing::info!("Starting master on {}", config.bind_addr);
            master::server::run(config).await
        }
        "volume" => {
            let config = VolumeServerConfig::from_args(&args[2..])?;
            tracing::info!("Starting volume server on port {}", config.port);
            storage::run(config).await
        }
        other => {
            eprintln!("Unknown command {:?}, expected master or volume", other);
            std::process::exit(1);
        }
    }
}
