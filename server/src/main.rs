use clap::{Parser, ValueEnum};
use log::{error, info};
use server::config::ServerConfig;
use shared::ServerRole;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Role {
    Auth,
    Char,
    Zone,
    Inter,
}

impl From<Role> for ServerRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Auth => ServerRole::Auth,
            Role::Char => ServerRole::Char,
            Role::Zone => ServerRole::Zone,
            Role::Inter => ServerRole::Inter,
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Role this process plays
    #[clap(value_enum)]
    role: Role,
    /// Path to the TOML configuration file
    #[clap(short, long, default_value = "config/server.toml")]
    config: PathBuf,
    /// Log filter used when RUST_LOG is not set
    #[clap(short, long, default_value = "info")]
    log_level: String,
    /// Start the role, then shut it down straight away
    #[clap(long)]
    test_run: bool,
}

/// Main-method of the application.
/// Parses command-line arguments and the configuration, then runs the
/// requested role on a runtime sized by `network.thread_count`.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let role = ServerRole::from(args.role);
    let config = match ServerConfig::load(&args.config, role) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.network.thread_count)
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        if args.test_run {
            let handle = server::roles::start(config).await?;
            info!("Test run: {} server started on {}", role.name(), handle.local_addr());
            handle.shutdown().await;
            return Ok(());
        }
        server::roles::run(config).await
    })?;

    Ok(())
}
