//! # Game Server Library
//!
//! Runtime for a distributed game server made of four cooperating roles,
//! each running as its own process:
//!
//! - **auth** verifies credentials and issues an auth code.
//! - **char** admits clients holding a valid auth code.
//! - **zone** hosts the game world, split across shard threads.
//! - **inter** coordinates the other three and keeps the shared session
//!   and account records.
//!
//! ## Architecture
//!
//! ### Connections
//! Every TCP connection is driven by one task (`network`) that frames
//! inbound bytes with the role's dispatch table, hands complete messages to
//! the session's handlers and writes outbound messages from a queue. Any
//! component may send through a cloned [`network::Outbound`].
//!
//! ### Main loop
//! Each role runs a single-threaded loop (`roles::MainLoop`) that fires the
//! [`scheduler::TaskScheduler`] at a fixed interval and keeps the link to
//! the inter server alive, reconnecting after a fixed delay when it drops.
//!
//! ### World
//! The zone role loads the compressed map cache (`world::map_cache`),
//! partitions the maps over a fixed number of shards and runs each shard
//! on a dedicated OS thread. Placement and movement requests reach a
//! shard as commands; lookups go through the process-wide
//! [`world::ShardRegistry`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use shared::ServerRole;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::defaults(ServerRole::Inter);
//!     let handle = server::roles::start(config).await?;
//!     println!("inter server on {}", handle.local_addr());
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection_manager;
pub mod error;
pub mod inter;
pub mod network;
pub mod roles;
pub mod scheduler;
pub mod session;
pub mod world;
