//! Non-interactive client CLI

use clap::{Parser, Subcommand};
use tinysns::client::SnsClient;
use tinysns::common::{timestamp_from_secs, Config};
use tinysns::proto::{Reply, SnsStatus};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tinysns")]
#[command(about = "tinysns social network client")]
#[command(version)]
struct Cli {
    /// Coordinator gRPC address
    #[arg(long)]
    coordinator: Option<String>,

    /// Acting user
    #[arg(long, short = 'u')]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register or log in
    Login,

    /// Follow another user
    Follow {
        /// User to follow
        target: String,
    },

    /// Stop following a user
    Unfollow {
        /// User to unfollow
        target: String,
    },

    /// List all users, followers and followees
    List,

    /// Publish one post
    Post {
        /// Post content
        content: String,
    },

    /// Stream the timeline until interrupted
    Timeline,
}

fn print_reply(reply: &Reply) -> anyhow::Result<()> {
    let status = SnsStatus::try_from(reply.status).unwrap_or(SnsStatus::FailureUnknown);
    match status {
        SnsStatus::Success => {
            println!("Command completed successfully: {}", reply.msg);
            Ok(())
        }
        other => anyhow::bail!("Command failed ({}): {}", other.as_str_name(), reply.msg),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut client_config = Config::load().client.unwrap_or_default();
    if let Some(coordinator) = cli.coordinator {
        client_config.coordinator_addr = coordinator;
    }

    let mut client = SnsClient::connect(&client_config, cli.user).await?;

    match cli.command {
        Commands::Login => print_reply(&client.login().await?)?,
        Commands::Follow { target } => print_reply(&client.follow(&target).await?)?,
        Commands::Unfollow { target } => print_reply(&client.unfollow(&target).await?)?,
        Commands::List => {
            let list = client.list().await?;
            println!("All users: {}", list.all_users.join(", "));
            println!("Followers: {}", list.followers.join(", "));
            println!("Following: {}", list.following.join(", "));
        }
        Commands::Post { content } => {
            client.post(&content).await?;
            println!("Posted");
        }
        Commands::Timeline => {
            let server = client.current_server().await?;
            println!(
                "Now you are in the timeline of {} (server {})",
                client.username(),
                server
            );
            let mut timeline = client.timeline().await?;
            loop {
                tokio::select! {
                    message = timeline.next() => match message? {
                        Some(message) => {
                            let at = timestamp_from_secs(message.timestamp)?;
                            println!("{} ({}) >> {}", message.username, at.format("%a %b %e %T %Y"), message.msg);
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    Ok(())
}
