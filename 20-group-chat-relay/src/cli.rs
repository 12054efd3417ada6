use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, forwarding every frame to all other connected clients.
    Server(ServerArgs),
    /// Connect to a relay and chat in one topic.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,

    /// Milliseconds a client may take to accept a frame before it is disconnected.
    #[arg(long, default_value_t = 5000)]
    pub write_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Topic to follow, e.g. the id of the incident the chat belongs to.
    #[arg(long)]
    pub topic: String,

    /// Identity shown to other participants.
    #[arg(long)]
    pub sender: String,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,

    /// Print incoming messages as JSON lines instead of `<sender> body`.
    #[arg(long)]
    pub json: bool,
}
