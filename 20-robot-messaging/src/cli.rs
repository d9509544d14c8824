use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::{
    codec::DEFAULT_MAX_BODY_LEN,
    config::{
        DEFAULT_LOCAL_PORT, DEFAULT_REMOTE_HOST, DEFAULT_REMOTE_PORT, DEFAULT_WORKER_THREADS,
        ExchangeConfig, ServiceConfig,
    },
    message::MessageKind,
    world::Point,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub service: ServiceArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Populate a robot world and answer requests from peer processes.
    Serve(ServeArgs),
    /// Send one message to a peer and print its reply.
    Send(SendArgs),
    /// Drive the local robot along a straight line, reporting each position to a peer.
    Drive(DriveArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// Worker threads running connections and handlers.
    #[arg(long, env = "ROBOT_WORKERS", default_value_t = DEFAULT_WORKER_THREADS, global = true)]
    pub workers: usize,

    /// Largest message body accepted or sent, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_LEN, global = true)]
    pub max_body_len: usize,

    /// Abandon an exchange that takes longer than this many milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,
}

impl ServiceArgs {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            worker_threads: self.workers,
            ..ServiceConfig::default()
        }
    }

    pub fn exchange_config(&self) -> ExchangeConfig {
        ExchangeConfig {
            max_body_len: self.max_body_len,
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on, on all interfaces. Use 0 for an ephemeral port.
    #[arg(long, env = "ROBOT_LOCAL_PORT", default_value_t = DEFAULT_LOCAL_PORT)]
    pub local_port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Host of the peer process.
    #[arg(long, env = "ROBOT_REMOTE_HOST", default_value = DEFAULT_REMOTE_HOST)]
    pub remote_host: String,

    /// Port the peer process listens on.
    #[arg(long, env = "ROBOT_REMOTE_PORT", default_value_t = DEFAULT_REMOTE_PORT)]
    pub remote_port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Message kind, by name (echo-request) or number.
    #[arg(long, default_value = "echo-request")]
    pub kind: MessageKind,

    /// Message body, sent as-is.
    #[arg(long, default_value = "")]
    pub body: String,
}

#[derive(Args, Debug, Clone)]
pub struct DriveArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Start position as x,y.
    #[arg(long, value_parser = parse_point, default_value = "50,50")]
    pub from: Point,

    /// End position as x,y.
    #[arg(long, value_parser = parse_point, default_value = "450,450")]
    pub to: Point,

    /// Number of moves between the two positions.
    #[arg(long, default_value_t = 20)]
    pub steps: usize,

    /// Pause between moves, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub interval_ms: u64,
}

fn parse_point(s: &str) -> Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{s}'"))?;
    let coordinate = |value: &str| {
        value
            .trim()
            .parse::<u16>()
            .map_err(|err| format!("bad coordinate '{value}': {err}"))
    };
    Ok(Point::new(coordinate(x)?, coordinate(y)?))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn send_parses_kind_and_remote() {
        let cli = Cli::try_parse_from([
            "robot-messaging",
            "send",
            "--remote-host",
            "127.0.0.1",
            "--remote-port",
            "4000",
            "--kind",
            "update-position-request",
            "--body",
            "00100020",
        ])
        .expect("valid arguments");

        let Command::Send(args) = cli.command else {
            panic!("expected send command");
        };
        assert_eq!(args.remote.remote_host, "127.0.0.1");
        assert_eq!(args.remote.remote_port, 4000);
        assert_eq!(args.kind, MessageKind::UpdatePositionRequest);
        assert_eq!(args.body, "00100020");
    }

    #[test]
    fn global_options_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "robot-messaging",
            "serve",
            "--local-port",
            "0",
            "--timeout-ms",
            "250",
        ])
        .expect("valid arguments");

        let exchange = cli.service.exchange_config();
        assert_eq!(exchange.timeout, Some(Duration::from_millis(250)));
        assert_eq!(exchange.max_body_len, DEFAULT_MAX_BODY_LEN);
        assert!(matches!(cli.command, Command::Serve(ServeArgs { local_port: 0 })));
    }

    #[test]
    fn parses_points() {
        assert_eq!(parse_point("10, 20"), Ok(Point::new(10, 20)));
        assert!(parse_point("10").is_err());
        assert!(parse_point("a,1").is_err());
    }
}
