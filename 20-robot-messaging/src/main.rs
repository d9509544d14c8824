use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::runtime::Handle;
use tracing::{info, warn};

use robot_messaging::{
    Client, CommunicationService, Message, MessageKind, Server,
    cli::{Cli, Command, DriveArgs, SendArgs, ServeArgs},
    config::ExchangeConfig,
    world::{LOCAL_ROBOT, RobotWorld, encode_position, straight_route},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let service = CommunicationService::global_with(&cli.service.service_config())
        .context("failed to start communication service")?;
    let exchange = cli.service.exchange_config();
    let context = service.context();

    service.block_on(async move {
        match cli.command {
            Command::Serve(args) => serve(args, &context, exchange).await,
            Command::Send(args) => send(args, &context, exchange).await,
            Command::Drive(args) => drive(args, &context, exchange).await,
        }
    })
}

async fn serve(args: ServeArgs, context: &Handle, exchange: ExchangeConfig) -> Result<()> {
    let world = Arc::new(RobotWorld::new());
    world.populate();

    let server = Server::bind(context, args.local_port, world)?.with_exchange_config(exchange);
    // Scripts and tests read the bound address from stdout; logs go to stderr.
    println!("listening on {}", server.local_addr());

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("server exited with error: {err}");
        return Err(err.into());
    }
    Ok(())
}

async fn send(args: SendArgs, context: &Handle, exchange: ExchangeConfig) -> Result<()> {
    let client = Client::new(
        context,
        args.remote.remote_host,
        args.remote.remote_port,
        Arc::new(RobotWorld::new()),
    )
    .with_exchange_config(exchange);

    let response = client
        .dispatch(Message::new(args.kind, args.body))
        .await
        .context("request failed")?;
    println!("{response}");
    Ok(())
}

async fn drive(args: DriveArgs, context: &Handle, exchange: ExchangeConfig) -> Result<()> {
    let world = Arc::new(RobotWorld::new());
    world.populate();
    world.set_position(LOCAL_ROBOT, args.from);

    let client = Client::new(
        context,
        args.remote.remote_host,
        args.remote.remote_port,
        world.clone(),
    )
    .with_exchange_config(exchange);

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    for position in straight_route(args.from, args.to, args.steps) {
        ticker.tick().await;
        world.set_position(LOCAL_ROBOT, position);

        let body = encode_position(position)?;
        match client
            .dispatch(Message::new(MessageKind::UpdatePositionRequest, body))
            .await
        {
            Ok(_) => info!(%position, "position reported"),
            Err(err) => warn!(%position, error = %err, "position report failed"),
        }
    }

    info!(robot = LOCAL_ROBOT, position = %args.to, "arrived");
    Ok(())
}
