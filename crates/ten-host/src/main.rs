mod extensions;

use anyhow::Result;
use clap::Parser;
use extensions::ping_pong::{Ping, Pong};
use std::sync::Arc;
use std::time::Duration;
use ten_conf::RuntimeConfig;
use ten_runtime::{AddonKind, App, EngineTimers, GraphConnection, GraphDef, GraphNode};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "runs a small demo graph to completion")]
struct Args {
    /// Graph id to start.
    #[arg(long, default_value = "demo")]
    graph_id: String,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = RuntimeConfig::load()?;
    init_tracing(&config.infra.telemetry.log_level);

    let timers = EngineTimers {
        path_sweep_interval: Some(Duration::from_millis(config.infra.timers.path_sweep_interval_ms)),
        default_path_timeout: (config.infra.timers.default_path_timeout_ms > 0)
            .then(|| Duration::from_millis(config.infra.timers.default_path_timeout_ms)),
    };
    let app = App::create_with_timers("localhost", timers);
    app.registry()
        .register(AddonKind::Extension, "ping_addon", Arc::new(|| Box::new(Ping { target_graph: "demo".into() })));
    app.registry()
        .register(AddonKind::Extension, "pong_addon", Arc::new(|| Box::new(Pong)));

    app.run();

    let graph = GraphDef {
        graph_id: args.graph_id,
        nodes: vec![
            GraphNode {
                extension_name: "ping".into(),
                addon_name: "ping_addon".into(),
                app: "localhost".into(),
            },
            GraphNode {
                extension_name: "pong".into(),
                addon_name: "pong_addon".into(),
                app: "localhost".into(),
            },
        ],
        connections: vec![GraphConnection {
            src_extension: "ping".into(),
            cmd_name: "ping".into(),
            dest_extension: "pong".into(),
            dest_app: "localhost".into(),
            conversion: None,
        }],
    };
    app.start_graph(graph)?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received, closing app");
            app.close();
        }
        _ = tokio::time::sleep(Duration::from_millis(200)) => {
            tracing::info!("demo graph settled, sending close_app");
            let close_app = ten_message::Msg::new_cmd("close_app", ten_message::Location::localhost());
            app.handle_app_cmd(&close_app);
        }
    }

    app.wait().await;
    Ok(())
}
