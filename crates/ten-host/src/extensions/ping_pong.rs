use std::sync::Arc;
use ten_message::{Location, Msg, StatusCode};
use ten_runtime::{Extension, ExtensionContext};

/// Sends one `ping` cmd on start and logs whatever comes back.
pub struct Ping {
    pub target_graph: String,
}

impl Extension for Ping {
    fn name(&self) -> &str {
        "ping"
    }

    fn on_start(&mut self, ctx: &ExtensionContext) {
        let mut cmd = Msg::new_cmd(
            "ping",
            Location::localhost().with_graph(&self.target_graph).with_extension("ping"),
        );
        cmd.clear_and_set_dest(Location::localhost().with_graph(&self.target_graph).with_extension("pong"));
        cmd.gen_cmd_id_if_empty();
        ctx.emit(Arc::new(cmd));
    }

    fn on_cmd(&mut self, _ctx: &ExtensionContext, cmd: Arc<Msg>) {
        tracing::info!(name = %cmd.name, status = ?cmd.status_code(), "ping extension received result");
    }
}

/// Replies `pong` to every `ping` cmd it receives.
pub struct Pong;

impl Extension for Pong {
    fn name(&self) -> &str {
        "pong"
    }

    fn on_cmd(&mut self, ctx: &ExtensionContext, cmd: Arc<Msg>) {
        let mut result = Msg::new_cmd_result("pong", cmd.src.clone(), StatusCode::Ok);
        result.cmd_id = cmd.cmd_id.clone();
        ctx.emit(Arc::new(result));
    }
}
