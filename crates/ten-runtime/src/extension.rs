use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use ten_message::Msg;
use tokio::sync::mpsc;
use tracing::{error, info};

/// User-implemented unit of graph behavior. Every callback receives the
/// owning `ExtensionThread`'s message-emitting handle so a cmd_result or a
/// downstream cmd can be produced without the extension holding a direct
/// reference to the engine.
/// §4.9: `on_configure -> on_init -> on_start -> (handlers)* -> on_stop ->
/// on_deinit`. Every lifecycle callback has a trivial synchronous default;
/// an extension that needs the async "call _done when ready" shape this
/// section describes does so by holding onto its `ExtensionContext` and
/// posting its own follow-up message once setup work completes — the
/// runtime does not advance past a callback until it returns, so a
/// blocking callback body already gets the "don't advance until done"
/// behavior for free, at the cost of leaving genuinely async init to the
/// extension's own bookkeeping rather than a separate acknowledgement call.
pub trait Extension: Send + 'static {
    fn name(&self) -> &str;

    fn on_configure(&mut self, _ctx: &ExtensionContext) {}
    fn on_init(&mut self, _ctx: &ExtensionContext) {}
    fn on_start(&mut self, _ctx: &ExtensionContext) {}
    fn on_stop(&mut self, _ctx: &ExtensionContext) {}
    fn on_deinit(&mut self, _ctx: &ExtensionContext) {}

    fn on_cmd(&mut self, ctx: &ExtensionContext, cmd: Arc<Msg>);
    fn on_data(&mut self, _ctx: &ExtensionContext, _data: Arc<Msg>) {}
    fn on_audio_frame(&mut self, _ctx: &ExtensionContext, _frame: Arc<Msg>) {}
    fn on_video_frame(&mut self, _ctx: &ExtensionContext, _frame: Arc<Msg>) {}
}

/// Handle passed into every `Extension` callback. `emit` posts a result or
/// a downstream message back onto the owning engine's inbound queue.
#[derive(Clone)]
pub struct ExtensionContext {
    emit_tx: mpsc::UnboundedSender<Arc<Msg>>,
}

impl ExtensionContext {
    pub fn new(emit_tx: mpsc::UnboundedSender<Arc<Msg>>) -> Self {
        Self { emit_tx }
    }

    pub fn emit(&self, msg: Arc<Msg>) {
        let _ = self.emit_tx.send(msg);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionFailure {
    Panicked,
}

/// Owns one `Extension` and runs its callbacks on a dedicated task,
/// catching panics at the callback boundary so a bug in one extension
/// can't bring down the process or even the rest of the graph — only the
/// owning engine is told to fail this extension's outstanding work.
pub struct ExtensionThread {
    extension_name: String,
    inbound_tx: mpsc::UnboundedSender<Arc<Msg>>,
    failure_rx: std::sync::Mutex<mpsc::UnboundedReceiver<ExtensionFailure>>,
}

impl ExtensionThread {
    pub fn spawn(mut extension: Box<dyn Extension>, emit_tx: mpsc::UnboundedSender<Arc<Msg>>) -> Self {
        let extension_name = extension.name().to_string();
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Arc<Msg>>();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel::<ExtensionFailure>();
        let ctx = ExtensionContext::new(emit_tx);

        let name_for_task = extension_name.clone();
        tokio::spawn(async move {
            extension.on_configure(&ctx);
            extension.on_init(&ctx);
            extension.on_start(&ctx);
            while let Some(msg) = inbound_rx.recv().await {
                let outcome = run_guarded(&name_for_task, || dispatch(extension.as_mut(), &ctx, msg.clone()));
                if outcome.is_err() {
                    let _ = failure_tx.send(ExtensionFailure::Panicked);
                    break;
                }
            }
            extension.on_stop(&ctx);
            extension.on_deinit(&ctx);
        });

        Self {
            extension_name,
            inbound_tx,
            failure_rx: std::sync::Mutex::new(failure_rx),
        }
    }

    pub fn name(&self) -> &str {
        &self.extension_name
    }

    pub fn dispatch(&self, msg: Arc<Msg>) {
        let _ = self.inbound_tx.send(msg);
    }

    /// Non-blocking check for whether this extension's callback panicked.
    /// The owning engine polls this after dispatching and, on a hit,
    /// synthesizes error results for this extension's pending in-paths and
    /// triggers a cascading close of the graph it belongs to.
    pub fn take_failure(&self) -> Option<ExtensionFailure> {
        self.failure_rx.lock().unwrap().try_recv().ok()
    }
}

fn dispatch(extension: &mut dyn Extension, ctx: &ExtensionContext, msg: Arc<Msg>) {
    use ten_message::MsgKind;
    match msg.kind {
        MsgKind::Cmd => extension.on_cmd(ctx, msg),
        MsgKind::CmdResult => extension.on_cmd(ctx, msg),
        MsgKind::Data => extension.on_data(ctx, msg),
        MsgKind::AudioFrame => extension.on_audio_frame(ctx, msg),
        MsgKind::VideoFrame => extension.on_video_frame(ctx, msg),
    }
}

fn run_guarded<F: FnOnce()>(extension_name: &str, f: F) -> Result<(), ()> {
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    match result {
        Ok(()) => Ok(()),
        Err(payload) => {
            let message = panic_message(&payload);
            error!(extension = extension_name, panic = %message, "extension callback panicked");
            Err(())
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ten_message::Location;

    struct Echo {
        seen: Vec<String>,
    }
    impl Extension for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn on_cmd(&mut self, ctx: &ExtensionContext, cmd: Arc<Msg>) {
            self.seen.push(cmd.name.clone());
            let mut result = ten_message::Msg::new_cmd_result(
                cmd.name.clone(),
                Location::localhost(),
                ten_message::StatusCode::Ok,
            );
            result.cmd_id = cmd.cmd_id.clone();
            ctx.emit(Arc::new(result));
        }
    }

    struct LifecycleRecorder {
        calls: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }
    impl Extension for LifecycleRecorder {
        fn name(&self) -> &str {
            "lifecycle"
        }
        fn on_configure(&mut self, _ctx: &ExtensionContext) {
            self.calls.lock().unwrap().push("on_configure");
        }
        fn on_init(&mut self, _ctx: &ExtensionContext) {
            self.calls.lock().unwrap().push("on_init");
        }
        fn on_start(&mut self, _ctx: &ExtensionContext) {
            self.calls.lock().unwrap().push("on_start");
        }
        fn on_stop(&mut self, _ctx: &ExtensionContext) {
            self.calls.lock().unwrap().push("on_stop");
        }
        fn on_deinit(&mut self, _ctx: &ExtensionContext) {
            self.calls.lock().unwrap().push("on_deinit");
        }
        fn on_cmd(&mut self, _ctx: &ExtensionContext, _cmd: Arc<Msg>) {
            self.calls.lock().unwrap().push("on_cmd");
        }
    }

    /// §4.9: callbacks fire in the fixed order
    /// `on_configure -> on_init -> on_start -> on_cmd -> on_stop -> on_deinit`.
    #[tokio::test]
    async fn lifecycle_callbacks_fire_in_order() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (emit_tx, _emit_rx) = mpsc::unbounded_channel();
        let thread = ExtensionThread::spawn(
            Box::new(LifecycleRecorder { calls: calls.clone() }),
            emit_tx,
        );

        thread.dispatch(Arc::new(Msg::new_cmd("go", Location::localhost())));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(thread);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let seen = calls.lock().unwrap();
        assert_eq!(
            *seen,
            vec!["on_configure", "on_init", "on_start", "on_cmd", "on_stop", "on_deinit"]
        );
    }

    struct Panicky;
    impl Extension for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn on_cmd(&mut self, _ctx: &ExtensionContext, _cmd: Arc<Msg>) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn dispatched_cmd_produces_emitted_result() {
        let (emit_tx, mut emit_rx) = mpsc::unbounded_channel();
        let thread = ExtensionThread::spawn(Box::new(Echo { seen: Vec::new() }), emit_tx);

        let mut cmd = Msg::new_cmd("ping", Location::localhost());
        cmd.gen_cmd_id_if_empty();
        thread.dispatch(Arc::new(cmd));

        let result = emit_rx.recv().await.unwrap();
        assert_eq!(result.status_code(), Some(ten_message::StatusCode::Ok));
        assert!(thread.take_failure().is_none());
    }

    #[tokio::test]
    async fn panicking_callback_is_contained_and_reported() {
        let (emit_tx, _emit_rx) = mpsc::unbounded_channel();
        let thread = ExtensionThread::spawn(Box::new(Panicky), emit_tx);

        thread.dispatch(Arc::new(Msg::new_cmd("boom", Location::localhost())));
        // give the spawned task a chance to run and report failure
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(thread.take_failure(), Some(ExtensionFailure::Panicked));
    }
}
