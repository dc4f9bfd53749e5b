use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use zap_proto::protocol::Notification;

const DEFAULT_FILTER: &str = "info,zap_daemon=debug,hyper_util=warn,reqwest=warn";

/// Tracing layer that forwards WARN/ERROR events to render subscribers as
/// `Notification::Log`.
pub struct BroadcastLayer {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastLayer {
    pub fn new(sender: broadcast::Sender<Notification>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));

        // No receivers is fine.
        let _ = self.sender.send(Notification::Log { message });
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

/// File logging under `data_dir` plus the broadcast layer.  Returns the log
/// file path.
pub fn init(data_dir: &Path, sender: broadcast::Sender<Notification>) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(data_dir)?;
    let log_path = data_dir.join("zapd.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(sender))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_warnings_and_errors_are_forwarded() {
        let (tx, mut rx) = broadcast::channel(8);
        let subscriber = tracing_subscriber::registry().with(BroadcastLayer::new(tx));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("tuning");
            tracing::warn!(url = "http://s/1", "stream stalled");
        });

        match rx.try_recv().unwrap() {
            Notification::Log { message } => {
                assert!(message.contains("[WARN] "));
                assert!(message.contains("stream stalled"));
                assert!(message.contains("url=\"http://s/1\""));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
