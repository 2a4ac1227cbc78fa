use std::{
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use anyhow::Context;
use courier_common::{
    CampaignId, OutcomeKind, RelayId, Signal,
    audit::{self, AuditConfig},
    internal, tracing,
};
use courier_dispatch::{
    CampaignReport, Connector, DispatchConfig, DispatchContext, DispatchError, ExpeditionReport,
    Mailer, RelayReport, RelayScheduler, SmtpConfig, SmtpConnector, render::token, report,
};
use courier_store::StoreConfig;
use serde::Deserialize;
use tokio::{sync::broadcast, task::JoinSet};

/// Everything `courier.config.ron` can hold.
///
/// ```ron
/// Courier (
///     store: File(dataset: "./dataset.ron", journal: "./journal.ron"),
///     dispatch: (sleep_between_sends_ms: 500, unsubscribe_secret: "change me"),
///     smtp: (helo_name: "news.example.com"),
///     audit: (redact_recipients: true),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    dispatch: DispatchConfig,
    #[serde(default)]
    smtp: SmtpConfig,
    #[serde(default)]
    audit: AuditConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for CTRL+C or SIGTERM, then tell every scheduler to stop.
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, finishing in-flight sends");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

/// Find the configuration file using the following precedence:
/// 1. `explicit` (the `--config` flag)
/// 2. `COURIER_CONFIG` environment variable
/// 3. ./courier.config.ron (current working directory)
/// 4. /etc/courier/courier.config.ron (system-wide config)
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Ok(env_path) = std::env::var("COURIER_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "COURIER_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./courier.config.ron"),
        PathBuf::from("/etc/courier/courier.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config flag\n  - COURIER_CONFIG environment variable\n{paths_tried}"
    )
}

impl Courier {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_ron(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// Open the store and wire the dispatch engine.
    pub async fn open(self) -> anyhow::Result<Controller> {
        audit::init(self.audit);

        let store = self.store.open().await.context("Unable to open the store")?;
        let context = DispatchContext::new(store, self.dispatch)?;

        internal!(level = DEBUG, "Controller ready");

        Ok(Controller {
            context,
            connector: Arc::new(SmtpConnector::new(self.smtp)),
        })
    }
}

/// The operations behind the `courier` subcommands.
#[derive(Debug)]
pub struct Controller {
    context: DispatchContext,
    connector: Arc<dyn Connector>,
}

impl Controller {
    /// Replace the relay connector, e.g. with one that never touches the network.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub const fn context(&self) -> &DispatchContext {
        &self.context
    }

    /// Send every sendable campaign once, within each relay's remaining credits.
    pub async fn send(&self, test_mode: bool) -> anyhow::Result<Vec<ExpeditionReport>> {
        let reports = Mailer::new(self.context.clone(), Arc::clone(&self.connector), test_mode)
            .send_all()
            .await;

        self.checkpoint().await;
        Ok(reports?)
    }

    /// Run one scheduler per relay until a shutdown signal arrives or every scheduler
    /// stopped on its own.
    pub async fn serve(&self, test_mode: bool) -> anyhow::Result<()> {
        let relays = self
            .context
            .store
            .relays()
            .await
            .context("Unable to list relays")?;

        let mut schedulers = JoinSet::new();
        for relay in relays {
            let id = relay.id;
            let mut scheduler = RelayScheduler::new(
                relay,
                self.context.clone(),
                Arc::clone(&self.connector),
                test_mode,
            );
            let receiver = SHUTDOWN_BROADCAST.subscribe();
            schedulers.spawn(async move { (id, scheduler.serve(receiver).await) });
        }

        internal!(level = INFO, "Serving {} relays", schedulers.len());

        let mut failures = Vec::new();
        let interrupted = tokio::select! {
            () = join_all(&mut schedulers, &mut failures) => false,
            signal = shutdown() => {
                signal?;
                true
            }
        };

        if interrupted {
            let limit = self.context.config.shutdown_timeout();
            if tokio::time::timeout(limit, join_all(&mut schedulers, &mut failures))
                .await
                .is_err()
            {
                tracing::warn!(
                    "Shutdown timeout exceeded, {} schedulers aborted mid-send",
                    schedulers.len()
                );
                schedulers.abort_all();
            }
        }

        self.checkpoint().await;
        internal!(level = INFO, "Shutdown complete");

        match failures.into_iter().next() {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    pub async fn status(
        &self,
        campaign: Option<CampaignId>,
    ) -> anyhow::Result<(Vec<CampaignReport>, Vec<RelayReport>)> {
        Ok(report::status(&self.context, campaign).await?)
    }

    /// Record an engagement reported through a tracking or unsubscribe link.
    pub async fn engage(
        &self,
        campaign: CampaignId,
        uid: &str,
        presented: &str,
        kind: OutcomeKind,
    ) -> anyhow::Result<()> {
        let id = token::parse_uid(uid).with_context(|| format!("Malformed uid '{uid}'"))?;
        let recipient = self
            .context
            .store
            .fetch_recipient(id)
            .await
            .with_context(|| format!("Unknown recipient {id}"))?;

        if !token::verify_token(&self.context.config.unsubscribe_secret, &recipient, presented) {
            anyhow::bail!("Token does not match recipient {id}");
        }

        self.context
            .recorder
            .record_engagement(campaign, recipient.id, kind)
            .await?;
        self.checkpoint().await;
        Ok(())
    }

    async fn checkpoint(&self) {
        if let Err(e) = self.context.store.checkpoint().await {
            tracing::error!("Unable to checkpoint the store: {e}");
        }
    }
}

async fn join_all(
    schedulers: &mut JoinSet<(RelayId, Result<(), DispatchError>)>,
    failures: &mut Vec<DispatchError>,
) {
    while let Some(joined) = schedulers.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((relay, Err(error))) => {
                tracing::error!(%relay, %error, "Scheduler stopped");
                failures.push(error);
            }
            Err(e) => tracing::error!("Scheduler task failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_complete_config() {
        let courier = Courier::from_ron(
            r#"Courier (
                store: Memory(),
                dispatch: (sleep_between_sends_ms: 500, unsubscribe_secret: "s3cret"),
                smtp: (helo_name: "news.example.com", accept_invalid_certs: true),
                audit: (redact_recipients: true),
            )"#,
        )
        .unwrap();

        assert_eq!(courier.store, StoreConfig::Memory { seed: None });
        assert_eq!(courier.dispatch.sleep_between_sends_ms, 500);
        assert_eq!(courier.dispatch.hard_limit, 10_000);
        assert_eq!(courier.smtp.helo_name, "news.example.com");
        assert!(courier.smtp.accept_invalid_certs);
        assert!(courier.audit.redact_recipients);
    }

    #[test]
    fn everything_has_a_default() {
        let courier = Courier::from_ron("Courier ()").unwrap();

        assert_eq!(courier.store, StoreConfig::default());
        assert_eq!(courier.dispatch, DispatchConfig::default());
        assert_eq!(courier.smtp, SmtpConfig::default());
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("courier.config.ron");
        std::fs::write(&present, "Courier ()").unwrap();

        assert_eq!(find_config_file(Some(&present)).unwrap(), present);

        let missing = dir.path().join("missing.ron");
        let error = find_config_file(Some(&missing)).unwrap_err();
        assert!(error.to_string().contains("non-existent"));
    }
}
