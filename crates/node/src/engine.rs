//! Wires the runtime, the deadline scheduler and the projections together.

use std::sync::Arc;

use deadlines::DeadlineScheduler;
use event_store::EventLog;
use projections::ProjectionProcessor;
use rental::FleetView;
use runtime::{AggregateRuntime, CommandGateway, CommandRegistry};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::Result;

/// A running node over one event log.
pub struct Engine<L: EventLog + Clone + 'static> {
    gateway: CommandGateway<L>,
    scheduler: DeadlineScheduler<L>,
    fleet: FleetView,
    shutdown: watch::Sender<bool>,
    projections: JoinHandle<projections::Result<()>>,
}

impl<L: EventLog + Clone + 'static> Engine<L> {
    /// Registers the rental domain, starts the deadline timer, re-arms the
    /// deadlines left pending by an earlier process and starts following
    /// the log with the fleet view.
    #[tracing::instrument(skip_all, fields(durable = config.is_durable()))]
    pub async fn start(log: L, config: &Config) -> Result<Self> {
        let mut registry = CommandRegistry::new();
        rental::register(&mut registry, &config.rental)?;
        let commands = registry.command_types();

        let runtime = Arc::new(AggregateRuntime::with_config(
            log.clone(),
            registry,
            config.runtime.clone(),
        ));
        let scheduler =
            DeadlineScheduler::start(runtime.clone(), log.clone(), config.scheduler.clone());
        runtime.attach_deadlines(Arc::new(scheduler.handle()));
        let recovered = scheduler.recover().await?;

        let fleet = FleetView::new();
        let mut processor = ProjectionProcessor::new(log);
        processor.register(Box::new(fleet.clone()));
        let (shutdown, stopped) = watch::channel(false);
        let projections = tokio::spawn(async move { processor.run_live(stopped).await });

        tracing::info!(?commands, recovered, "engine started");
        Ok(Self {
            gateway: CommandGateway::new(runtime),
            scheduler,
            fleet,
            shutdown,
            projections,
        })
    }

    /// Entry point for submitting commands.
    pub fn gateway(&self) -> &CommandGateway<L> {
        &self.gateway
    }

    pub fn scheduler(&self) -> &DeadlineScheduler<L> {
        &self.scheduler
    }

    /// Live fleet read model.
    pub fn fleet(&self) -> &FleetView {
        &self.fleet
    }

    /// Stops the deadline timer, then the projections.
    ///
    /// Deadlines that were firing are delivered again by the next
    /// [`start`](Self::start).
    pub async fn shutdown(self) -> Result<()> {
        self.scheduler.shutdown().await;
        // The processor also stops once every sender is gone.
        let _ = self.shutdown.send(true);
        match self.projections.await {
            Ok(result) => result?,
            Err(e) => tracing::warn!(error = %e, "projection task ended abnormally"),
        }
        tracing::info!("engine stopped");
        Ok(())
    }
}
