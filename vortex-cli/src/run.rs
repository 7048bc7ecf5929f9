//! Container execution logic

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vortex_core::{ContainerEvent, ContainerId, RestartPolicy, State, StopSignal, StopTimeout};
use vortex_lifecycle::{
    ContainerRuntime, ContainerSpec, LifecycleConfig, ProcessEnvironment, StopStatus,
};

use crate::cli::RunArgs;

/// Run the container until it ends or is stopped; returns its exit code
pub async fn execute(args: RunArgs) -> Result<i32> {
    // Validate everything before launching anything
    let id = ContainerId::new(&args.id).context("Invalid container ID")?;
    let restart: RestartPolicy = args.restart.parse().context("Invalid restart policy")?;
    let stop_signal =
        StopSignal::parse_or_default(args.stop_signal.as_deref()).context("Invalid stop signal")?;
    let stop_timeout = args
        .stop_timeout
        .as_deref()
        .map(StopTimeout::parse)
        .transpose()
        .context("Invalid stop timeout")?;

    let config = match &args.config {
        Some(path) => LifecycleConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => LifecycleConfig::default(),
    };

    let env = Arc::new(ProcessEnvironment::new());
    env.register_command(&id, args.command.clone())
        .await
        .context("Invalid command")?;

    let (tx, mut events) = mpsc::channel(config.event_buffer);
    let runtime = ContainerRuntime::new(env.clone(), env, config)
        .context("Invalid lifecycle configuration")?
        .with_events(tx);

    let spec = ContainerSpec::default()
        .with_restart_policy(restart)
        .with_stop_signal(stop_signal);
    runtime.register(id.clone(), spec).await?;

    let process = runtime
        .start(id.as_str())
        .await
        .context("Failed to start container")?;
    info!(container_id = %id, pid = process.pid().as_raw(), restart = %restart, "📦 Container started");

    let stop_after = async {
        match args.stop_after {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    let exit_code = tokio::select! {
        code = settled(&runtime, &id, &mut events) => code?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!(container_id = %id, "Interrupted, stopping container");
            stop(&runtime, &id, stop_timeout).await?
        }
        () = stop_after => {
            info!(container_id = %id, "Stop deadline reached, stopping container");
            stop(&runtime, &id, stop_timeout).await?
        }
    };

    println!("Container '{id}' exited with code {exit_code}");
    Ok(exit_code)
}

/// How often `settled` checks the container state directly
const SETTLE_POLL: Duration = Duration::from_secs(1);

/// Resolve once the container settles on its own
///
/// Events are delivered best effort and a full channel drops them, so the
/// state is also polled and a `Stopped` container ends the wait even when
/// its `Stopped` event was lost.
async fn settled(
    runtime: &ContainerRuntime,
    id: &ContainerId,
    events: &mut mpsc::Receiver<ContainerEvent>,
) -> Result<i32> {
    let mut poll = tokio::time::interval(SETTLE_POLL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) if event.container_id() != id => {}
                Some(ContainerEvent::Stopped { exit_code, .. }) => return Ok(exit_code),
                Some(ContainerEvent::Error { message, .. }) => {
                    warn!(container_id = %id, %message, "Container failed");
                    let inspection = runtime.inspect(id.as_str()).await?;
                    return Ok(inspection.exit_code.unwrap_or(1));
                }
                Some(other) if other.is_critical() => warn!(event = %other, "Lifecycle event"),
                Some(other) => debug!(event = %other, "Lifecycle event"),
                None => anyhow::bail!("Lifecycle event stream closed unexpectedly"),
            },
            _ = poll.tick() => {
                let inspection = runtime.inspect(id.as_str()).await?;
                if inspection.state == State::Stopped {
                    debug!(container_id = %id, "Container settled without a stop event");
                    return Ok(inspection.exit_code.unwrap_or_default());
                }
            }
        }
    }
}

async fn stop(runtime: &ContainerRuntime, id: &ContainerId, timeout: Option<StopTimeout>) -> Result<i32> {
    match runtime
        .stop_with(id.as_str(), None, timeout)
        .await
        .context("Failed to stop container")?
    {
        StopStatus::Stopped { exit_code } => Ok(exit_code),
        StopStatus::NotModified => {
            let inspection = runtime.inspect(id.as_str()).await?;
            Ok(inspection.exit_code.unwrap_or_default())
        }
    }
}
