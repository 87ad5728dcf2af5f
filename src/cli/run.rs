//! The main run flow: resolve the query, build the execution plan, drive
//! the worker

use crate::cli::{parse_batch_size, parse_threshold, BatchSize, Cli};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::execution::{Command, SshTransport, Target, Worker};
use crate::query::{BackendRegistry, QueryResolver};
use crate::report;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Execute the CLI invocation; the returned value is the process exit code
pub async fn run(cli: Cli, config: Config) -> Result<i32> {
    // launched commands inherit the configured environment
    for (key, value) in &config.environment {
        std::env::set_var(key, value);
    }

    let dry_run = cli.dry_run || cli.commands.is_empty();
    if !dry_run {
        ensure_kerberos_ticket(&config)?;
    }

    let registry = BackendRegistry::with_builtins(&config)?;
    let resolver = QueryResolver::new(
        &registry,
        &config.aliases,
        config.default_backend.as_deref(),
    );
    let nodes = resolver.resolve(&cli.query).await?;
    info!(hosts = nodes.len(), "Query resolved");

    if dry_run {
        println!("DRY-RUN: ({}) {}", nodes.len(), nodes);
        return Ok(0);
    }

    let commands = build_commands(&cli)?;
    let target = build_target(&cli, nodes)?;
    let threshold = parse_threshold(&cli.success_threshold)?;

    if !cli.force && std::io::stdin().is_terminal() {
        let prompt = format!(
            "Execute {} command(s) on {} host(s)?",
            commands.len(),
            target.nodes().len()
        );
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| Error::config(format!("confirmation failed: {e}")))?;
        if !confirmed {
            println!("Aborted.");
            return Ok(2);
        }
    }

    let transport = SshTransport::new(
        config.clustershell.ssh_options.clone(),
        config.environment.clone(),
    );
    let mut worker = Worker::new(Arc::new(transport))
        .with_mode(cli.mode.into())
        .with_fanout(config.clustershell.fanout)
        .with_success_threshold(threshold);
    if let Some(seconds) = cli.global_timeout {
        worker = worker.with_global_timeout(Duration::from_secs(seconds));
    }

    // a user interrupt stops scheduling and cancels in-flight hosts
    let cancel = worker.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            let _ = cancel.send(());
        }
    });

    let reporter = report::create(cli.output, &cli.query);
    let result = worker.execute(&target, &commands, reporter).await?;
    Ok(result.exit_code)
}

fn build_commands(cli: &Cli) -> Result<Vec<Command>> {
    cli.commands
        .iter()
        .map(|text| {
            let mut command = Command::new(text.clone())?;
            if let Some(seconds) = cli.timeout {
                command = command.with_timeout(Duration::from_secs(seconds));
            }
            if cli.ignore_exit_codes {
                command = command.with_ok_codes(vec![]);
            }
            Ok(command)
        })
        .collect()
}

fn build_target(cli: &Cli, nodes: crate::nodeset::NodeSet) -> Result<Target> {
    let mut target = Target::new(nodes)?;
    if let Some(text) = &cli.batch_size {
        target = match parse_batch_size(text)? {
            BatchSize::Absolute(size) => target.with_batch_size(size)?,
            BatchSize::Ratio(ratio) => target.with_batch_size_ratio(ratio)?,
        };
    }
    if cli.batch_sleep > 0.0 {
        target = target.with_batch_sleep(Duration::from_secs_f64(cli.batch_sleep));
    }
    Ok(target)
}

/// Fail early when a Kerberos ticket is required but absent
fn ensure_kerberos_ticket(config: &Config) -> Result<()> {
    if !config.kerberos.ensure_ticket {
        return Ok(());
    }
    let is_root = std::env::var("USER").map(|u| u == "root").unwrap_or(false);
    if is_root && !config.kerberos.ensure_ticket_root {
        return Ok(());
    }
    let status = std::process::Command::new("klist").arg("-s").status();
    match status {
        Ok(status) if status.success() => Ok(()),
        _ => Err(Error::config(
            "no valid Kerberos ticket found; run kinit first",
        )),
    }
}
