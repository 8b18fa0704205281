use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};

use tracksync_lib::commands::sync as cmd;
use tracksync_lib::core::settings::AppPaths;
use tracksync_lib::events::{UiAction, UiEvent, UiQueue};
use tracksync_lib::Runtime;

#[derive(Parser)]
#[command(author, version, about = "Sync projects and resources with the server")]
struct Cli {
    /// Config root. Defaults to the user config directory.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Give up waiting for background work after this many seconds.
    #[arg(long, global = true, default_value_t = 300)]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check for a newer build and download outdated resources.
    CheckUpdates,
    /// Refresh the list of remote revisions for a local project.
    Fetch(ProjectArgs),
    /// Pull and push revisions of a local project.
    Sync(SyncArgs),
    /// Clone a project from the server into the projects directory.
    Clone(CloneArgs),
    /// Print local/remote revision status of a project.
    Status(ProjectArgs),
    /// List local projects.
    Projects,
}

#[derive(Args)]
struct ProjectArgs {
    project_id: String,
}

#[derive(Args)]
struct SyncArgs {
    project_id: String,
    /// Only these revisions. Default is everything out of sync.
    revision_ids: Vec<String>,
}

#[derive(Args)]
struct CloneArgs {
    project_id: String,
    /// Local name until the server title is known.
    #[arg(long)]
    name: Option<String>,
}

fn main() -> Result<()> {
    tracksync_lib::init_tracing();
    let cli = Cli::parse();

    let paths = match cli.config_dir {
        Some(dir) => AppPaths::new(dir),
        None => AppPaths::from_system()?,
    };
    // Only the check-updates command talks to the updates endpoint.
    let rt = tracksync_lib::start_with(paths, |cfg| cfg.check_updates_on_start = false)?;
    let timeout = Duration::from_secs(cli.timeout_secs);

    let ok = match cli.command {
        Commands::CheckUpdates => {
            cmd::updates_check_now(&rt.service);
            pump(&rt, timeout)?
        }
        Commands::Fetch(args) => {
            cmd::vcs_fetch(
                &rt.service,
                cmd::VcsProjectArgs {
                    project_id: args.project_id.clone(),
                },
            )
            .map_err(|e| anyhow!(e))?;
            let ok = pump(&rt, timeout)?;
            print_status(&rt, args.project_id)?;
            ok
        }
        Commands::Sync(args) => {
            cmd::vcs_sync(
                &rt.service,
                cmd::VcsSyncArgs {
                    project_id: args.project_id,
                    revision_ids: args.revision_ids,
                },
            )
            .map_err(|e| anyhow!(e))?;
            pump(&rt, timeout)?
        }
        Commands::Clone(args) => {
            cmd::project_clone(
                &rt.service,
                cmd::ProjectCloneArgs {
                    project_id: args.project_id,
                    project_name: args.name,
                },
            )
            .map_err(|e| anyhow!(e))?;
            pump(&rt, timeout)?
        }
        Commands::Status(args) => {
            print_status(&rt, args.project_id)?;
            true
        }
        Commands::Projects => {
            let projects = cmd::projects_list(&rt.service).map_err(|e| anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&projects)?);
            true
        }
    };

    rt.service.shutdown();
    if !ok {
        bail!("operation failed");
    }
    Ok(())
}

fn print_status(rt: &Runtime, project_id: String) -> Result<()> {
    let status =
        cmd::vcs_status(&rt.service, cmd::VcsProjectArgs { project_id }).map_err(|e| anyhow!(e))?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Plays the UI thread: drains feedback until no worker is left.
/// Returns false if any operation reported failure.
fn pump(rt: &Runtime, timeout: Duration) -> Result<bool> {
    let res = drain_until_idle(&rt.ui, || rt.service.stats().running.is_empty(), timeout);
    if res.is_err() {
        rt.service.shutdown();
    }
    res
}

fn drain_until_idle(ui: &UiQueue, is_idle: impl Fn() -> bool, timeout: Duration) -> Result<bool> {
    let start = Instant::now();
    let mut ok = true;
    loop {
        if let Ok(Some(ev)) = ui.next_timeout(Duration::from_millis(100)) {
            ok &= show(&ev);
        } else if is_idle() {
            for ev in ui.drain() {
                ok &= show(&ev);
            }
            return Ok(ok);
        }
        if start.elapsed() >= timeout {
            bail!("timed out after {}s", timeout.as_secs());
        }
    }
}

fn show(ev: &UiEvent) -> bool {
    let project = ev.project_id.as_deref().unwrap_or("-");
    match &ev.action {
        UiAction::ShowProgress { .. } => tracing::info!(project, "working..."),
        UiAction::HideModal => {}
        UiAction::Tooltip { message } => tracing::info!(project, "{message}"),
        UiAction::Success => tracing::info!(project, "done"),
        UiAction::Failure => {
            tracing::error!(project, "failed");
            return false;
        }
        UiAction::UpdateAvailable { version, link } => {
            tracing::info!(%version, %link, "a newer version is available")
        }
    }
    true
}
