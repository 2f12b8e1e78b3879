use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use panel_core::{
    config::{load_settings, read_session},
    memory::{
        InMemoryResultsStore, InMemorySelectionManager, LoggingResultsView, SizeSummaryComputation,
    },
    NotificationBus, PanelDependencies, PanelForm, SelectionPanelController, SelectionStore,
};
use shared::domain::{MethodId, SelectionId};

#[derive(Parser, Debug)]
struct Cli {
    /// Session snapshot (JSON). Falls back to `session_path` from panel.toml.
    #[arg(long)]
    session: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the selections the panel would offer.
    Selections,
    /// List the differential expression methods.
    Methods,
    /// Compare two selections and print the published record.
    Compare {
        selection_a: String,
        selection_b: String,
        #[arg(long)]
        method: Option<String>,
        #[arg(long, default_value = "")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();
    let settings = load_settings();

    let Some(session_path) = cli.session.or(settings.session_path) else {
        bail!("no session file given; pass --session or set session_path in panel.toml");
    };
    let session = read_session(&session_path)?;

    let bus = NotificationBus::new(settings.notification_capacity);
    let selections = Arc::new(InMemorySelectionManager::from_session(&session, bus.clone()));
    let controller = SelectionPanelController::new(PanelDependencies {
        selections: selections.clone(),
        computation: Arc::new(SizeSummaryComputation::new(
            session.methods.clone(),
            selections,
        )),
        results_store: Arc::new(InMemoryResultsStore::new()),
        results_view: Arc::new(LoggingResultsView),
        bus,
    });
    let ready = controller.initialize().await?;
    let mirror = SelectionStore::from_entries(controller.refresh_selection_mirror().await?);

    match cli.command {
        Command::Selections => {
            for selection in mirror.entries() {
                println!("{}\t{}", selection.id, selection.display_name);
            }
        }
        Command::Methods => {
            for method in ready.methods() {
                println!("{}\t{}", method.id, method.display_name);
            }
        }
        Command::Compare {
            selection_a,
            selection_b,
            method,
            name,
        } => {
            let mut form =
                PanelForm::with_default_method(ready.methods(), settings.default_method.as_deref());
            form.selection_a = Some(SelectionId::new(selection_a));
            form.selection_b = Some(SelectionId::new(selection_b));
            if let Some(method) = method {
                form.method = Some(MethodId::new(method));
            }
            form.result_name = name;

            let request = form.to_request(&mirror)?;
            let record = controller.submit(request)?.wait().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&record).context("failed to encode result")?
            );
        }
    }

    controller.shutdown().await;
    Ok(())
}
