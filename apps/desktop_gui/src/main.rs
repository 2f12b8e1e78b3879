use std::path::PathBuf;

mod backend_bridge;
mod controller;
mod ui;

use clap::Parser;
use crossbeam_channel::bounded;
use eframe::egui;
use panel_core::config::load_settings;

use backend_bridge::commands::BackendCommand;
use controller::events::UiEvent;
use ui::DesktopGuiApp;

#[derive(Parser, Debug)]
struct Args {
    /// Session snapshot (JSON) to load selections and methods from.
    #[arg(long)]
    session: Option<PathBuf>,
    /// Method preselected in the form when the session offers it.
    #[arg(long)]
    default_method: Option<String>,
}

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(session) = args.session {
        settings.session_path = Some(session);
    }
    if let Some(method) = args.default_method {
        settings.default_method = Some(method);
    }
    let default_method = settings.default_method.clone();

    let (cmd_tx, cmd_rx) = bounded::<BackendCommand>(256);
    let (ui_tx, ui_rx) = bounded::<UiEvent>(2048);
    backend_bridge::runtime::launch(cmd_rx, ui_tx, settings);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Differential Expression")
            .with_inner_size([760.0, 520.0])
            .with_min_inner_size([520.0, 360.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Differential Expression",
        options,
        Box::new(move |_cc| Ok(Box::new(DesktopGuiApp::new(cmd_tx, ui_rx, default_method)))),
    )
}
