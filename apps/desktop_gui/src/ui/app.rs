use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use eframe::egui;
use panel_core::SelectionStore;
use shared::domain::SelectionId;

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::{
    events::UiEvent,
    orchestration::dispatch_backend_command,
    reducer::{PanelTab, PanelViewState},
};

const MAX_UI_EVENTS_PER_FRAME: usize = 256;
const IDLE_REPAINT_INTERVAL: Duration = Duration::from_millis(100);

pub struct DesktopGuiApp {
    cmd_tx: Sender<BackendCommand>,
    ui_rx: Receiver<UiEvent>,
    state: PanelViewState,
}

impl DesktopGuiApp {
    pub fn new(
        cmd_tx: Sender<BackendCommand>,
        ui_rx: Receiver<UiEvent>,
        default_method: Option<String>,
    ) -> Self {
        Self {
            cmd_tx,
            ui_rx,
            state: PanelViewState::new(default_method),
        }
    }

    fn drain_ui_events(&mut self) {
        for _ in 0..MAX_UI_EVENTS_PER_FRAME {
            match self.ui_rx.try_recv() {
                Ok(event) => self.state.apply(event),
                Err(_) => break,
            }
        }
    }

    fn dispatch(&mut self, cmd: BackendCommand) {
        dispatch_backend_command(&self.cmd_tx, cmd, &mut self.state.status);
    }

    fn show_tab_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.selectable_value(&mut self.state.tab, PanelTab::Compare, "Differential expression");
            let results_label = format!("Results ({})", self.state.results.len());
            ui.selectable_value(&mut self.state.tab, PanelTab::Results, results_label);
        });
        ui.separator();
    }

    fn show_compare_tab(&mut self, ui: &mut egui::Ui) {
        let state = &mut self.state;

        egui::Grid::new("compare_form")
            .num_columns(2)
            .spacing([12.0, 8.0])
            .show(ui, |ui| {
                ui.label("Selection A");
                selection_combo(ui, "selection_a", &mut state.form.selection_a, &state.selections);
                ui.end_row();

                ui.label("Selection B");
                selection_combo(ui, "selection_b", &mut state.form.selection_b, &state.selections);
                ui.end_row();

                ui.label("Method");
                let selected = state
                    .form
                    .method
                    .as_ref()
                    .and_then(|id| state.methods.iter().find(|m| &m.id == id))
                    .map(|m| m.display_name.clone())
                    .unwrap_or_else(|| "Choose a method".to_string());
                egui::ComboBox::from_id_salt("method")
                    .selected_text(selected)
                    .show_ui(ui, |ui| {
                        for method in &state.methods {
                            ui.selectable_value(
                                &mut state.form.method,
                                Some(method.id.clone()),
                                method.display_name.as_str(),
                            );
                        }
                    });
                ui.end_row();

                ui.label("Result name");
                ui.add(
                    egui::TextEdit::singleline(&mut state.form.result_name)
                        .hint_text("<A> vs <B>"),
                );
                ui.end_row();
            });

        if state.selections.is_empty() {
            ui.weak("No selections available.");
        }

        ui.add_space(8.0);
        let mut command = None;
        ui.horizontal(|ui| {
            if ui
                .add_enabled(state.ready, egui::Button::new("Run differential expression"))
                .clicked()
            {
                command = Some(BackendCommand::Submit {
                    form: state.form.clone(),
                });
            }
            if ui.button("Refresh selections").clicked() {
                command = Some(BackendCommand::RefreshSelections);
            }
            if ui.button("Reload session").clicked() {
                command = Some(BackendCommand::ReloadSession);
            }
            if !state.running.is_empty() {
                ui.spinner();
                ui.label(format!("{} running", state.running.len()));
            }
        });

        if let Some(command) = command {
            self.dispatch(command);
        }
    }

    fn show_results_tab(&mut self, ui: &mut egui::Ui) {
        if self.state.results.is_empty() {
            ui.weak("No results published yet.");
            return;
        }

        egui::ScrollArea::vertical().show(ui, |ui| {
            egui::Grid::new("results_grid")
                .striped(true)
                .num_columns(5)
                .show(ui, |ui| {
                    ui.strong("Name");
                    ui.strong("Selection A");
                    ui.strong("Selection B");
                    ui.strong("Method");
                    ui.strong("Published");
                    ui.end_row();

                    for record in self.state.results.iter().rev() {
                        ui.label(record.name.as_str());
                        ui.label(format!(
                            "{} ({} cells)",
                            record.selection_a,
                            record.selection_a_cells.len()
                        ));
                        ui.label(format!(
                            "{} ({} cells)",
                            record.selection_b,
                            record.selection_b_cells.len()
                        ));
                        ui.label(record.method.as_str());
                        ui.label(record.published_at.format("%H:%M:%S").to_string());
                        ui.end_row();
                    }
                });
        });
    }

    fn show_warning_window(&mut self, ctx: &egui::Context) {
        let Some(warning) = self.state.last_warning.clone() else {
            return;
        };

        let mut dismissed = false;
        egui::Window::new(warning.title.as_str())
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(warning.message.as_str());
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });

        if dismissed {
            self.state.dismiss_warning();
        }
    }
}

fn selection_combo(
    ui: &mut egui::Ui,
    id_salt: &str,
    value: &mut Option<SelectionId>,
    selections: &SelectionStore,
) {
    let selected = value
        .as_ref()
        .and_then(|id| selections.display_name(id))
        .unwrap_or("Choose a selection")
        .to_string();

    egui::ComboBox::from_id_salt(id_salt)
        .selected_text(selected)
        .show_ui(ui, |ui| {
            for selection in selections.entries() {
                ui.selectable_value(
                    value,
                    Some(selection.id.clone()),
                    selection.display_name.as_str(),
                );
            }
        });
}

impl eframe::App for DesktopGuiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_ui_events();

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if let Some(err) = &self.state.last_error {
                    let marker = if err.is_fatal() { "Backend unavailable" } else { "!" };
                    ui.colored_label(ui.visuals().error_fg_color, marker)
                        .on_hover_text(format!(
                            "{:?} during {:?}: {}",
                            err.category(),
                            err.context(),
                            err.message()
                        ));
                }
                ui.label(self.state.status.as_str());
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.show_tab_bar(ui);
            match self.state.tab {
                PanelTab::Compare => self.show_compare_tab(ui),
                PanelTab::Results => self.show_results_tab(ui),
            }
        });

        self.show_warning_window(ctx);
        ctx.request_repaint_after(IDLE_REPAINT_INTERVAL);
    }
}
