use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use eframe::egui::{self, Align, Color32, Layout, RichText, TopBottomPanel, Ui};
use tracing::warn;

use crate::foreground::TICK_INTERVAL;
use crate::profile::{UserProfile, format_wait, load_profile};
use crate::store::KeyValueStore;
use crate::timer::engine::{TimerEngine, TimerError, TimerStatus};
use crate::timer::model::{Category, DisplayState, format_countdown};

const STATUS_TTL: Duration = Duration::from_secs(8);
const EXPIRY_TTL: Duration = Duration::from_secs(30);

pub fn run_gui(engine: TimerEngine, store: Arc<dyn KeyValueStore>) -> Result<()> {
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Fleishig")
            .with_inner_size([420.0, 360.0])
            .with_min_inner_size([340.0, 300.0]),
        ..Default::default()
    };

    let mut app = FleishigApp::new(engine, store);
    app.resume();

    eframe::run_native(
        "Fleishig",
        native_options,
        Box::new(move |cc| {
            configure_theme(&cc.egui_ctx);
            Ok(Box::new(app))
        }),
    )
    .map_err(|err| anyhow::anyhow!("failed to launch the timer window: {err}"))?;

    Ok(())
}

fn configure_theme(ctx: &egui::Context) {
    let mut visuals = egui::Visuals::light();
    visuals.panel_fill = Color32::from_rgb(250, 247, 240);
    visuals.selection.bg_fill = Color32::from_rgb(70, 130, 180);
    ctx.set_visuals(visuals);
}

struct FleishigApp {
    engine: TimerEngine,
    store: Arc<dyn KeyValueStore>,
    profile: Option<UserProfile>,
    status_message: Option<(String, Instant)>,
    was_focused: bool,
}

impl FleishigApp {
    fn new(engine: TimerEngine, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            engine,
            store,
            profile: None,
            status_message: None,
            was_focused: true,
        }
    }

    fn set_status(&mut self, text: impl Into<String>, ttl: Duration) {
        self.status_message = Some((text.into(), Instant::now() + ttl));
    }

    fn reload_profile(&mut self) {
        match load_profile(self.store.as_ref()) {
            Ok(profile) => self.profile = profile,
            Err(err) => {
                warn!(error = %err, "could not load profile");
                self.set_status(format!("Profile unavailable: {err}"), STATUS_TTL);
            }
        }
    }

    fn resume(&mut self) {
        self.reload_profile();
        let status = self.engine.resume();
        self.apply(status);
    }

    fn tick(&mut self) {
        if self.engine.display_state().is_none() {
            return;
        }
        let status = self.engine.tick();
        self.apply(status);
    }

    fn apply(&mut self, status: Result<TimerStatus, TimerError>) {
        match status {
            Ok(TimerStatus::Expired(fired)) => {
                let text = format!("{} {}", fired.notification.title, fired.notification.body);
                self.set_status(text, EXPIRY_TTL);
            }
            Ok(TimerStatus::Idle | TimerStatus::Running(_)) => {}
            Err(err) => self.set_status(format!("Timer error: {err}"), STATUS_TTL),
        }
    }

    fn start(&mut self, category: Category) {
        let Some(profile) = self.profile.clone() else {
            self.set_status("Create a profile first.", STATUS_TTL);
            return;
        };
        let minutes = profile.waiting_times.for_category(category);
        match self.engine.start(category, minutes, Some(&profile.name)) {
            Ok(_) => self.set_status(
                format!("Timer set for {}.", format_wait(minutes)),
                STATUS_TTL,
            ),
            Err(err) => self.set_status(format!("Could not start: {err}"), STATUS_TTL),
        }
    }

    fn cancel(&mut self) {
        match self.engine.cancel() {
            Ok(()) => self.set_status("Timer cancelled.", STATUS_TTL),
            Err(err) => self.set_status(format!("Could not cancel: {err}"), STATUS_TTL),
        }
    }

    fn show_countdown(&mut self, ui: &mut Ui, display: DisplayState) {
        ui.label(RichText::new(display.category.headline()).size(20.0).strong());
        ui.add_space(8.0);
        ui.label(
            RichText::new(format_countdown(display.seconds_remaining))
                .size(48.0)
                .monospace()
                .color(Color32::from_rgb(40, 90, 140)),
        );
        ui.label("until you can have dairy");
        ui.add_space(16.0);
        if ui.button("Cancel timer").clicked() {
            self.cancel();
        }
    }

    fn show_start_buttons(&mut self, ui: &mut Ui) {
        let waits = self.profile.as_ref().map(|profile| profile.waiting_times);
        ui.add_enabled_ui(waits.is_some(), |ui| {
            for category in [Category::Chicken, Category::Meat] {
                let label = start_button_label(category, waits.map(|w| w.for_category(category)));
                let button = egui::Button::new(RichText::new(label).size(18.0))
                    .min_size(egui::vec2(220.0, 40.0));
                if ui.add(button).clicked() {
                    self.start(category);
                }
                ui.add_space(6.0);
            }
        });
    }
}

impl eframe::App for FleishigApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some((_, expires_at)) = &self.status_message
            && Instant::now() >= *expires_at
        {
            self.status_message = None;
        }

        let (focused, minimized) = ctx.input(|input| {
            let viewport = input.viewport();
            (
                viewport.focused.unwrap_or(true),
                viewport.minimized.unwrap_or(false),
            )
        });
        if focused && !self.was_focused {
            self.resume();
        } else {
            self.tick();
        }
        self.was_focused = focused;

        TopBottomPanel::top("header")
            .resizable(false)
            .show(ctx, |ui| {
                ui.label(
                    RichText::new(greeting(self.profile.as_ref()))
                        .size(22.0)
                        .strong(),
                );
            });

        TopBottomPanel::bottom("footer")
            .resizable(false)
            .show(ctx, |ui| {
                let text = self
                    .status_message
                    .as_ref()
                    .map(|(text, _)| text.as_str())
                    .unwrap_or("");
                ui.label(RichText::new(text).color(Color32::from_rgb(90, 90, 90)));
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.with_layout(Layout::top_down(Align::Center), |ui| {
                ui.add_space(12.0);
                match self.engine.display_state() {
                    Some(display) => self.show_countdown(ui, display),
                    None => self.show_start_buttons(ui),
                }
            });
        });

        if !minimized && self.engine.display_state().is_some() {
            ctx.request_repaint_after(TICK_INTERVAL);
        }
    }
}

fn greeting(profile: Option<&UserProfile>) -> String {
    match profile {
        Some(profile) => format!("Hello, {}", profile.name),
        None => "Hello! Run `fleishig profile set --name <NAME>` to get started.".to_string(),
    }
}

fn start_button_label(category: Category, wait_minutes: Option<u32>) -> String {
    let action = match category {
        Category::Meat => "I ate meat",
        Category::Chicken => "I ate chicken",
    };
    match wait_minutes {
        Some(minutes) => format!("{action} ({})", format_wait(minutes)),
        None => action.to_string(),
    }
}
