//! UI layer for the desktop panel: app shell, tabs, and form widgets.

pub mod app;

pub use app::DesktopGuiApp;
