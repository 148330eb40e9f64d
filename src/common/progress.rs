use indicatif::{ProgressBar, ProgressStyle};

use crate::ui::prelude::*;

/// Spinner shown during network-bound work. Hidden when output is JSON so
/// stdout stays one event per line.
pub fn create_spinner(message: String) -> ProgressBar {
    if get_output_format() == OutputFormat::Json {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
        pb.set_style(style.tick_chars("⠁⠉⠙⠚⠒⠂⠒⠲⠴⠤⠄⠤⠦⠖⠒⠐⠒⠓⠋ "));
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Clear the spinner line; the caller reports the outcome itself
pub fn finish_spinner(pb: ProgressBar) {
    pb.finish_and_clear();
}
