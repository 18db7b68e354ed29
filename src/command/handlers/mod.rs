//! Built-in command bodies
//!
//! Each body is a unit struct implementing [`Command`]; the catalog maps a
//! stable identifier to one instance.

mod admin;
mod chat;
mod echo;
mod files;
mod image;

pub use admin::{ChangeAttribute, CleanCache, KillWorkers, SaveConfig, Terminal};
pub use chat::Chat;
pub use echo::Echo;
pub use files::{save_image, CleanFileCache};
pub use image::TextToImage;

use super::factory::Command;
use std::sync::Arc;

fn entry<C: Command + 'static>(id: &'static str, command: C) -> (&'static str, Arc<dyn Command>) {
    (id, Arc::new(command))
}

/// Every built-in command under its catalog identifier
pub fn builtin() -> Vec<(&'static str, Arc<dyn Command>)> {
    vec![
        entry("echo", Echo),
        entry("clean_cache", CleanCache),
        entry("save_config", SaveConfig),
        entry("kill_workers", KillWorkers),
        entry("clean_file_cache", CleanFileCache),
        entry("change_attribute", ChangeAttribute),
        entry("terminal", Terminal),
        entry("chat", Chat::plain()),
        entry("conditional_chat", Chat::conditional()),
        entry("text2image", TextToImage::on_demand()),
        entry("auto_text2image", TextToImage::scheduled()),
    ]
}
