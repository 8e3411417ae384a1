//! Resolve command - look a path up in a session's mapping.

use std::path::Path;

use anyhow::Result;
use overlink::{Engine, SessionParameters};
use overlink_config::Config;

use crate::theme::Theme;

/// Print where `path` resolves to in the session named `instance`.
pub(crate) fn resolve_path(config: &Config, instance: &str, path: &Path) -> Result<()> {
    let params = SessionParameters::named(instance)?;
    let mut engine = Engine::new(config);
    engine.connect_vfs(&params)?;

    match engine.resolve(path) {
        Some(real) => println!("{}", real.display()),
        None => println!(
            "{}",
            Theme::info(&format!("{} is not mapped", path.display()))
        ),
    }

    engine.disconnect_vfs()?;
    Ok(())
}
