//! Status command - inspect a live session.

use anyhow::{Result, bail};
use overlink::{Engine, SessionParameters};
use overlink_config::Config;

use crate::theme::Theme;

/// Print the state of the session named `instance`.
pub(crate) fn show_status(config: &Config, instance: &str) -> Result<()> {
    let params = SessionParameters::named(instance)?;
    let mut engine = Engine::new(config);
    engine.connect_vfs(&params)?;

    let name = engine.current_instance_name()?;
    let processes = engine.attached_process_ids()?;
    let Some(session) = engine.session() else {
        bail!("session {instance} is not attached");
    };
    let snapshot = session.mapping()?;
    // Our own handle is among these; leave it out.
    let others = session
        .handles()?
        .iter()
        .filter(|h| h.id != session.handle_id())
        .count();

    println!("\n{}", Theme::header("Session"));
    println!("{}", Theme::separator());
    let mut shown = name.value().clone();
    if name.is_truncated() {
        shown.push_str(" …");
    }
    println!("{}", Theme::field("instance", &shown));
    println!("{}", Theme::field("generation", &snapshot.generation.to_string()));
    println!("{}", Theme::field("published", &snapshot.published_at.to_rfc3339()));
    println!(
        "{}",
        Theme::field("rules", &engine.mapping().rules().len().to_string())
    );
    println!(
        "{}",
        Theme::field("entries", &engine.mapping().len().to_string())
    );

    println!("{}", Theme::field("handles", &others.to_string()));

    println!("\n{}", Theme::header("Attached processes"));
    println!("{}", Theme::separator());
    if processes.value().is_empty() {
        println!("{}", Theme::info("No attached processes"));
    }
    for pid in processes.value() {
        println!("  {}", Theme::pid(*pid));
    }
    if processes.is_truncated() {
        println!(
            "{}",
            Theme::warning(&format!(
                "Showing {} of {} processes",
                processes.value().len(),
                processes.available()
            ))
        );
    }
    println!();

    engine.disconnect_vfs()?;
    Ok(())
}
