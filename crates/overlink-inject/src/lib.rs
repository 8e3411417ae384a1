//! Overlink Inject - starting processes with interception attached.
//!
//! The [`Launcher`] turns a [`LaunchRequest`] into an [`InjectionPlan`]
//! (blacklist check, executable lookup, word-size inspection), then either
//! spawns the process itself through an [`Injector`] or hands it to a proxy
//! built for the target's word size. Either way the new pid is registered
//! with the session.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cmdline;
mod error;
pub mod image;
pub mod injector;
pub mod launcher;
pub mod plan;
pub mod proxy;
pub mod spawn;

pub use cmdline::{LaunchRequest, split_command_line};
pub use error::{InjectError, InjectResult, LaunchStage};
pub use image::WordSize;
pub use injector::{Injector, PreloadInjector};
pub use launcher::Launcher;
pub use plan::{InjectionPlan, SessionEnv};
pub use proxy::{ProxyConnection, ProxyRequest, ProxyResponse, serve};
