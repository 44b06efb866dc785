//! Client-side session engine for an ENSIME-protocol analysis server.
//!
//! The engine launches (or attaches to) a server process for one Scala
//! project, keeps a persistent newline-framed JSON socket to it, correlates
//! requests and responses by call ID, and dispatches typed payloads into
//! shared diagnostic and refactor state. Editor integration goes through
//! the [`EditorSink`] trait; everything else is editor-agnostic.
//!
//! Entry points: [`SessionRegistry`] to find or create the [`Session`] for
//! a project root, then [`Session::setup`] to launch and connect.

pub mod codec;
pub mod editor;
pub mod errors;
mod handlers;
pub mod launcher;
pub mod notes;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod session;

pub use editor::{EditorSink, NullEditor, Suggestion};
pub use errors::{LaunchError, WireError};
pub use launcher::{LaunchStrategy, ServerLauncher};
pub use notes::{Note, NoteSeverity, NoteStore};
pub use process::ServerProcess;
pub use registry::SessionRegistry;
pub use session::{CallContext, CallId, CallMode, Session, SessionSettings, SessionStatus};

pub use ensime_config::{ConfigError, ProjectConfig};
