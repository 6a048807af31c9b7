//! Factory for platform connections.

use std::fmt;
use std::str::FromStr;

use crate::error::BackendError;
use crate::quartz::{QuartzBackend, QuartzPasteboards};
use crate::win32::{Win32Backend, Win32Clipboard};
use crate::x11::{X11Connection, X11Server};

/// Which platform adapter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// ICCCM selections over an X11 display
    #[default]
    X11,
    /// Win32 clipboard with delayed rendering
    Win32,
    /// Quartz named pasteboards
    Quartz,
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x11" => Ok(BackendKind::X11),
            "win32" | "windows" => Ok(BackendKind::Win32),
            "quartz" | "macos" => Ok(BackendKind::Quartz),
            other => Err(BackendError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::X11 => "x11",
            BackendKind::Win32 => "win32",
            BackendKind::Quartz => "quartz",
        };
        f.write_str(name)
    }
}

/// An open connection to one platform's selection facility.
#[derive(Debug, Clone)]
pub enum PlatformConnection {
    /// X11 client connection
    X11(X11Connection),
    /// Win32 clipboard view
    Win32(Win32Backend),
    /// Quartz pasteboard view
    Quartz(QuartzBackend),
}

impl PlatformConnection {
    /// Kind of platform behind this connection
    pub fn kind(&self) -> BackendKind {
        match self {
            PlatformConnection::X11(_) => BackendKind::X11,
            PlatformConnection::Win32(_) => BackendKind::Win32,
            PlatformConnection::Quartz(_) => BackendKind::Quartz,
        }
    }
}

#[derive(Debug, Clone)]
enum SharedSystem {
    X11(X11Server),
    Win32(Win32Clipboard),
    Quartz(QuartzPasteboards),
}

/// Creates [`PlatformConnection`]s that share one platform system.
///
/// Every connection from the same factory talks to the same display server
/// (or system clipboard), so they behave like separate applications on one
/// desktop.
///
/// # Example
///
/// ```rust
/// use btk_selection_backends::{BackendFactory, BackendKind};
///
/// let factory = BackendFactory::new(BackendKind::X11);
/// let app_a = factory.connect();
/// let app_b = factory.connect();
/// assert_eq!(app_a.kind(), app_b.kind());
/// ```
#[derive(Debug, Clone)]
pub struct BackendFactory {
    system: SharedSystem,
}

impl BackendFactory {
    /// Factory with a fresh system of the given kind.
    pub fn new(kind: BackendKind) -> Self {
        let system = match kind {
            BackendKind::X11 => SharedSystem::X11(X11Server::new()),
            BackendKind::Win32 => SharedSystem::Win32(Win32Clipboard::new()),
            BackendKind::Quartz => SharedSystem::Quartz(QuartzPasteboards::new()),
        };
        Self { system }
    }

    /// Factory around an existing X11 server.
    pub fn with_x11_server(server: X11Server) -> Self {
        Self {
            system: SharedSystem::X11(server),
        }
    }

    /// Kind of system this factory connects to
    pub fn kind(&self) -> BackendKind {
        match self.system {
            SharedSystem::X11(_) => BackendKind::X11,
            SharedSystem::Win32(_) => BackendKind::Win32,
            SharedSystem::Quartz(_) => BackendKind::Quartz,
        }
    }

    /// The X11 server, when this is an X11 factory.
    pub fn x11_server(&self) -> Option<&X11Server> {
        match &self.system {
            SharedSystem::X11(server) => Some(server),
            _ => None,
        }
    }

    /// Open a new connection.
    pub fn connect(&self) -> PlatformConnection {
        match &self.system {
            SharedSystem::X11(server) => PlatformConnection::X11(server.connect()),
            SharedSystem::Win32(system) => PlatformConnection::Win32(Win32Backend::new(system.clone())),
            SharedSystem::Quartz(boards) => PlatformConnection::Quartz(QuartzBackend::new(boards.clone())),
        }
    }
}
