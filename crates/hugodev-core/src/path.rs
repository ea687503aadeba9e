//! Host path translation for bind mounts
//!
//! The daemon may not share the host's idea of a path: Docker Desktop on
//! Windows wants drive paths, while a Linux CLI running inside WSL2 talks to a
//! daemon that only understands the `/mnt/<drive>` view.

use std::path::Path;

/// Host platform, as far as path translation is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Windows,
    /// Linux running under WSL2
    Wsl,
    Linux,
}

impl Platform {
    /// Detect the platform of the running process
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(windows) {
            Self::Windows
        } else if is_wsl2() {
            Self::Wsl
        } else {
            Self::Linux
        }
    }
}

/// WSL2 exports `WSL_INTEROP` into every Linux process it starts
pub fn is_wsl2() -> bool {
    std::env::var_os("WSL_INTEROP").is_some()
}

/// Translate a host path into the form the daemon expects.
///
/// Already-native paths come back unchanged, so translating twice is the
/// same as translating once.
pub fn translate_path(path: &str, platform: Platform) -> String {
    match platform {
        Platform::Windows => mnt_to_drive(path).unwrap_or_else(|| path.to_string()),
        Platform::Wsl => drive_to_mnt(path).unwrap_or_else(|| path.to_string()),
        Platform::MacOs | Platform::Linux => path.to_string(),
    }
}

/// Translate a path for the current platform
pub fn translate_host_path(path: &Path) -> String {
    translate_path(&path.to_string_lossy(), Platform::current())
}

/// `/mnt/c/Users/me` -> `C:\Users\me`
fn mnt_to_drive(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/mnt/")?;
    let mut parts = rest.splitn(2, '/');
    let drive = parts.next()?;
    if drive.len() != 1 || !drive.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let tail = parts.next().unwrap_or("").replace('/', "\\");
    Some(format!("{}:\\{}", drive.to_ascii_uppercase(), tail))
}

/// `C:\Users\me` -> `/mnt/c/Users/me`
fn drive_to_mnt(path: &str) -> Option<String> {
    let mut chars = path.chars();
    let drive = chars.next().filter(|c| c.is_ascii_alphabetic())?;
    if chars.next() != Some(':') {
        return None;
    }
    let tail = chars.as_str().trim_start_matches(['\\', '/']).replace('\\', "/");
    Some(format!("/mnt/{}/{}", drive.to_ascii_lowercase(), tail))
}
