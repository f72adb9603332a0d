//! Application directory resolution.
//!
//! Three layouts exist:
//!
//! 1. **Portable** – `REDUB_PORTABLE=1|true` puts every mutable
//!    directory under `<dir-of-executable>/data`.
//! 2. **Windows** – config under the user config root, everything else
//!    under the user cache root, both joined with the app name.
//! 3. **Everything else** – relative-to-CWD defaults, friendly for
//!    `cargo run` during development.
//!
//! Resolution is driven through [`ResolveHooks`] so tests never touch
//! the real environment or executable path.

use std::io;
use std::path::{Path, PathBuf};

pub const PORTABLE_ENV: &str = "REDUB_PORTABLE";
/// Overrides the executable path used by portable resolution. Test-only.
pub const TEST_EXECUTABLE_ENV: &str = "REDUB_TEST_EXECUTABLE";

const APP_NAME: &str = "redub";
const CONFIG_FILE_NAME: &str = "config.toml";
const DB_FILE_NAME: &str = "redub.db";

pub const TASK_ROOT_NAME: &str = "tasks";
pub const UPLOAD_ROOT_NAME: &str = "uploads";

/// The resolved directory layout for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub portable: bool,
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub log_dir: PathBuf,
    /// Parent of `tasks/` and `uploads/`.
    pub output_dir: PathBuf,
    /// Parent of the database file and managed binaries.
    pub cache_dir: PathBuf,
}

impl AppPaths {
    pub fn task_root(&self) -> PathBuf {
        self.output_dir.join(TASK_ROOT_NAME)
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.task_root().join(task_id)
    }

    pub fn upload_root(&self) -> PathBuf {
        self.output_dir.join(UPLOAD_ROOT_NAME)
    }

    pub fn db_path(&self) -> PathBuf {
        self.cache_dir.join(DB_FILE_NAME)
    }

    /// Create every resolved directory (and the task/upload roots).
    pub fn ensure_created(&self) -> io::Result<()> {
        for dir in [
            &self.config_dir,
            &self.log_dir,
            &self.cache_dir,
            &self.task_root(),
            &self.upload_root(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Map a task artifact's local path to the client-visible download
    /// URL (`tasks/<rel>`), rejecting paths outside the task root.
    pub fn task_download_url(&self, local_path: &Path) -> Option<String> {
        let rel = pathdiff(&self.task_root(), local_path)?;
        if rel.as_os_str().is_empty() {
            return None;
        }
        let mut url = String::from(TASK_ROOT_NAME);
        for component in rel.components() {
            url.push('/');
            url.push_str(&component.as_os_str().to_string_lossy());
        }
        Some(url)
    }
}

/// Relative path from `root` to `path`, or `None` when `path` escapes
/// `root`. Both sides are lexically normalised first.
fn pathdiff(root: &Path, path: &Path) -> Option<PathBuf> {
    let root = clean(root);
    let path = clean(path);
    let rel = path.strip_prefix(&root).ok()?;
    Some(rel.to_path_buf())
}

/// Lexical cleanup: drop `.` components and resolve `..` against the
/// collected prefix where possible.
pub fn clean(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Injection points for [`resolve_with`]; production code uses
/// [`ResolveHooks::default`].
pub struct ResolveHooks {
    pub os: &'static str,
    pub getenv: Box<dyn Fn(&str) -> Option<String>>,
    pub executable: Box<dyn Fn() -> io::Result<PathBuf>>,
    pub user_config_dir: Box<dyn Fn() -> Option<PathBuf>>,
    pub user_cache_dir: Box<dyn Fn() -> Option<PathBuf>>,
}

impl Default for ResolveHooks {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS,
            getenv: Box::new(|key| std::env::var(key).ok()),
            executable: Box::new(|| {
                if let Ok(test_exe) = std::env::var(TEST_EXECUTABLE_ENV) {
                    return Ok(PathBuf::from(test_exe));
                }
                std::env::current_exe()
            }),
            user_config_dir: Box::new(|| std::env::var_os("APPDATA").map(PathBuf::from)),
            user_cache_dir: Box::new(|| std::env::var_os("LOCALAPPDATA").map(PathBuf::from)),
        }
    }
}

/// Resolve the directory layout for this process.
pub fn resolve() -> io::Result<AppPaths> {
    resolve_with(ResolveHooks::default())
}

pub fn resolve_with(hooks: ResolveHooks) -> io::Result<AppPaths> {
    if is_portable_enabled((hooks.getenv)(PORTABLE_ENV).as_deref()) {
        return resolve_portable(&hooks);
    }
    if hooks.os == "windows" {
        return resolve_windows(&hooks);
    }
    Ok(default_relative_paths())
}

fn is_portable_enabled(value: Option<&str>) -> bool {
    let normalized = value.unwrap_or("").trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true"
}

fn resolve_portable(hooks: &ResolveHooks) -> io::Result<AppPaths> {
    let exe = (hooks.executable)()?;
    let base = exe
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "executable has no parent dir"))?
        .join("data");
    let config_dir = base.join("config");
    Ok(AppPaths {
        portable: true,
        config_file: config_dir.join(CONFIG_FILE_NAME),
        config_dir,
        log_dir: base.join("logs"),
        output_dir: base.join("output"),
        cache_dir: base.join("cache"),
    })
}

fn resolve_windows(hooks: &ResolveHooks) -> io::Result<AppPaths> {
    let config_root = (hooks.user_config_dir)()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "user config dir is empty"))?;
    let cache_root = (hooks.user_cache_dir)()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "user cache dir is empty"))?;

    let config_dir = config_root.join(APP_NAME);
    let cache_base = cache_root.join(APP_NAME);
    Ok(AppPaths {
        portable: false,
        config_file: config_dir.join(CONFIG_FILE_NAME),
        config_dir,
        log_dir: cache_base.join("logs"),
        output_dir: cache_base.join("output"),
        cache_dir: cache_base.join("cache"),
    })
}

fn default_relative_paths() -> AppPaths {
    let config_dir = PathBuf::from("config");
    AppPaths {
        portable: false,
        config_file: config_dir.join(CONFIG_FILE_NAME),
        config_dir,
        log_dir: PathBuf::from("."),
        output_dir: PathBuf::from(TASK_ROOT_NAME),
        cache_dir: PathBuf::from("cache"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hooks_with_env(portable: Option<&'static str>, exe: &'static str) -> ResolveHooks {
        ResolveHooks {
            os: "linux",
            getenv: Box::new(move |key| {
                (key == PORTABLE_ENV)
                    .then(|| portable.map(str::to_owned))
                    .flatten()
            }),
            executable: Box::new(move || Ok(PathBuf::from(exe))),
            user_config_dir: Box::new(|| None),
            user_cache_dir: Box::new(|| None),
        }
    }

    #[test]
    fn portable_layout_lives_beside_executable() {
        for flag in ["1", "true", " TRUE  "] {
            let hooks = hooks_with_env(Some(flag), "/opt/redub/redub");
            let paths = resolve_with(hooks).unwrap();
            assert!(paths.portable);
            assert_eq!(paths.config_dir, PathBuf::from("/opt/redub/data/config"));
            assert_eq!(
                paths.config_file,
                PathBuf::from("/opt/redub/data/config/config.toml")
            );
            assert_eq!(paths.output_dir, PathBuf::from("/opt/redub/data/output"));
            assert_eq!(paths.cache_dir, PathBuf::from("/opt/redub/data/cache"));
        }
    }

    #[test]
    fn falsy_portable_values_are_ignored() {
        for flag in [None, Some("0"), Some("yes"), Some("")] {
            let hooks = hooks_with_env(flag, "/opt/redub/redub");
            let paths = resolve_with(hooks).unwrap();
            assert!(!paths.portable);
            assert_eq!(paths.output_dir, PathBuf::from("tasks"));
        }
    }

    #[test]
    fn windows_layout_uses_user_roots() {
        let hooks = ResolveHooks {
            os: "windows",
            getenv: Box::new(|_| None),
            executable: Box::new(|| Ok(PathBuf::from("C:/redub/redub.exe"))),
            user_config_dir: Box::new(|| Some(PathBuf::from("C:/Users/kay/AppData/Roaming"))),
            user_cache_dir: Box::new(|| Some(PathBuf::from("C:/Users/kay/AppData/Local"))),
        };
        let paths = resolve_with(hooks).unwrap();
        assert_eq!(
            paths.config_dir,
            PathBuf::from("C:/Users/kay/AppData/Roaming/redub")
        );
        assert_eq!(
            paths.cache_dir,
            PathBuf::from("C:/Users/kay/AppData/Local/redub/cache")
        );
        assert_eq!(paths.db_path().file_name().unwrap(), "redub.db");
    }

    #[test]
    fn windows_layout_requires_user_roots() {
        let hooks = ResolveHooks {
            os: "windows",
            getenv: Box::new(|_| None),
            executable: Box::new(|| Ok(PathBuf::from("C:/redub/redub.exe"))),
            user_config_dir: Box::new(|| None),
            user_cache_dir: Box::new(|| Some(PathBuf::from("C:/x"))),
        };
        assert!(resolve_with(hooks).is_err());
    }

    #[test]
    fn task_dirs_hang_off_output_dir() {
        let paths = default_relative_paths();
        assert_eq!(paths.task_dir("abc_1234"), PathBuf::from("tasks/tasks/abc_1234"));
        assert_eq!(paths.upload_root(), PathBuf::from("tasks/uploads"));
    }

    #[test]
    fn download_url_confined_to_task_root() {
        let paths = default_relative_paths();
        let inside = paths.task_root().join("abc/output/origin.srt");
        assert_eq!(
            paths.task_download_url(&inside).as_deref(),
            Some("tasks/abc/output/origin.srt")
        );

        let outside = PathBuf::from("/etc/passwd");
        assert!(paths.task_download_url(&outside).is_none());
        assert!(paths.task_download_url(&paths.task_root()).is_none());
    }

    #[test]
    fn clean_resolves_dot_segments() {
        assert_eq!(clean(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(clean(Path::new(".")), PathBuf::from("."));
        assert_eq!(clean(Path::new("../x")), PathBuf::from("../x"));
    }
}
