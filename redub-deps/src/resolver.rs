//! Pure dependency resolution.
//!
//! For every declared tool the resolver answers: where is it, is it
//! usable, and how was it found. Filesystem and PATH access go through
//! [`ResolverHooks`], so the whole module is testable without touching
//! the machine.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyTier {
    Must,
    Should,
    Optional,
}

impl DependencyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyTier::Must => "must",
            DependencyTier::Should => "should",
            DependencyTier::Optional => "optional",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    Ok,
    Missing,
    Error,
}

impl DependencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyStatus::Ok => "ok",
            DependencyStatus::Missing => "missing",
            DependencyStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySource {
    Configured,
    PathLookup,
}

impl DependencySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencySource::Configured => "configured",
            DependencySource::PathLookup => "path_lookup",
        }
    }
}

/// Declaration of one external tool.
#[derive(Debug, Clone)]
pub struct DependencySpec {
    pub id: String,
    pub display_name: String,
    pub command: String,
    pub tier: DependencyTier,
    /// Explicit path from configuration; empty means "look it up".
    pub configured_path: String,
    pub hint: String,
}

/// Resolution outcome for one tool.
#[derive(Debug, Clone)]
pub struct DependencyState {
    pub spec: DependencySpec,
    pub resolved_path: String,
    pub status: DependencyStatus,
    pub source: DependencySource,
    pub error: String,
}

/// Injection points; production code uses [`ResolverHooks::default`].
pub struct ResolverHooks {
    pub lookup_in_path: Box<dyn Fn(&str) -> io::Result<PathBuf>>,
    pub absolute: Box<dyn Fn(&Path) -> io::Result<PathBuf>>,
    pub stat: Box<dyn Fn(&Path) -> io::Result<()>>,
}

impl Default for ResolverHooks {
    fn default() -> Self {
        Self {
            lookup_in_path: Box::new(lookup_in_path),
            absolute: Box::new(|p| {
                if p.is_absolute() {
                    Ok(p.to_owned())
                } else {
                    Ok(std::env::current_dir()?.join(p))
                }
            }),
            stat: Box::new(|p| std::fs::metadata(p).map(|_| ())),
        }
    }
}

/// PATH lookup equivalent to a shell `which`.
fn lookup_in_path(command: &str) -> io::Result<PathBuf> {
    // A command containing a separator is a path already.
    if command.contains(std::path::MAIN_SEPARATOR) || command.contains('/') {
        let path = Path::new(command);
        if path.is_file() {
            return Ok(path.to_owned());
        }
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{command}: not found"),
        ));
    }

    let path_var = std::env::var_os("PATH")
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "PATH is not set"))?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(command);
        if candidate.is_file() {
            return Ok(candidate);
        }
        #[cfg(windows)]
        {
            let with_exe = dir.join(format!("{command}.exe"));
            if with_exe.is_file() {
                return Ok(with_exe);
            }
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{command}: executable file not found in PATH"),
    ))
}

fn is_missing_error(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    let message = err.to_string().to_lowercase();
    message.contains("not found") || message.contains("cannot find")
}

/// Resolve one spec. Configured paths try a PATH lookup first, then
/// fall back to treating the value as a filesystem path.
pub fn resolve(spec: &DependencySpec, hooks: &ResolverHooks) -> DependencyState {
    let configured = spec.configured_path.trim();

    if !configured.is_empty() {
        let mut state = DependencyState {
            spec: spec.clone(),
            resolved_path: String::new(),
            status: DependencyStatus::Ok,
            source: DependencySource::Configured,
            error: String::new(),
        };

        match resolve_configured(configured, hooks) {
            Ok(path) => {
                state.resolved_path = path.display().to_string();
                return state;
            }
            Err(err) => {
                state.resolved_path = (hooks.absolute)(Path::new(configured))
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| configured.to_owned());
                state.error = err.to_string();
                state.status = if is_missing_error(&err) {
                    DependencyStatus::Missing
                } else {
                    DependencyStatus::Error
                };
                return state;
            }
        }
    }

    let mut state = DependencyState {
        spec: spec.clone(),
        resolved_path: String::new(),
        status: DependencyStatus::Ok,
        source: DependencySource::PathLookup,
        error: String::new(),
    };
    match (hooks.lookup_in_path)(&spec.command) {
        Ok(path) => state.resolved_path = path.display().to_string(),
        Err(err) => {
            state.error = err.to_string();
            state.status = if is_missing_error(&err) {
                DependencyStatus::Missing
            } else {
                DependencyStatus::Error
            };
        }
    }
    state
}

fn resolve_configured(configured: &str, hooks: &ResolverHooks) -> io::Result<PathBuf> {
    if let Ok(path) = (hooks.lookup_in_path)(configured) {
        return Ok(path);
    }
    let absolute = (hooks.absolute)(Path::new(configured))?;
    (hooks.stat)(&absolute)?;
    Ok(absolute)
}

pub fn resolve_all(specs: &[DependencySpec], hooks: &ResolverHooks) -> Vec<DependencyState> {
    specs.iter().map(|spec| resolve(spec, hooks)).collect()
}

/// The managed tool set; tiers and hints depend on the selected
/// providers. `configured` supplies explicit paths from configuration.
pub fn build_inventory(
    stt_provider: &str,
    tts_provider: &str,
    configured: impl Fn(&str) -> String,
) -> Vec<DependencySpec> {
    let tts_provider = tts_provider.trim().to_lowercase();

    let (edge_tier, edge_hint) = if tts_provider == "edge-tts" {
        (
            DependencyTier::Should,
            "Current TTS provider is edge-tts; install this binary for local speech synthesis.",
        )
    } else {
        (
            DependencyTier::Optional,
            "Only needed when TTS provider is edge-tts.",
        )
    };

    let stt_provider = stt_provider.trim().to_lowercase();
    let separator_hint = if stt_provider.is_empty() {
        "Needed for background-music preservation during dubbing.".to_owned()
    } else {
        format!(
            "Needed for background-music preservation during dubbing (STT provider: {stt_provider})."
        )
    };

    let spec = |id: &str, command: &str, tier, hint: &str| DependencySpec {
        id: id.to_owned(),
        display_name: id.to_owned(),
        command: command.to_owned(),
        tier,
        configured_path: configured(id),
        hint: hint.to_owned(),
    };

    vec![
        spec(
            "ffmpeg",
            "ffmpeg",
            DependencyTier::Must,
            "Required for audio extraction and video composition.",
        ),
        spec(
            "ffprobe",
            "ffprobe",
            DependencyTier::Must,
            "Required for media metadata detection.",
        ),
        spec(
            "yt-dlp",
            "yt-dlp",
            DependencyTier::Must,
            "Required for URL downloads (paste-a-link mode).",
        ),
        spec("edge-tts", "edge-tts", edge_tier, edge_hint),
        spec(
            "audio-separator",
            "audio-separator",
            DependencyTier::Optional,
            &separator_hint,
        ),
    ]
}

/// Human-readable report used by `--diagnose`.
pub fn format_report(states: &[DependencyState]) -> String {
    if states.is_empty() {
        return "No dependencies to diagnose.".to_owned();
    }

    let mut out = String::from("Dependency status");
    for state in states {
        let path = if state.resolved_path.is_empty() {
            "unknown"
        } else {
            &state.resolved_path
        };
        let _ = write!(
            out,
            "\n- {} [{}]: {} | path={} | source={}",
            state.spec.display_name,
            state.spec.tier.as_str().to_uppercase(),
            state.status.as_str(),
            path,
            state.source.as_str(),
        );
        if !state.error.is_empty() {
            let _ = write!(out, "\n  error: {}", state.error);
        }
        if !state.spec.hint.is_empty() {
            let _ = write!(out, "\n  hint: {}", state.spec.hint);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(configured: &str) -> DependencySpec {
        DependencySpec {
            id: "ffmpeg".into(),
            display_name: "ffmpeg".into(),
            command: "ffmpeg".into(),
            tier: DependencyTier::Must,
            configured_path: configured.into(),
            hint: String::new(),
        }
    }

    fn hooks(
        lookup: impl Fn(&str) -> io::Result<PathBuf> + 'static,
        stat: impl Fn(&Path) -> io::Result<()> + 'static,
    ) -> ResolverHooks {
        ResolverHooks {
            lookup_in_path: Box::new(lookup),
            absolute: Box::new(|p| {
                if p.is_absolute() {
                    Ok(p.to_owned())
                } else {
                    Ok(Path::new("/abs").join(p))
                }
            }),
            stat: Box::new(stat),
        }
    }

    #[test]
    fn path_lookup_success() {
        let h = hooks(
            |cmd| Ok(PathBuf::from("/usr/bin").join(cmd)),
            |_| Ok(()),
        );
        let state = resolve(&spec_with(""), &h);
        assert_eq!(state.status, DependencyStatus::Ok);
        assert_eq!(state.source, DependencySource::PathLookup);
        assert_eq!(state.resolved_path, "/usr/bin/ffmpeg");
    }

    #[test]
    fn path_lookup_not_found_maps_to_missing() {
        let h = hooks(
            |_| Err(io::Error::new(io::ErrorKind::NotFound, "not found")),
            |_| Ok(()),
        );
        let state = resolve(&spec_with(""), &h);
        assert_eq!(state.status, DependencyStatus::Missing);
        assert!(!state.error.is_empty());
    }

    #[test]
    fn path_lookup_other_error_maps_to_error() {
        let h = hooks(
            |_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
            |_| Ok(()),
        );
        let state = resolve(&spec_with(""), &h);
        assert_eq!(state.status, DependencyStatus::Error);
    }

    #[test]
    fn configured_path_resolves_via_stat() {
        let h = hooks(
            |_| Err(io::Error::new(io::ErrorKind::NotFound, "not in PATH")),
            |p| {
                if p == Path::new("/opt/ffmpeg/bin/ffmpeg") {
                    Ok(())
                } else {
                    Err(io::Error::new(io::ErrorKind::NotFound, "no such file"))
                }
            },
        );
        let mut spec = spec_with("/opt/ffmpeg/bin/ffmpeg");
        spec.configured_path = "/opt/ffmpeg/bin/ffmpeg".into();
        let state = resolve(&spec, &h);
        assert_eq!(state.status, DependencyStatus::Ok);
        assert_eq!(state.source, DependencySource::Configured);
        assert_eq!(state.resolved_path, "/opt/ffmpeg/bin/ffmpeg");
    }

    #[test]
    fn configured_path_missing_file() {
        let h = hooks(
            |_| Err(io::Error::new(io::ErrorKind::NotFound, "not in PATH")),
            |_| Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
        );
        let state = resolve(&spec_with("relative/ffmpeg"), &h);
        assert_eq!(state.status, DependencyStatus::Missing);
        // The absolute form is still reported for the operator.
        assert_eq!(state.resolved_path, "/abs/relative/ffmpeg");
    }

    #[test]
    fn configured_path_hard_error() {
        let h = hooks(
            |_| Err(io::Error::new(io::ErrorKind::NotFound, "not in PATH")),
            |_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
        );
        let state = resolve(&spec_with("/locked/ffmpeg"), &h);
        assert_eq!(state.status, DependencyStatus::Error);
    }

    #[test]
    fn inventory_tiers_follow_providers() {
        let inv = build_inventory("whisper", "edge-tts", |_| String::new());
        let edge = inv.iter().find(|s| s.id == "edge-tts").unwrap();
        assert_eq!(edge.tier, DependencyTier::Should);

        let inv = build_inventory("whisper", "openai", |_| String::new());
        let edge = inv.iter().find(|s| s.id == "edge-tts").unwrap();
        assert_eq!(edge.tier, DependencyTier::Optional);

        for must in ["ffmpeg", "ffprobe", "yt-dlp"] {
            let tool = inv.iter().find(|s| s.id == must).unwrap();
            assert_eq!(tool.tier, DependencyTier::Must, "{must}");
        }
    }

    #[test]
    fn report_formatting_includes_error_and_hint() {
        let h = hooks(
            |_| Err(io::Error::new(io::ErrorKind::NotFound, "nope")),
            |_| Ok(()),
        );
        let mut spec = spec_with("");
        spec.hint = "install it".into();
        let report = format_report(&resolve_all(&[spec], &h));
        assert!(report.contains("- ffmpeg [MUST]: missing"));
        assert!(report.contains("error: nope"));
        assert!(report.contains("hint: install it"));
        assert_eq!(format_report(&[]), "No dependencies to diagnose.");
    }
}
