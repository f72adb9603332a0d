//! Content-addressed auto-installer for the managed Windows packages.
//!
//! An installation attempt maps a dependency id to its containing
//! package, streams the download to disk while hashing it, verifies the
//! SHA-256 against the catalog, then either extracts the declared
//! executables from the zip or copies the binary into place. Resolved
//! tool paths are returned to the caller for registration.
//!
//! Progress is reported through an optional callback; the emitted
//! percentage never leaves `[0, 1]`. The download phase owns `0–0.75`,
//! verification sits at `0.85`, extraction walks `0.85–0.95`.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::InstallError;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const PROGRESS_INTERVAL: Duration = Duration::from_millis(120);
const DOWNLOAD_PHASE_SHARE: f64 = 0.75;

pub const DEP_FFMPEG: &str = "ffmpeg";
pub const DEP_FFPROBE: &str = "ffprobe";
pub const DEP_YTDLP: &str = "yt-dlp";

const PACKAGE_FFMPEG_SUITE: &str = "ffmpeg-suite";
const PACKAGE_YTDLP: &str = "yt-dlp";

const FFMPEG_WINDOWS_VERSION: &str = "n7.1.3-40-gcddd06f3b9";
const FFMPEG_WINDOWS_URL: &str = "https://github.com/BtbN/FFmpeg-Builds/releases/download/autobuild-2026-02-18-13-03/ffmpeg-n7.1.3-40-gcddd06f3b9-win64-gpl-7.1.zip";
const FFMPEG_WINDOWS_SHA256: &str =
    "8624d6006289c5ca2c1f2f65c19f5812a44261ce9d0fa4c1dc9a45063b3c0735";

const YTDLP_WINDOWS_VERSION: &str = "2026.01.31";
const YTDLP_WINDOWS_URL: &str =
    "https://github.com/yt-dlp/yt-dlp/releases/download/2026.01.31/yt-dlp.exe";
const YTDLP_WINDOWS_SHA256: &str =
    "766b70db21f53d05ae12a8aaefc88421de712360ec28a419046b4157a8a5599c";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Zip,
    Binary,
}

#[derive(Debug, Clone)]
pub struct PackageTool {
    pub tool_id: String,
    pub executable: String,
}

#[derive(Debug, Clone)]
pub struct PackageSpec {
    pub id: String,
    pub version: String,
    pub url: String,
    pub sha256: String,
    pub format: PackageFormat,
    pub tools: Vec<PackageTool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Preparing,
    Downloading,
    Verifying,
    Extracting,
    Installing,
    Done,
}

impl InstallStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStage::Preparing => "preparing",
            InstallStage::Downloading => "downloading",
            InstallStage::Verifying => "verifying",
            InstallStage::Extracting => "extracting",
            InstallStage::Installing => "installing",
            InstallStage::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallProgress {
    pub dependency_id: String,
    pub stage: InstallStage,
    pub message: String,
    pub downloaded: u64,
    pub total: u64,
    pub percent: f64,
}

pub type ProgressCallback<'a> = &'a (dyn Fn(InstallProgress) + Send + Sync);

/// A tool placed on disk by a successful installation, ready to be
/// registered into the tool-path registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledTool {
    pub tool_id: String,
    pub path: PathBuf,
}

pub struct InstallerOptions {
    pub cache_dir: PathBuf,
    pub http: reqwest::Client,
    pub packages: HashMap<String, PackageSpec>,
    pub tool_to_package: HashMap<String, String>,
}

impl InstallerOptions {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            http: download_client(None),
            packages: default_packages(),
            tool_to_package: default_tool_package_map(),
        }
    }
}

pub fn download_client(proxy: Option<&str>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .user_agent(concat!("redub/", env!("CARGO_PKG_VERSION")));
    if let Some(proxy_url) = proxy.filter(|p| !p.trim().is_empty()) {
        if let Ok(p) = reqwest::Proxy::all(proxy_url) {
            builder = builder.proxy(p);
        }
    }
    builder.build().unwrap_or_default()
}

pub fn default_packages() -> HashMap<String, PackageSpec> {
    let mut packages = HashMap::new();
    packages.insert(
        PACKAGE_FFMPEG_SUITE.to_owned(),
        PackageSpec {
            id: PACKAGE_FFMPEG_SUITE.to_owned(),
            version: FFMPEG_WINDOWS_VERSION.to_owned(),
            url: FFMPEG_WINDOWS_URL.to_owned(),
            sha256: FFMPEG_WINDOWS_SHA256.to_owned(),
            format: PackageFormat::Zip,
            tools: vec![
                PackageTool {
                    tool_id: DEP_FFMPEG.to_owned(),
                    executable: "ffmpeg.exe".to_owned(),
                },
                PackageTool {
                    tool_id: DEP_FFPROBE.to_owned(),
                    executable: "ffprobe.exe".to_owned(),
                },
            ],
        },
    );
    packages.insert(
        PACKAGE_YTDLP.to_owned(),
        PackageSpec {
            id: PACKAGE_YTDLP.to_owned(),
            version: YTDLP_WINDOWS_VERSION.to_owned(),
            url: YTDLP_WINDOWS_URL.to_owned(),
            sha256: YTDLP_WINDOWS_SHA256.to_owned(),
            format: PackageFormat::Binary,
            tools: vec![PackageTool {
                tool_id: DEP_YTDLP.to_owned(),
                executable: "yt-dlp.exe".to_owned(),
            }],
        },
    );
    packages
}

pub fn default_tool_package_map() -> HashMap<String, String> {
    HashMap::from([
        (DEP_FFMPEG.to_owned(), PACKAGE_FFMPEG_SUITE.to_owned()),
        (DEP_FFPROBE.to_owned(), PACKAGE_FFMPEG_SUITE.to_owned()),
        (DEP_YTDLP.to_owned(), PACKAGE_YTDLP.to_owned()),
    ])
}

pub fn can_auto_install(dependency_id: &str) -> bool {
    cfg!(windows) && default_tool_package_map().contains_key(&normalize_id(dependency_id))
}

fn normalize_id(dependency_id: &str) -> String {
    dependency_id.trim().to_lowercase()
}

/// Entry point used by the server: Windows-only, default catalog.
pub async fn install_dependency(
    cache_dir: &Path,
    dependency_id: &str,
    progress: Option<ProgressCallback<'_>>,
) -> Result<Vec<InstalledTool>, InstallError> {
    if !cfg!(windows) {
        return Err(InstallError::UnsupportedPlatform);
    }
    install_with_options(dependency_id, InstallerOptions::new(cache_dir), progress).await
}

/// OS-agnostic installation routine (exercised directly by the tests).
pub async fn install_with_options(
    dependency_id: &str,
    options: InstallerOptions,
    progress: Option<ProgressCallback<'_>>,
) -> Result<Vec<InstalledTool>, InstallError> {
    let dependency_id = normalize_id(dependency_id);
    if dependency_id.is_empty() {
        return Err(InstallError::UnsupportedDependency(dependency_id));
    }

    let package_id = options
        .tool_to_package
        .get(&dependency_id)
        .ok_or_else(|| InstallError::UnsupportedDependency(dependency_id.clone()))?;
    let package = options
        .packages
        .get(package_id)
        .ok_or_else(|| InstallError::UnsupportedDependency(package_id.clone()))?;

    let targets = target_paths(&options.cache_dir, package)?;

    if targets.iter().all(|t| t.path.exists()) {
        emit(
            progress,
            &dependency_id,
            InstallStage::Done,
            "Dependency already installed",
            0,
            0,
            1.0,
        );
        return Ok(targets);
    }

    std::fs::create_dir_all(options.cache_dir.join("bin"))?;
    emit(
        progress,
        &dependency_id,
        InstallStage::Preparing,
        &format!("Preparing {dependency_id} installer"),
        0,
        0,
        0.0,
    );

    let download_path =
        download_and_verify(&dependency_id, package, &options, progress).await?;

    let result = match package.format {
        PackageFormat::Zip => extract_zip_package(&download_path, &targets, &dependency_id, progress),
        PackageFormat::Binary => install_binary(&download_path, &targets, &dependency_id, progress),
    };
    let _ = std::fs::remove_file(&download_path);
    result?;

    emit(
        progress,
        &dependency_id,
        InstallStage::Done,
        &format!("{dependency_id} installed successfully"),
        0,
        0,
        1.0,
    );
    info!(dependency_id, "dependency installed");
    Ok(targets)
}

fn target_paths(cache_dir: &Path, package: &PackageSpec) -> Result<Vec<InstalledTool>, InstallError> {
    let mut targets = Vec::with_capacity(package.tools.len());
    for tool in &package.tools {
        if tool.tool_id.is_empty() {
            return Err(InstallError::InvalidPackage {
                package: package.id.clone(),
                message: "contains empty tool id".into(),
            });
        }
        if tool.executable.is_empty() {
            return Err(InstallError::InvalidPackage {
                package: package.id.clone(),
                message: format!("empty executable for {}", tool.tool_id),
            });
        }
        targets.push(InstalledTool {
            tool_id: tool.tool_id.clone(),
            path: cache_dir.join("bin").join(&tool.tool_id).join(&tool.executable),
        });
    }
    Ok(targets)
}

/// Stream the package to a temp file under `bin/downloads/`, hashing as
/// bytes arrive, and verify the checksum before handing the file back.
async fn download_and_verify(
    dependency_id: &str,
    package: &PackageSpec,
    options: &InstallerOptions,
    progress: Option<ProgressCallback<'_>>,
) -> Result<PathBuf, InstallError> {
    let download_dir = options.cache_dir.join("bin").join("downloads");
    std::fs::create_dir_all(&download_dir)?;
    let download_path = download_dir.join(format!(
        "{}-{}.pkg",
        package.id,
        std::process::id(),
    ));

    let cleanup = |path: &Path| {
        let _ = std::fs::remove_file(path);
    };

    let response = match options.http.get(&package.url).send().await {
        Ok(response) => response,
        Err(e) => {
            cleanup(&download_path);
            return Err(InstallError::Http(e));
        }
    };
    if response.status().as_u16() != 200 {
        cleanup(&download_path);
        return Err(InstallError::UnexpectedStatus {
            url: package.url.clone(),
            status: response.status().as_u16(),
        });
    }

    let total = response.content_length().unwrap_or(0);
    let mut file = std::fs::File::create(&download_path)?;
    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut last_progress = Instant::now() - PROGRESS_INTERVAL;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                cleanup(&download_path);
                return Err(InstallError::Http(e));
            }
        };
        if let Err(e) = std::io::Write::write_all(&mut file, &chunk) {
            cleanup(&download_path);
            return Err(InstallError::Io(e));
        }
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;

        let finished = total > 0 && downloaded >= total;
        if last_progress.elapsed() >= PROGRESS_INTERVAL || finished {
            let percent = if total > 0 {
                DOWNLOAD_PHASE_SHARE * downloaded as f64 / total as f64
            } else {
                DOWNLOAD_PHASE_SHARE
            };
            emit(
                progress,
                dependency_id,
                InstallStage::Downloading,
                &format!("Downloading {}", package.id),
                downloaded,
                total,
                percent,
            );
            last_progress = Instant::now();
        }
    }
    drop(file);

    emit(
        progress,
        dependency_id,
        InstallStage::Verifying,
        &format!("Verifying checksum for {}", package.id),
        downloaded,
        total,
        0.85,
    );

    let actual = hex_digest(hasher);
    let expected = package.sha256.trim().to_lowercase();
    if !expected.is_empty() && actual != expected {
        cleanup(&download_path);
        return Err(InstallError::ChecksumMismatch {
            package: package.id.clone(),
            expected,
            actual,
        });
    }

    Ok(download_path)
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Extract every declared executable from the archive, matching entry
/// base names case-insensitively. Every tool must be matched.
fn extract_zip_package(
    archive_path: &Path,
    targets: &[InstalledTool],
    dependency_id: &str,
    progress: Option<ProgressCallback<'_>>,
) -> Result<(), InstallError> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    if archive.len() == 0 {
        return Err(InstallError::EmptyArchive);
    }

    let mut wanted: HashMap<String, &InstalledTool> = targets
        .iter()
        .map(|t| {
            let name = t
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            (name, t)
        })
        .collect();

    let total = archive.len();
    for i in 0..total {
        emit(
            progress,
            dependency_id,
            InstallStage::Extracting,
            "Extracting dependency package",
            0,
            0,
            0.85 + 0.1 * (i + 1) as f64 / total as f64,
        );

        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let base_name = Path::new(entry.name())
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let Some(target) = wanted.remove(&base_name) else {
            continue;
        };

        if let Some(parent) = target.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target.path)?;
        let mut buffer = Vec::new();
        entry.read_to_end(&mut buffer)?;
        std::io::Write::write_all(&mut out, &buffer)?;
        set_executable(&target.path)?;
    }

    if !wanted.is_empty() {
        let mut missing: Vec<String> = wanted.values().map(|t| t.tool_id.clone()).collect();
        missing.sort();
        return Err(InstallError::MissingExecutables(missing));
    }
    Ok(())
}

/// A binary package is simply copied to every declared target.
fn install_binary(
    source: &Path,
    targets: &[InstalledTool],
    dependency_id: &str,
    progress: Option<ProgressCallback<'_>>,
) -> Result<(), InstallError> {
    if targets.is_empty() {
        return Err(InstallError::InvalidPackage {
            package: dependency_id.to_owned(),
            message: "binary package has no targets".into(),
        });
    }

    emit(
        progress,
        dependency_id,
        InstallStage::Installing,
        "Installing dependency binary",
        0,
        0,
        0.9,
    );

    for target in targets {
        if let Some(parent) = target.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, &target.path)?;
        set_executable(&target.path)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn emit(
    callback: Option<ProgressCallback<'_>>,
    dependency_id: &str,
    stage: InstallStage,
    message: &str,
    downloaded: u64,
    total: u64,
    percent: f64,
) {
    if let Some(callback) = callback {
        callback(InstallProgress {
            dependency_id: dependency_id.to_owned(),
            stage,
            message: message.to_owned(),
            downloaded,
            total,
            percent: percent.clamp(0.0, 1.0),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;

    /// Serve one canned HTTP response on an ephemeral port.
    async fn serve_once(body: Vec<u8>, status_line: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
                let header = format!(
                    "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/pkg")
    }

    fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex_digest(hasher)
    }

    fn binary_options(cache_dir: &Path, url: String, sha256: String) -> InstallerOptions {
        let package = PackageSpec {
            id: "tool-pkg".into(),
            version: "1.0".into(),
            url,
            sha256,
            format: PackageFormat::Binary,
            tools: vec![PackageTool {
                tool_id: "mytool".into(),
                executable: "mytool.exe".into(),
            }],
        };
        InstallerOptions {
            cache_dir: cache_dir.to_owned(),
            http: reqwest::Client::new(),
            packages: HashMap::from([("tool-pkg".to_owned(), package)]),
            tool_to_package: HashMap::from([("mytool".to_owned(), "tool-pkg".to_owned())]),
        }
    }

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                std::io::Write::write_all(&mut writer, data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn binary_package_installs_and_hash_matches_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"#!/fake-binary".to_vec();
        let sha = sha256_hex(&payload);
        let url = serve_once(payload.clone(), "HTTP/1.1 200 OK").await;

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback = move |p: InstallProgress| sink.lock().unwrap().push(p);

        let installed = install_with_options(
            "mytool",
            binary_options(dir.path(), url, sha.clone()),
            Some(&callback),
        )
        .await
        .unwrap();

        assert_eq!(installed.len(), 1);
        let path = &installed[0].path;
        assert_eq!(*path, dir.path().join("bin/mytool/mytool.exe"));
        // P4: the installed file hashes to the declared checksum.
        assert_eq!(sha256_hex(&std::fs::read(path).unwrap()), sha);

        let events = events.lock().unwrap();
        assert!(events.iter().all(|p| (0.0..=1.0).contains(&p.percent)));
        assert_eq!(events.first().unwrap().stage, InstallStage::Preparing);
        assert_eq!(events.last().unwrap().stage, InstallStage::Done);
        assert!((events.last().unwrap().percent - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn checksum_mismatch_aborts_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"evil bytes".to_vec();
        let url = serve_once(payload, "HTTP/1.1 200 OK").await;

        let err = install_with_options(
            "mytool",
            binary_options(dir.path(), url, "deadbeef".repeat(8)),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, InstallError::ChecksumMismatch { .. }));
        // No tool directory was created and the temp download is gone.
        assert!(!dir.path().join("bin/mytool").exists());
        let downloads = dir.path().join("bin/downloads");
        let leftover = std::fs::read_dir(&downloads)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0, "temp download must be removed");
    }

    #[tokio::test]
    async fn non_200_status_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve_once(b"not found".to_vec(), "HTTP/1.1 404 Not Found").await;

        let err = install_with_options(
            "mytool",
            binary_options(dir.path(), url, "00".repeat(32)),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            InstallError::UnexpectedStatus { status: 404, .. }
        ));
    }

    #[tokio::test]
    async fn zip_package_extracts_declared_executables() {
        let dir = tempfile::tempdir().unwrap();
        let zip_bytes = build_zip(&[
            ("release/bin/FFMPEG.EXE", b"ffmpeg binary"),
            ("release/bin/ffprobe.exe", b"ffprobe binary"),
            ("release/README.txt", b"docs"),
        ]);
        let sha = sha256_hex(&zip_bytes);
        let url = serve_once(zip_bytes, "HTTP/1.1 200 OK").await;

        let package = PackageSpec {
            id: "ffmpeg-suite".into(),
            version: "7".into(),
            url,
            sha256: sha,
            format: PackageFormat::Zip,
            tools: vec![
                PackageTool {
                    tool_id: "ffmpeg".into(),
                    executable: "ffmpeg.exe".into(),
                },
                PackageTool {
                    tool_id: "ffprobe".into(),
                    executable: "ffprobe.exe".into(),
                },
            ],
        };
        let options = InstallerOptions {
            cache_dir: dir.path().to_owned(),
            http: reqwest::Client::new(),
            packages: HashMap::from([("ffmpeg-suite".to_owned(), package)]),
            tool_to_package: HashMap::from([
                ("ffmpeg".to_owned(), "ffmpeg-suite".to_owned()),
                ("ffprobe".to_owned(), "ffmpeg-suite".to_owned()),
            ]),
        };

        let installed = install_with_options("ffmpeg", options, None).await.unwrap();
        assert_eq!(installed.len(), 2);
        // Base-name matching is case-insensitive.
        assert_eq!(
            std::fs::read(dir.path().join("bin/ffmpeg/ffmpeg.exe")).unwrap(),
            b"ffmpeg binary"
        );
        assert_eq!(
            std::fs::read(dir.path().join("bin/ffprobe/ffprobe.exe")).unwrap(),
            b"ffprobe binary"
        );
    }

    #[tokio::test]
    async fn zip_missing_declared_tool_fails() {
        let dir = tempfile::tempdir().unwrap();
        let zip_bytes = build_zip(&[("bin/ffmpeg.exe", b"only ffmpeg")]);
        let sha = sha256_hex(&zip_bytes);
        let url = serve_once(zip_bytes, "HTTP/1.1 200 OK").await;

        let package = PackageSpec {
            id: "ffmpeg-suite".into(),
            version: "7".into(),
            url,
            sha256: sha,
            format: PackageFormat::Zip,
            tools: vec![
                PackageTool {
                    tool_id: "ffmpeg".into(),
                    executable: "ffmpeg.exe".into(),
                },
                PackageTool {
                    tool_id: "ffprobe".into(),
                    executable: "ffprobe.exe".into(),
                },
            ],
        };
        let options = InstallerOptions {
            cache_dir: dir.path().to_owned(),
            http: reqwest::Client::new(),
            packages: HashMap::from([("ffmpeg-suite".to_owned(), package)]),
            tool_to_package: HashMap::from([("ffmpeg".to_owned(), "ffmpeg-suite".to_owned())]),
        };

        let err = install_with_options("ffmpeg", options, None)
            .await
            .unwrap_err();
        match err {
            InstallError::MissingExecutables(missing) => {
                assert_eq!(missing, vec!["ffprobe".to_owned()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn already_installed_short_circuits_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("bin/mytool/mytool.exe");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"existing").unwrap();

        // An unroutable URL proves no download is attempted.
        let options = binary_options(
            dir.path(),
            "http://127.0.0.1:1/never".into(),
            "00".repeat(32),
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback = move |p: InstallProgress| sink.lock().unwrap().push(p);

        let installed = install_with_options("mytool", options, Some(&callback))
            .await
            .unwrap();
        assert_eq!(installed[0].path, target);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, InstallStage::Done);
    }

    #[tokio::test]
    async fn unknown_dependency_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = install_with_options(
            "unknown-tool",
            InstallerOptions::new(dir.path()),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InstallError::UnsupportedDependency(_)));
    }

    #[test]
    fn default_catalog_is_consistent() {
        let packages = default_packages();
        let map = default_tool_package_map();
        for (tool, package_id) in &map {
            let package = packages.get(package_id).expect("package exists");
            assert!(
                package.tools.iter().any(|t| &t.tool_id == tool),
                "{tool} missing from {package_id}"
            );
            assert_eq!(package.sha256.len(), 64);
        }
    }
}
